//! One local DTLS socket and the peers it talks to.
//!
//! The [`Endpoint`] owns a handshaker per peer in negotiation and an
//! association per peer with an established session. Incoming datagrams are
//! routed by peer address:
//!
//! * a peer with a handshake in progress gets its records handed to the
//!   handshaker (application data excepted, which belongs to an existing
//!   association),
//! * a peer with an association gets its records opened under the
//!   association's read epochs,
//! * anything else is only looked at if it is a plaintext ClientHello, which
//!   goes through the stateless cookie exchange before a responder is
//!   created.
//!
//! The endpoint does no I/O of its own. It sends through the
//! [`RecordLayer`] and is driven by `handle_datagram` and `handle_timeout`.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::correlation::CorrelationContext;
use crate::event::SessionListener;
use crate::handshake::{
    Completion, CookieGenerator, HandshakeKind, HandshakeParams, HandshakeParamsBuilder,
    HandshakeState, Handshaker, Handshakers, RetainedFlight,
};
use crate::message::{parse_body, ClientHello, Fragment, Header, HelloVerifyRequest, MessageType};
use crate::record::{serialize_record, ReadState, Record, RecordLayer, WriteState};
use crate::rng::SeededRng;
use crate::session::{InMemorySessionCache, SessionCache};
use crate::types::{Alert, AlertDescription, ContentType, ProtocolVersion};
use crate::{Config, Error, Session};

/// Largest application data payload of one record.
const MAX_PLAINTEXT: usize = 16_384;

pub struct Endpoint {
    config: Arc<Config>,
    record_layer: Arc<dyn RecordLayer>,
    listener: Arc<dyn SessionListener>,
    cache: Arc<dyn SessionCache>,
    cookies: CookieGenerator,
    handshakes: HashMap<SocketAddr, Handshaker>,
    associations: HashMap<SocketAddr, Association>,
    received: VecDeque<(SocketAddr, Vec<u8>)>,
}

/// An established session with one peer.
struct Association {
    /// Negotiated parameters, without connection state.
    session: Session,
    is_client: bool,
    read: ReadState,
    /// Epoch the handshake ran in, for late records of the peer's last flight.
    read_previous: Option<ReadState>,
    write: WriteState,
    /// Our final flight, until the peer shows it arrived.
    retained: Option<RetainedFlight>,
}

impl Association {
    fn new(completion: Completion, is_client: bool) -> Option<Self> {
        let mut session = completion.session;
        let (read, write) = session.take_states()?;
        Some(Association {
            session,
            is_client,
            read,
            read_previous: completion.read_previous,
            write,
            retained: completion.retained,
        })
    }

    fn session(&self) -> Session {
        let mut session = self.session.clone();
        session.set_states(self.read.clone(), self.write.clone());
        session
    }

    /// Catch up with a handshake that ran over copies of this association's
    /// current epoch: skip the sequence numbers it wrote and mark the records
    /// it accepted.
    fn reconcile(&mut self, handshaker: &Handshaker) {
        let (read, write) = handshaker.base_states();
        if let Some(read) = read {
            self.read.merge(read);
        }
        if let Some(write) = write {
            self.write.catch_up(write);
        }
    }

    /// Keep the replay history of the association this one replaces.
    fn inherit(&mut self, previous: &Association) {
        if let Some(read) = self.read_previous.as_mut() {
            read.merge(&previous.read);
        }
    }
}

impl Endpoint {
    pub fn new(
        config: Arc<Config>,
        record_layer: Arc<dyn RecordLayer>,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        let mut rng = SeededRng::new(config.rng_seed());
        Endpoint {
            cookies: CookieGenerator::new(rng.fork()),
            config,
            record_layer,
            listener,
            cache: Arc::new(InMemorySessionCache::default()),
            handshakes: HashMap::new(),
            associations: HashMap::new(),
            received: VecDeque::new(),
        }
    }

    /// Use `cache` for established sessions instead of a private in-memory
    /// cache.
    pub fn with_session_cache(mut self, cache: Arc<dyn SessionCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Start a full handshake with `peer`.
    pub fn connect(&mut self, peer: SocketAddr, now: Instant) -> Result<(), Error> {
        self.initiate(HandshakeKind::Client, Session::new(peer), now)
    }

    /// Start an abbreviated handshake with `peer`, resuming `session`.
    ///
    /// With an established association to `peer`, the handshake runs
    /// protected by the association and the resumed session moves to the
    /// next epoch.
    pub fn resume(&mut self, peer: SocketAddr, session: Session, now: Instant) -> Result<(), Error> {
        if !session.is_resumable() {
            return Err(Error::InvalidArgument(
                "session has no id, master secret or cipher suite".into(),
            ));
        }

        let mut session = session.resumable().with_peer(peer);
        if let Some(assoc) = self.associations.get(&peer) {
            session.set_states(assoc.read.clone(), assoc.write.clone());
        }

        self.initiate(HandshakeKind::ResumingClient, session, now)
    }

    fn initiate(&mut self, kind: HandshakeKind, session: Session, now: Instant) -> Result<(), Error> {
        let peer = session.peer();
        if self.handshakes.contains_key(&peer) {
            return Err(Error::InvalidState(format!(
                "handshake with {} in progress",
                peer
            )));
        }

        let params = self.params(session).build()?;
        let mut handshaker = Handshakers::create(kind, params)?;
        let result = handshaker.start(now);

        self.handshakes.insert(peer, handshaker);
        self.settle(peer);
        result
    }

    fn params(&self, session: Session) -> HandshakeParamsBuilder {
        HandshakeParams::builder()
            .session(session)
            .record_layer(self.record_layer.clone())
            .listener(self.listener.clone())
            .config(self.config.clone())
    }

    /// Process a datagram received from `peer`.
    ///
    /// Handshake outcomes are reported to the session listener; nothing a
    /// peer sends makes this fail.
    pub fn handle_datagram(&mut self, peer: SocketAddr, datagram: &[u8], now: Instant) {
        let (records, error) = Record::parse_datagram(peer, datagram);

        for record in records {
            self.handle_record(record, now);
        }

        let Some(error) = error else {
            return;
        };

        if let Some(handshaker) = self.handshakes.get_mut(&peer) {
            if let Err(e) = handshaker.discard_record(error) {
                debug!("Handshake with {} ended: {}", peer, e);
            }
            self.settle(peer);
        } else {
            debug!("Drop malformed datagram: {}", error);
            self.listener.on_record_discarded(&error);
        }
    }

    fn handle_record(&mut self, record: Record, now: Instant) {
        let peer = record.peer;

        let to_association = record.content_type == ContentType::ApplicationData
            && self.associations.contains_key(&peer);

        if let Some(handshaker) = self.handshakes.get_mut(&peer) {
            if !to_association {
                if let Err(e) = handshaker.handle_record(record, now) {
                    debug!("Handshake with {} ended: {}", peer, e);
                }
                self.settle(peer);
                return;
            }
        }

        if self.associations.contains_key(&peer) {
            self.handle_association_record(record, now);
        } else if record.epoch == 0 && record.content_type == ContentType::Handshake {
            self.handle_hello(record, now);
        } else {
            trace!("Drop {:?}: no handshake or association", record);
        }
    }

    /// A plaintext record from a peer we hold no handshake state for. Only a
    /// ClientHello is of interest.
    fn handle_hello(&mut self, record: Record, now: Instant) {
        let peer = record.peer;

        let first = Fragment::parse_all(&record.fragment)
            .ok()
            .and_then(|f| f.into_iter().next());
        let Some(fragment) = first else {
            trace!("Drop malformed handshake record from {}", peer);
            return;
        };

        let header = fragment.header;
        if header.msg_type != MessageType::ClientHello {
            trace!("Drop {:?} from {}: no handshake", header.msg_type, peer);
            return;
        }
        if header.fragment_offset != 0 || header.fragment_length != header.length {
            debug!("Drop fragmented ClientHello from {}", peer);
            return;
        }

        let ch = match parse_body(&fragment.body, ClientHello::parse) {
            Ok(ch) => ch,
            Err(e) => {
                debug!("Drop malformed ClientHello from {}: {}", peer, e);
                return;
            }
        };

        if !self.cookies.verify(peer, &ch, now) {
            self.send_hello_verify_request(&record, header.message_seq, &ch, now);
            return;
        }

        let cached = if ch.session_id.is_empty() {
            None
        } else {
            self.cache.get(&ch.session_id)
        };

        let (kind, session) = match cached {
            Some(session) => {
                debug!("ClientHello from {} resumes {}", peer, ch.session_id);
                (HandshakeKind::ResumingServer, session.with_peer(peer))
            }
            None => (HandshakeKind::Server, Session::new(peer)),
        };

        let result = self
            .params(session)
            .initial_message_sequence(header.message_seq)
            .initial_record_sequence(record.sequence_number)
            .build()
            .and_then(|params| Handshakers::create(kind, params));

        let mut handshaker = match result {
            Ok(h) => h,
            Err(e) => {
                warn!("Cannot accept handshake from {}: {}", peer, e);
                return;
            }
        };

        if let Err(e) = handshaker.handle_record(record, now) {
            debug!("Handshake with {} ended: {}", peer, e);
        }
        self.handshakes.insert(peer, handshaker);
        self.settle(peer);
    }

    fn send_hello_verify_request(
        &mut self,
        record: &Record,
        message_seq: u16,
        ch: &ClientHello,
        now: Instant,
    ) {
        let Some(cookie) = self.cookies.generate(record.peer, ch, now) else {
            return;
        };

        let mut body = Vec::new();
        HelloVerifyRequest {
            server_version: ProtocolVersion::DTLS1_0,
            cookie,
        }
        .serialize(&mut body);

        let mut fragment = Vec::with_capacity(Header::LEN + body.len());
        Header {
            msg_type: MessageType::HelloVerifyRequest,
            length: body.len() as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        }
        .serialize(&mut fragment);
        fragment.extend_from_slice(&body);

        // Same message_seq and record sequence as the ClientHello.
        let mut datagram = Vec::new();
        serialize_record(
            ContentType::Handshake,
            0,
            record.sequence_number,
            &fragment,
            &mut datagram,
        );

        debug!("Send HelloVerifyRequest to {}", record.peer);
        if let Err(e) = self.record_layer.send(record.peer, &[datagram]) {
            debug!("HelloVerifyRequest to {} not delivered: {}", record.peer, e);
        }
    }

    fn handle_association_record(&mut self, record: Record, now: Instant) {
        let peer = record.peer;
        let Some(assoc) = self.associations.get_mut(&peer) else {
            return;
        };

        if record.epoch == 0 && assoc.read.epoch() != 0 {
            if record.content_type == ContentType::Handshake {
                // The peer may have lost its state and started over.
                self.handle_hello(record, now);
            } else {
                trace!("Drop plaintext {:?} from {}", record.content_type, peer);
            }
            return;
        }

        let is_current = record.epoch == assoc.read.epoch();
        let state = if is_current {
            &mut assoc.read
        } else {
            match assoc.read_previous.as_mut() {
                Some(p) if p.epoch() == record.epoch => p,
                _ => {
                    trace!("Drop record of unknown epoch {} from {}", record.epoch, peer);
                    return;
                }
            }
        };

        let content_type = record.content_type;

        // A ClientHello starts a handshake that must see the record unopened.
        let unopened = (content_type == ContentType::Handshake).then(|| state.clone());

        let plaintext = match state.open(&record) {
            Ok(Some(plaintext)) => plaintext,
            Ok(None) => return,
            Err(e) => {
                warn!("Discard record: {}", e);
                self.listener.on_record_discarded(&e);
                return;
            }
        };

        match content_type {
            ContentType::ApplicationData => {
                if assoc.retained.take().is_some() {
                    trace!("Peer {} completed, release final flight", peer);
                }
                self.received.push_back((peer, plaintext));
            }
            ContentType::Alert => {
                let alert = match Alert::parse(&plaintext) {
                    Ok((_, alert)) => alert,
                    Err(_) => {
                        debug!("Drop malformed alert from {}", peer);
                        return;
                    }
                };
                if alert.is_fatal() || alert.description == AlertDescription::CloseNotify {
                    debug!("Association with {} ended by {}", peer, alert);
                    if alert.is_fatal() {
                        self.cache.remove(assoc.session.id());
                    }
                    self.associations.remove(&peer);
                } else {
                    debug!("Ignore warning alert from {}: {}", peer, alert);
                }
            }
            ContentType::Handshake => {
                let first = Fragment::parse_all(&plaintext)
                    .ok()
                    .and_then(|f| f.into_iter().next());
                let Some(first) = first else {
                    debug!("Drop malformed handshake record from {}", peer);
                    return;
                };

                let msg_type = first.header.msg_type;
                if is_current && !assoc.is_client && msg_type == MessageType::ClientHello {
                    let Some(read) = unopened else {
                        return;
                    };
                    let mut session = assoc.session.clone();
                    session.set_states(read, assoc.write.clone());
                    self.renegotiate(record, session, first.header.message_seq, now);
                    return;
                }

                let mtu = self.config.mtu();
                match assoc.retained.as_mut() {
                    Some(retained) if is_current => match retained.resend(&mut assoc.write, mtu) {
                        Ok(datagrams) => {
                            debug!("Resend final flight to {} due to {:?}", peer, msg_type);
                            if let Err(e) = self.record_layer.send(peer, &datagrams) {
                                debug!("Final flight to {} not delivered: {}", peer, e);
                            }
                        }
                        Err(e) => warn!("Cannot resend final flight to {}: {}", peer, e),
                    },
                    _ => trace!("Drop {:?} from {} over association", msg_type, peer),
                }
            }
            ContentType::ChangeCipherSpec => {
                trace!("Drop ChangeCipherSpec from {} over association", peer);
            }
        }
    }

    /// A ClientHello over an established association: resume it, protected
    /// by its current epoch.
    fn renegotiate(&mut self, record: Record, session: Session, message_seq: u16, now: Instant) {
        let peer = record.peer;
        debug!("ClientHello from {} over epoch {}", peer, record.epoch);

        let result = self
            .params(session)
            .initial_message_sequence(message_seq)
            .build()
            .and_then(|params| Handshakers::create(HandshakeKind::ResumingServer, params));

        let mut handshaker = match result {
            Ok(h) => h,
            Err(e) => {
                warn!("Cannot accept handshake from {}: {}", peer, e);
                return;
            }
        };

        if let Err(e) = handshaker.handle_record(record, now) {
            debug!("Handshake with {} ended: {}", peer, e);
        }
        self.handshakes.insert(peer, handshaker);
        self.settle(peer);
    }

    /// Move a finished handshake out of the way. An established one becomes
    /// the peer's association.
    fn settle(&mut self, peer: SocketAddr) {
        let Some(state) = self.handshakes.get(&peer).map(|h| h.state()) else {
            return;
        };

        match state {
            HandshakeState::Established => {
                let Some(handshaker) = self.handshakes.remove(&peer) else {
                    return;
                };
                let is_client = handshaker.kind().is_client();
                let completion = handshaker.into_completion();
                self.cache.put(&completion.session);

                let Some(mut assoc) = Association::new(completion, is_client) else {
                    warn!("Established handshake with {} without connection state", peer);
                    return;
                };
                if let Some(previous) = self.associations.get(&peer) {
                    assoc.inherit(previous);
                }
                debug!(
                    "Association with {} in epoch {}: {}",
                    peer,
                    assoc.write.epoch(),
                    assoc.session.id()
                );
                self.associations.insert(peer, assoc);
            }
            HandshakeState::Aborted => {
                let Some(handshaker) = self.handshakes.remove(&peer) else {
                    return;
                };
                if handshaker.failure().is_some_and(Error::invalidates_session) {
                    self.cache.remove(handshaker.session().id());
                }
                if let Some(assoc) = self.associations.get_mut(&peer) {
                    assoc.reconcile(&handshaker);
                }
            }
            _ => {}
        }
    }

    /// Drive retransmission and handshake timeouts.
    pub fn handle_timeout(&mut self, now: Instant) {
        let peers: Vec<SocketAddr> = self.handshakes.keys().copied().collect();
        for peer in peers {
            if let Some(handshaker) = self.handshakes.get_mut(&peer) {
                if let Err(e) = handshaker.handle_timeout(now) {
                    debug!("Handshake with {} ended: {}", peer, e);
                }
            }
            self.settle(peer);
        }
    }

    /// The next instant `handle_timeout` must be called.
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.handshakes
            .values()
            .filter_map(|h| h.poll_timeout())
            .min()
    }

    /// Send application data to an established peer.
    pub fn send_application_data(&mut self, peer: SocketAddr, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_PLAINTEXT {
            return Err(Error::InvalidArgument(format!(
                "{} bytes exceed the record limit of {}",
                data.len(),
                MAX_PLAINTEXT
            )));
        }
        if self.handshakes.contains_key(&peer) && self.associations.contains_key(&peer) {
            return Err(Error::InvalidState(format!(
                "handshake with {} in progress",
                peer
            )));
        }
        let Some(assoc) = self.associations.get_mut(&peer) else {
            return Err(Error::NotConnected(peer));
        };

        let mut datagram = Vec::new();
        assoc
            .write
            .write_record(ContentType::ApplicationData, data, &mut datagram)?;

        if let Err(e) = self.record_layer.send(peer, &[datagram]) {
            warn!("Delivery to {} failed: {}", peer, e);
        }
        Ok(())
    }

    /// Next application data received, with its sender.
    pub fn poll_application_data(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.received.pop_front()
    }

    /// The established session with `peer`, with its current epochs.
    pub fn session(&self, peer: SocketAddr) -> Option<Session> {
        self.associations.get(&peer).map(|a| a.session())
    }

    pub fn is_established(&self, peer: SocketAddr) -> bool {
        self.associations.contains_key(&peer)
    }

    /// The handshake in progress with `peer`.
    pub fn handshaker(&self, peer: SocketAddr) -> Option<&Handshaker> {
        self.handshakes.get(&peer)
    }

    pub fn correlation_context(&self, peer: SocketAddr) -> Option<CorrelationContext> {
        self.session(peer).map(|s| s.correlation_context())
    }

    /// Send close_notify and forget `peer`. A handshake in progress is
    /// aborted.
    pub fn close(&mut self, peer: SocketAddr) -> Result<(), Error> {
        let handshake = self.handshakes.remove(&peer);
        let had_handshake = handshake.is_some();
        if let Some(mut handshaker) = handshake {
            handshaker.abort();
            if let Some(assoc) = self.associations.get_mut(&peer) {
                assoc.reconcile(&handshaker);
            }
        }

        let Some(mut assoc) = self.associations.remove(&peer) else {
            if had_handshake {
                return Ok(());
            }
            return Err(Error::NotConnected(peer));
        };

        let mut fragment = Vec::with_capacity(Alert::LEN);
        Alert::close_notify().serialize(&mut fragment);
        let mut datagram = Vec::new();
        assoc
            .write
            .write_record(ContentType::Alert, &fragment, &mut datagram)?;

        debug!("Close association with {}", peer);
        if let Err(e) = self.record_layer.send(peer, &[datagram]) {
            debug!("close_notify to {} not delivered: {}", peer, e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("handshakes", &self.handshakes.len())
            .field("associations", &self.associations.len())
            .finish()
    }
}
