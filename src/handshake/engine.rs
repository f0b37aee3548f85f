use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use nom::IResult;

use crate::crypto::{KeyBlock, RecordCipher, AEAD_OVERHEAD};
use crate::event::{SessionEvent, SessionListener};
use crate::message::{parse_body, Fragment, Handshake, Header, MessageType, CHANGE_CIPHER_SPEC};
use crate::record::{pack_record, ReadState, Record, RecordLayer, WriteState};
use crate::timer::ExponentialBackoff;
use crate::types::{Alert, AlertDescription, ContentType, Random};
use crate::{Config, Error, HandshakeFailure, RecordError, SeededRng};

/// Messages further ahead than this are not buffered.
const MAX_MESSAGES_AHEAD: u16 = 16;

/// State shared by all four handshake roles.
///
/// The engine owns the records going out and coming in: it fragments and
/// packs outbound handshake messages into datagrams, keeps the current
/// flight for retransmission, reassembles inbound messages in message_seq
/// order, keeps the transcript and switches read/write epochs.
pub(crate) struct Engine {
    config: Arc<Config>,

    /// Seedable random number generator for deterministic testing
    pub(crate) rng: SeededRng,

    peer: SocketAddr,

    is_client: bool,

    record_layer: Arc<dyn RecordLayer>,

    listener: Arc<dyn SessionListener>,

    /// Epoch the handshake started in. 0, unless renegotiating over an
    /// established association.
    base_epoch: u16,

    /// Current outbound epoch.
    write: WriteState,

    /// The epoch before `write`. Needed to resend the part of a flight
    /// written before ChangeCipherSpec.
    write_previous: Option<WriteState>,

    /// Keys derived for the next epoch, not yet switched to.
    write_pending: Option<WriteState>,

    /// Current inbound epoch.
    read: ReadState,

    /// The epoch before `read`, for duplicates of the peer's flight.
    read_previous: Option<ReadState>,

    /// Keys derived for the peer's next epoch. Activated once the peer's
    /// ChangeCipherSpec arrived.
    read_pending: Option<ReadState>,

    /// ChangeCipherSpec received, waiting for keys.
    pending_ccs: bool,

    /// Records of the next epoch received before it was activated.
    deferred: Vec<Record>,

    /// Next handshake message_seq we send.
    next_send_seq: u16,

    /// Next handshake message_seq we expect from the peer.
    next_receive_seq: u16,

    /// message_seq of the last message of the peer's previous flight. A
    /// retransmission of it means our current flight got lost.
    resend_trigger: Option<u16>,

    reassembly: BTreeMap<u16, Reassembly>,

    /// Handshake messages in transcript form.
    transcript: Vec<u8>,

    /// The records that have been sent in the current flight.
    flight_entries: Vec<FlightEntry>,

    /// Datagrams not yet handed to the record layer.
    outgoing: Vec<Vec<u8>>,

    /// Flight backoff
    flight_backoff: ExponentialBackoff,

    /// Timeout for the current flight
    flight_timeout: Timeout,

    /// Global timeout for the entire handshake.
    connect_timeout: Timeout,

    /// Whether the last flight is kept after completion.
    retain_flight: bool,

    /// The last now we've seen
    now: Option<Instant>,

    started: bool,

    record_failures: usize,

    key_derivations: usize,

    /// Terminal error, once aborted.
    failure: Option<Error>,

    outcome_reported: bool,

    /// Events queued during a transition.
    events: VecDeque<SessionEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Disabled,
    Unarmed,
    Armed(Instant),
}

/// One record of a flight, kept in plaintext for retransmission.
#[derive(Debug, Clone)]
pub(crate) struct FlightEntry {
    content_type: ContentType,
    epoch: u16,
    fragment: Vec<u8>,
}

/// A final flight kept by an established association.
///
/// The peer only learns that our last flight arrived by not retransmitting
/// its own. Until then, every retransmission of the peer's flight is
/// answered by resending this one.
#[derive(Debug, Clone)]
pub(crate) struct RetainedFlight {
    entries: Vec<FlightEntry>,
    write_previous: Option<WriteState>,
}

impl RetainedFlight {
    /// Re-wrap the flight with fresh sequence numbers. `current` is the
    /// association's write state.
    pub(crate) fn resend(
        &mut self,
        current: &mut WriteState,
        mtu: usize,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let mut datagrams = Vec::new();
        for entry in &self.entries {
            let state = if entry.epoch == current.epoch() {
                &mut *current
            } else {
                match self.write_previous.as_mut() {
                    Some(p) if p.epoch() == entry.epoch => p,
                    _ => {
                        return Err(Error::InvalidState(format!(
                            "no write state for epoch {}",
                            entry.epoch
                        )))
                    }
                }
            };
            pack_record(&mut datagrams, mtu, state, entry.content_type, &entry.fragment)?;
        }
        Ok(datagrams)
    }
}

/// Result of a completed handshake, handed to the association.
pub(crate) struct Completion {
    pub session: crate::Session,
    pub read_previous: Option<ReadState>,
    pub retained: Option<RetainedFlight>,
}

/// A handshake message being reassembled from fragments.
struct Reassembly {
    msg_type: MessageType,
    epoch: u16,
    body: Vec<u8>,
    /// Sorted, non-overlapping ranges received so far.
    covered: Vec<(usize, usize)>,
}

impl Reassembly {
    fn new(msg_type: MessageType, length: usize, epoch: u16) -> Self {
        Reassembly {
            msg_type,
            epoch,
            body: vec![0; length],
            covered: Vec::new(),
        }
    }

    fn length(&self) -> usize {
        self.body.len()
    }

    fn insert(&mut self, offset: usize, data: &[u8]) {
        let end = offset + data.len();
        self.body[offset..end].copy_from_slice(data);

        self.covered.push((offset, end));
        self.covered.sort_unstable();

        let mut merged: Vec<(usize, usize)> = Vec::with_capacity(self.covered.len());
        for (start, end) in self.covered.drain(..) {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.covered = merged;
    }

    fn is_complete(&self) -> bool {
        self.length() == 0 || self.covered.first() == Some(&(0, self.length()))
    }
}

/// Everything an engine needs from the handshake parameters.
pub(crate) struct EngineParams {
    pub config: Arc<Config>,
    pub peer: SocketAddr,
    pub is_client: bool,
    pub record_layer: Arc<dyn RecordLayer>,
    pub listener: Arc<dyn SessionListener>,
    pub states: Option<(ReadState, WriteState)>,
    pub initial_message_sequence: u16,
    pub initial_record_sequence: u64,
}

impl Engine {
    pub fn new(params: EngineParams) -> Self {
        let config = params.config;
        let rng = SeededRng::new(config.rng_seed());

        let flight_backoff = ExponentialBackoff::new(
            config.flight_start_rto(),
            config.flight_max_rto(),
            config.flight_retries(),
        );

        let (read, write) = match params.states {
            Some(states) => states,
            None => (
                ReadState::plaintext(0),
                WriteState::plaintext(0, params.initial_record_sequence),
            ),
        };

        Engine {
            config,
            rng,
            peer: params.peer,
            is_client: params.is_client,
            record_layer: params.record_layer,
            listener: params.listener,
            base_epoch: write.epoch(),
            write,
            write_previous: None,
            write_pending: None,
            read,
            read_previous: None,
            read_pending: None,
            pending_ccs: false,
            deferred: Vec::new(),
            next_send_seq: params.initial_message_sequence,
            next_receive_seq: params.initial_message_sequence,
            resend_trigger: None,
            reassembly: BTreeMap::new(),
            transcript: Vec::new(),
            flight_entries: Vec::new(),
            outgoing: Vec::new(),
            flight_backoff,
            flight_timeout: Timeout::Unarmed,
            connect_timeout: Timeout::Unarmed,
            retain_flight: false,
            now: None,
            started: false,
            record_failures: 0,
            key_derivations: 0,
            failure: None,
            outcome_reported: false,
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn listener(&self) -> Arc<dyn SessionListener> {
        Arc::clone(&self.listener)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    pub fn key_derivations(&self) -> usize {
        self.key_derivations
    }

    #[cfg(test)]
    pub fn read_epoch(&self) -> u16 {
        self.read.epoch()
    }

    #[cfg(test)]
    pub fn write_epoch(&self) -> u16 {
        self.write.epoch()
    }

    /// Arm the handshake timeout and announce the start.
    pub fn start(&mut self, now: Instant) {
        self.started = true;
        self.now = Some(now);
        debug!(
            "Handshake timeout for {} in: {:.03}s",
            self.peer,
            self.config.handshake_timeout().as_secs_f32()
        );
        self.connect_timeout = Timeout::Armed(now + self.config.handshake_timeout());
        self.events.push_back(SessionEvent::HandshakeStarted);
    }

    pub fn set_now(&mut self, now: Instant) {
        self.now = Some(now);
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// Queue the success event, once.
    pub fn report_established(&mut self, session: &crate::Session) {
        if mem::replace(&mut self.outcome_reported, true) {
            return;
        }
        self.events
            .push_back(SessionEvent::SessionEstablished(session.clone()));
    }

    /// Terminate the handshake. Sends the alert the error carries, if any,
    /// protected when the current write epoch has keys.
    pub fn abort(&mut self, error: &Error) {
        if self.failure.is_some() {
            return;
        }
        warn!("Handshake with {} aborted: {}", self.peer, error);

        if let Some(alert) = error.alert() {
            if let Err(e) = self.send_alert(alert) {
                debug!("Failed to send alert to {}: {}", self.peer, e);
            }
        }

        self.flight_stop_resend_timers();
        self.flight_entries.clear();
        self.reassembly.clear();
        self.deferred.clear();
        self.failure = Some(error.clone());

        if !mem::replace(&mut self.outcome_reported, true) {
            self.events
                .push_back(SessionEvent::HandshakeFailed(error.clone()));
        }
    }

    fn send_alert(&mut self, alert: Alert) -> Result<(), Error> {
        let mut fragment = Vec::with_capacity(Alert::LEN);
        alert.serialize(&mut fragment);

        let mut datagram = Vec::new();
        self.write
            .write_record(ContentType::Alert, &fragment, &mut datagram)?;

        debug!(
            "Send alert {} to {} (epoch {})",
            alert,
            self.peer,
            self.write.epoch()
        );
        if let Err(e) = self.record_layer.send(self.peer, &[datagram]) {
            debug!("Alert to {} not delivered: {}", self.peer, e);
        }
        Ok(())
    }

    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        self.now = Some(now);

        // The connect timeout is the overall timeout for the handshake
        if let Timeout::Armed(connect_timeout) = self.connect_timeout {
            if now >= connect_timeout {
                return Err(Error::Timeout("handshake"));
            }
        }

        let Timeout::Armed(flight_timeout) = self.flight_timeout else {
            return Ok(());
        };

        if now >= flight_timeout {
            if !self.flight_backoff.can_retry() {
                return Err(Error::Timeout("flight"));
            }
            self.flight_backoff.attempt();
            debug!(
                "Re-arm flight timeout due to resend in {:.03}s",
                self.flight_backoff.rto().as_secs_f32()
            );
            self.flight_timeout = Timeout::Armed(now + self.flight_backoff.rto());
            self.flight_resend("flight timeout")?;
        }

        Ok(())
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        match (self.connect_timeout, self.flight_timeout) {
            (Timeout::Armed(c), Timeout::Armed(f)) => Some(c.min(f)),
            (Timeout::Armed(c), _) => Some(c),
            (_, Timeout::Armed(f)) => Some(f),
            _ => None,
        }
    }

    pub fn flight_begin(&mut self, flight_no: u8) {
        debug!("Begin flight {} to {}", flight_no, self.peer);
        self.flight_backoff.reset();
        self.flight_entries.clear();
        self.flight_timeout = Timeout::Unarmed;
        self.resend_trigger = self.next_receive_seq.checked_sub(1);
    }

    pub fn flight_stop_resend_timers(&mut self) {
        debug!("Stop handshake and flight timeouts");
        self.flight_timeout = Timeout::Disabled;
        self.connect_timeout = Timeout::Disabled;
    }

    /// The current flight ends the handshake. No timer; it is retained for
    /// the association instead.
    pub fn flight_final(&mut self) {
        self.flight_stop_resend_timers();
        self.retain_flight = true;
    }

    /// Resend the current flight. Message contents are repeated verbatim, but
    /// every record gets a fresh sequence number (RFC 6347 §4.2.4).
    fn flight_resend(&mut self, reason: &str) -> Result<(), Error> {
        if self.flight_entries.is_empty() {
            return Ok(());
        }
        debug!("Resending flight to {} due to {}", self.peer, reason);

        // For lifetime issues, we take the entries out of self
        let entries = mem::take(&mut self.flight_entries);
        let result = entries
            .iter()
            .try_for_each(|e| self.push_record(e.epoch, e.content_type, &e.fragment));
        self.flight_entries = entries;
        result?;

        self.flush();
        Ok(())
    }

    fn push_record(
        &mut self,
        epoch: u16,
        content_type: ContentType,
        fragment: &[u8],
    ) -> Result<(), Error> {
        let mtu = self.config.mtu();
        let state = if epoch == self.write.epoch() {
            &mut self.write
        } else {
            match self.write_previous.as_mut() {
                Some(p) if p.epoch() == epoch => p,
                _ => {
                    return Err(Error::InvalidState(format!(
                        "no write state for epoch {}",
                        epoch
                    )))
                }
            }
        };
        pack_record(&mut self.outgoing, mtu, state, content_type, fragment)
    }

    /// Write a record in the current epoch and keep it in the flight.
    fn create_record(&mut self, content_type: ContentType, fragment: Vec<u8>) -> Result<(), Error> {
        let epoch = self.write.epoch();
        self.push_record(epoch, content_type, &fragment)?;
        self.flight_entries.push(FlightEntry {
            content_type,
            epoch,
            fragment,
        });
        Ok(())
    }

    /// Append a handshake message to the transcript and the current flight,
    /// fragmented to fit the MTU.
    pub fn create_handshake(&mut self, msg_type: MessageType, body: &[u8]) -> Result<(), Error> {
        let message_seq = self.next_send_seq;
        self.next_send_seq = message_seq
            .checked_add(1)
            .ok_or_else(|| Error::InvalidState("message_seq exhausted".into()))?;

        self.transcript
            .extend_from_slice(&Handshake::transcript_bytes(msg_type, message_seq, body));

        let mtu = self.config.mtu();
        let aead_overhead = if self.write.is_protected() {
            AEAD_OVERHEAD
        } else {
            0
        };
        let fixed_overhead = Record::HEADER_LEN + Header::LEN + aead_overhead;

        let total_len = body.len();
        let mut offset = 0;

        // At least one record even for an empty body
        loop {
            let used = self.outgoing.last().map(|d| d.len()).unwrap_or(0);
            let available_in_current = mtu.saturating_sub(used);

            let available_for_body = if available_in_current > fixed_overhead {
                available_in_current - fixed_overhead
            } else {
                mtu.saturating_sub(fixed_overhead)
            };

            let chunk_len = (total_len - offset).min(available_for_body.max(1));

            let mut fragment = Vec::with_capacity(Header::LEN + chunk_len);
            Header {
                msg_type,
                length: total_len as u32,
                message_seq,
                fragment_offset: offset as u32,
                fragment_length: chunk_len as u32,
            }
            .serialize(&mut fragment);
            fragment.extend_from_slice(&body[offset..offset + chunk_len]);

            self.create_record(ContentType::Handshake, fragment)?;

            offset += chunk_len;
            if offset >= total_len {
                break;
            }
        }

        trace!(
            "Queued {:?} seq {} ({} bytes) to {}",
            msg_type,
            message_seq,
            total_len,
            self.peer
        );
        Ok(())
    }

    /// Write ChangeCipherSpec and switch to the next write epoch.
    pub fn create_change_cipher_spec(&mut self) -> Result<(), Error> {
        let Some(pending) = self.write_pending.take() else {
            return Err(Error::InvalidState(
                "ChangeCipherSpec without keys for the next epoch".into(),
            ));
        };

        self.create_record(ContentType::ChangeCipherSpec, CHANGE_CIPHER_SPEC.to_vec())?;

        debug!("Switch write epoch to {} for {}", pending.epoch(), self.peer);
        self.write_previous = Some(mem::replace(&mut self.write, pending));
        Ok(())
    }

    /// Hand the queued datagrams to the record layer and arm the flight
    /// timer.
    pub fn flush(&mut self) {
        if self.outgoing.is_empty() {
            return;
        }
        let datagrams = mem::take(&mut self.outgoing);

        if let Err(e) = self.record_layer.send(self.peer, &datagrams) {
            warn!("Delivery to {} failed: {}", self.peer, e);
        }

        if self.flight_timeout == Timeout::Unarmed {
            if let Some(now) = self.now {
                debug!(
                    "Flight timeout in: {:.03}s",
                    self.flight_backoff.rto().as_secs_f32()
                );
                self.flight_timeout = Timeout::Armed(now + self.flight_backoff.rto());
            }
        }
    }

    /// Derive record keys for the next epoch. Once per handshake.
    pub fn derive_keys(
        &mut self,
        master_secret: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<(), Error> {
        if self.key_derivations > 0 {
            return Err(Error::KeyDerivation(
                "record keys already derived for this handshake".into(),
            ));
        }

        let epoch = self
            .base_epoch
            .checked_add(1)
            .ok_or_else(|| Error::Crypto("epochs exhausted".into()))?;

        let block = KeyBlock::derive(master_secret, client_random, server_random)
            .map_err(Error::KeyDerivation)?;

        let (write_key, write_iv, read_key, read_iv) = if self.is_client {
            (
                &block.client_write_key,
                block.client_write_iv,
                &block.server_write_key,
                block.server_write_iv,
            )
        } else {
            (
                &block.server_write_key,
                block.server_write_iv,
                &block.client_write_key,
                block.client_write_iv,
            )
        };

        let write = RecordCipher::new(write_key, write_iv).map_err(Error::KeyDerivation)?;
        let read = RecordCipher::new(read_key, read_iv).map_err(Error::KeyDerivation)?;

        self.write_pending = Some(WriteState::protected(epoch, write));
        self.read_pending = Some(ReadState::protected(epoch, read));
        self.key_derivations += 1;
        debug!("Derived keys for epoch {} with {}", epoch, self.peer);

        self.try_activate_read()
    }

    /// True once the peer's ChangeCipherSpec switched the read epoch.
    pub fn is_peer_encryption_enabled(&self) -> bool {
        self.read.epoch() != self.base_epoch
    }

    fn try_activate_read(&mut self) -> Result<(), Error> {
        if !self.pending_ccs {
            return Ok(());
        }
        let Some(pending) = self.read_pending.take() else {
            return Ok(());
        };
        self.pending_ccs = false;

        debug!("Peer {} switched to epoch {}", self.peer, pending.epoch());
        self.read_previous = Some(mem::replace(&mut self.read, pending));

        for record in mem::take(&mut self.deferred) {
            self.handle_record(record)?;
        }
        Ok(())
    }

    /// Process one received record. Returns an error only when the handshake
    /// must be aborted.
    pub fn handle_record(&mut self, record: Record) -> Result<(), Error> {
        let epoch = record.epoch;
        let is_current = epoch == self.read.epoch();

        let state = if is_current {
            Some(&mut self.read)
        } else {
            self.read_previous.as_mut().filter(|s| s.epoch() == epoch)
        };

        let Some(state) = state else {
            if Some(epoch) == self.read.epoch().checked_add(1) {
                if self.deferred.len() >= self.config.max_queue_rx() {
                    debug!(
                        "Drop record of future epoch {} from {}: queue full (max {})",
                        epoch,
                        self.peer,
                        self.config.max_queue_rx()
                    );
                } else {
                    trace!("Defer record of epoch {} from {}", epoch, self.peer);
                    self.deferred.push(record);
                }
            } else {
                trace!("Drop record of unknown epoch {} from {}", epoch, self.peer);
            }
            return Ok(());
        };

        match state.open(&record) {
            Ok(None) => Ok(()),
            Ok(Some(plaintext)) => self.handle_plaintext(&record, plaintext, is_current),
            Err(e) => self.record_failure(e),
        }
    }

    fn handle_plaintext(
        &mut self,
        record: &Record,
        plaintext: Vec<u8>,
        is_current: bool,
    ) -> Result<(), Error> {
        match record.content_type {
            ContentType::Handshake => {
                let fragments = match Fragment::parse_all(&plaintext) {
                    Ok(f) => f,
                    Err(msg) => {
                        let e = RecordError::parsing(self.peer, Some(ContentType::Handshake), msg);
                        return self.record_failure(e);
                    }
                };
                for fragment in fragments {
                    self.insert_fragment(fragment, record.epoch)?;
                }
                Ok(())
            }
            ContentType::ChangeCipherSpec => {
                if plaintext != CHANGE_CIPHER_SPEC {
                    let e = RecordError::parsing(
                        self.peer,
                        Some(ContentType::ChangeCipherSpec),
                        "malformed ChangeCipherSpec",
                    );
                    return self.record_failure(e);
                }
                if !is_current {
                    trace!("Ignore ChangeCipherSpec of previous epoch from {}", self.peer);
                    return Ok(());
                }
                trace!("ChangeCipherSpec from {}", self.peer);
                self.pending_ccs = true;
                self.try_activate_read()
            }
            ContentType::Alert => {
                let alert = match Alert::parse(&plaintext) {
                    Ok((rest, alert)) if rest.is_empty() => alert,
                    _ => {
                        let e = RecordError::parsing(
                            self.peer,
                            Some(ContentType::Alert),
                            "malformed alert",
                        );
                        return self.record_failure(e);
                    }
                };
                if alert.is_fatal() || alert.description == AlertDescription::CloseNotify {
                    return Err(Error::PeerAlert {
                        peer: self.peer,
                        alert,
                    });
                }
                debug!("Ignore warning alert from {}: {}", self.peer, alert);
                Ok(())
            }
            ContentType::ApplicationData => {
                debug!(
                    "Drop application data from {} during handshake",
                    self.peer
                );
                Ok(())
            }
        }
    }

    fn insert_fragment(&mut self, fragment: Fragment, epoch: u16) -> Result<(), Error> {
        let header = fragment.header;

        if header.message_seq < self.next_receive_seq {
            if Some(header.message_seq) == self.resend_trigger && header.fragment_offset == 0 {
                self.flight_resend("peer retransmitted its flight")?;
            } else {
                trace!(
                    "Drop duplicate {:?} seq {} from {}",
                    header.msg_type,
                    header.message_seq,
                    self.peer
                );
            }
            return Ok(());
        }

        if header.message_seq - self.next_receive_seq > MAX_MESSAGES_AHEAD {
            trace!(
                "Drop {:?} seq {} from {}: too far ahead",
                header.msg_type,
                header.message_seq,
                self.peer
            );
            return Ok(());
        }

        let length = header.length as usize;
        if length > self.config.max_fragmented_size() {
            let e = RecordError::parsing(
                self.peer,
                Some(ContentType::Handshake),
                format!(
                    "{:?} of {} bytes exceeds {}",
                    header.msg_type,
                    length,
                    self.config.max_fragmented_size()
                ),
            );
            return self.record_failure(e);
        }

        let entry = self
            .reassembly
            .entry(header.message_seq)
            .or_insert_with(|| Reassembly::new(header.msg_type, length, epoch));

        if entry.msg_type != header.msg_type || entry.length() != length || entry.epoch != epoch {
            let e = RecordError::parsing(
                self.peer,
                Some(ContentType::Handshake),
                format!(
                    "fragment of {:?} seq {} inconsistent with earlier fragments",
                    header.msg_type, header.message_seq
                ),
            );
            return self.record_failure(e);
        }

        entry.insert(header.fragment_offset as usize, &fragment.body);
        Ok(())
    }

    /// Count a discarded record. Aborts when the threshold is reached.
    pub fn record_failure(&mut self, error: RecordError) -> Result<(), Error> {
        warn!("Discard record: {}", error);
        self.record_failures += 1;
        self.events
            .push_back(SessionEvent::RecordDiscarded(error.clone()));

        if self.record_failures >= self.config.max_record_failures() {
            return Err(Error::Record(error));
        }
        Ok(())
    }

    /// Type of the next complete message, if there is one.
    pub fn peek_message_type(&self) -> Option<MessageType> {
        self.reassembly
            .get(&self.next_receive_seq)
            .filter(|r| r.is_complete())
            .map(|r| r.msg_type)
    }

    /// Take the next complete message, provided it is one of `wanted`.
    ///
    /// Any other message type is an unexpected message. Finished must arrive
    /// in the epoch after the handshake's base epoch, everything else in the
    /// base epoch.
    pub fn next_handshake(&mut self, wanted: &[MessageType]) -> Result<Option<Handshake>, Error> {
        if self.peek_message_type().is_none() {
            return Ok(None);
        }

        let message_seq = self.next_receive_seq;
        let Some(entry) = self.reassembly.remove(&message_seq) else {
            return Ok(None);
        };

        if !wanted.contains(&entry.msg_type) {
            return Err(HandshakeFailure::fatal(
                self.peer,
                AlertDescription::UnexpectedMessage,
                format!("expected {:?}, got {:?}", wanted, entry.msg_type),
            )
            .into());
        }

        let expected_epoch = if entry.msg_type == MessageType::Finished {
            self.base_epoch.wrapping_add(1)
        } else {
            self.base_epoch
        };
        if entry.epoch != expected_epoch {
            return Err(HandshakeFailure::fatal(
                self.peer,
                AlertDescription::UnexpectedMessage,
                format!("{:?} received in epoch {}", entry.msg_type, entry.epoch),
            )
            .into());
        }

        let transcript_offset = self.transcript.len();
        self.transcript.extend_from_slice(&Handshake::transcript_bytes(
            entry.msg_type,
            message_seq,
            &entry.body,
        ));
        self.next_receive_seq += 1;

        trace!(
            "Received {:?} seq {} from {}",
            entry.msg_type,
            message_seq,
            self.peer
        );

        Ok(Some(Handshake {
            msg_type: entry.msg_type,
            message_seq,
            body: entry.body,
            transcript_offset,
        }))
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    /// Restart the transcript. The cookie-less ClientHello and the
    /// HelloVerifyRequest are not part of it.
    pub fn reset_transcript(&mut self) {
        self.transcript.clear();
    }

    /// Parse the body of a complete handshake message. Malformed bodies are
    /// a "decode error".
    pub fn decode<'a, T, F>(&self, handshake: &'a Handshake, parser: F) -> Result<T, Error>
    where
        F: FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
    {
        parse_body(&handshake.body, parser).map_err(|e| self.decode_error(handshake.msg_type, e))
    }

    /// A parse failure of a complete handshake body.
    pub fn decode_error(&self, msg_type: MessageType, reason: String) -> Error {
        HandshakeFailure::fatal(
            self.peer,
            AlertDescription::DecodeError,
            format!("malformed {:?}: {}", msg_type, reason),
        )
        .into()
    }

    pub fn failure_with(&self, description: AlertDescription, message: impl Into<String>) -> Error {
        HandshakeFailure::fatal(self.peer, description, message).into()
    }

    /// Hand over the connection state of the completed handshake.
    pub fn into_completion(self, mut session: crate::Session) -> Completion {
        session.set_states(self.read, self.write);
        let retained = self.retain_flight.then(|| RetainedFlight {
            entries: self.flight_entries,
            write_previous: self.write_previous,
        });
        Completion {
            session,
            read_previous: self.read_previous,
            retained,
        }
    }

    /// Connection state of the epoch the handshake started in, if still held.
    pub fn base_states(&self) -> (Option<&ReadState>, Option<&WriteState>) {
        let base = self.base_epoch;
        let read = Some(&self.read)
            .filter(|s| s.epoch() == base)
            .or_else(|| self.read_previous.as_ref().filter(|s| s.epoch() == base));
        let write = Some(&self.write)
            .filter(|s| s.epoch() == base)
            .or_else(|| self.write_previous.as_ref().filter(|s| s.epoch() == base));
        (read, write)
    }

    /// Copy of the connection state, for reporting the session.
    pub fn current_states(&self) -> (ReadState, WriteState) {
        (self.read.clone(), self.write.clone())
    }

    #[cfg(test)]
    pub fn flight_len(&self) -> usize {
        self.flight_entries.len()
    }
}
