//! Negotiated security parameters of one peer, and the cache that keeps them
//! around for resumption.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;

use parking_lot::Mutex;
use zeroize::Zeroizing;

use crate::correlation::CorrelationContext;
use crate::credentials::PeerIdentity;
use crate::record::{ReadState, WriteState};
use crate::types::{CipherSuite, CompressionMethod, SessionId};

/// Security parameters negotiated with one peer.
///
/// A fresh handshake starts from an empty session that is filled in as the
/// handshake progresses. The caller only ever sees it once the handshake
/// completed. The read and write states carry the current epoch and its
/// sequence numbers; [`Session::resumable`] strips them to produce a
/// cacheable ticket.
#[derive(Clone)]
pub struct Session {
    peer: SocketAddr,
    id: SessionId,
    cipher_suite: Option<CipherSuite>,
    compression: CompressionMethod,
    master_secret: Option<Zeroizing<Vec<u8>>>,
    peer_identity: Option<PeerIdentity>,
    read_state: Option<ReadState>,
    write_state: Option<WriteState>,
}

impl Session {
    /// An empty session for a fresh handshake with `peer`.
    pub fn new(peer: SocketAddr) -> Self {
        Session {
            peer,
            id: SessionId::empty(),
            cipher_suite: None,
            compression: CompressionMethod::Null,
            master_secret: None,
            peer_identity: None,
            read_state: None,
            write_state: None,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    pub fn master_secret(&self) -> Option<&[u8]> {
        self.master_secret.as_ref().map(|m| m.as_slice())
    }

    pub fn peer_identity(&self) -> Option<&PeerIdentity> {
        self.peer_identity.as_ref()
    }

    /// Epoch of the current read state, if the session carries one.
    pub fn read_epoch(&self) -> Option<u16> {
        self.read_state.as_ref().map(|s| s.epoch())
    }

    /// Epoch of the current write state, if the session carries one.
    pub fn write_epoch(&self) -> Option<u16> {
        self.write_state.as_ref().map(|s| s.epoch())
    }

    /// Sequence number of the next record written in the current epoch.
    pub fn write_sequence(&self) -> Option<u64> {
        self.write_state.as_ref().map(|s| s.next_sequence())
    }

    /// True when the session has what an abbreviated handshake needs.
    pub fn is_resumable(&self) -> bool {
        !self.id.is_empty() && self.master_secret.is_some() && self.cipher_suite.is_some()
    }

    /// Copy without connection state, suitable for a session cache.
    pub fn resumable(&self) -> Session {
        Session {
            read_state: None,
            write_state: None,
            ..self.clone()
        }
    }

    /// Same session, bound to another peer address.
    pub fn with_peer(mut self, peer: SocketAddr) -> Session {
        self.peer = peer;
        self
    }

    /// Correlation context describing the secure datagram channel this
    /// session protects.
    pub fn correlation_context(&self) -> CorrelationContext {
        CorrelationContext::secure_datagram(
            &self.id,
            self.read_epoch(),
            self.write_epoch(),
            self.cipher_suite,
        )
    }

    pub(crate) fn set_id(&mut self, id: SessionId) {
        self.id = id;
    }

    pub(crate) fn set_cipher_suite(&mut self, suite: CipherSuite) {
        self.cipher_suite = Some(suite);
    }

    pub(crate) fn set_compression(&mut self, compression: CompressionMethod) {
        self.compression = compression;
    }

    pub(crate) fn set_master_secret(&mut self, master_secret: Zeroizing<Vec<u8>>) {
        self.master_secret = Some(master_secret);
    }

    pub(crate) fn set_peer_identity(&mut self, identity: PeerIdentity) {
        self.peer_identity = Some(identity);
    }

    pub(crate) fn set_states(&mut self, read: ReadState, write: WriteState) {
        self.read_state = Some(read);
        self.write_state = Some(write);
    }

    pub(crate) fn take_states(&mut self) -> Option<(ReadState, WriteState)> {
        match (self.read_state.take(), self.write_state.take()) {
            (Some(r), Some(w)) => Some((r, w)),
            _ => None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("id", &self.id)
            .field("cipher_suite", &self.cipher_suite)
            .field("peer_identity", &self.peer_identity)
            .field("read_epoch", &self.read_epoch())
            .field("write_epoch", &self.write_epoch())
            .finish_non_exhaustive()
    }
}

/// Storage of resumable sessions, keyed by session id.
pub trait SessionCache: Send + Sync {
    fn put(&self, session: &Session);

    fn get(&self, id: &SessionId) -> Option<Session>;

    fn remove(&self, id: &SessionId);
}

/// Bounded in-memory [`SessionCache`]. The oldest entry is evicted first.
pub struct InMemorySessionCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    sessions: HashMap<SessionId, Session>,
    order: VecDeque<SessionId>,
}

impl InMemorySessionCache {
    pub fn new(capacity: usize) -> Self {
        InMemorySessionCache {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemorySessionCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl SessionCache for InMemorySessionCache {
    fn put(&self, session: &Session) {
        if !session.is_resumable() {
            trace!("Not caching session without id or master secret");
            return;
        }

        let mut inner = self.inner.lock();
        let id = session.id().clone();

        if inner.sessions.insert(id.clone(), session.resumable()).is_none() {
            inner.order.push_back(id);
        }

        while inner.sessions.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            debug!("Evict session {} from cache", oldest);
            inner.sessions.remove(&oldest);
        }
    }

    fn get(&self, id: &SessionId) -> Option<Session> {
        self.inner.lock().sessions.get(id).cloned()
    }

    fn remove(&self, id: &SessionId) {
        let mut inner = self.inner.lock();
        if inner.sessions.remove(id).is_some() {
            inner.order.retain(|i| i != id);
        }
    }
}
