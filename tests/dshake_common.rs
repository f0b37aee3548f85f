//! Shared helpers for the integration tests.
//!
//! This file has no `#[test]` functions; Cargo compiles it as a no-op binary.
//! Import it from other test files via `mod dshake_common;`.

#![allow(unused)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dshake::types::CipherSuite;
use dshake::{
    generate_self_signed_certificate, Config, DeliveryError, Endpoint, Error, InMemorySessionCache,
    PinnedCertificates, RecordError, RecordLayer, Session, SessionCache, SessionEvent,
    SessionListener, StaticPskStore,
};
use parking_lot::Mutex;

/// Parsed DTLS 1.2 record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecHdr {
    pub ctype: u8,
    pub epoch: u16,
    pub seq: u64,
}

/// Content types (RFC 6347).
pub const CHANGE_CIPHER_SPEC: u8 = 20;
pub const ALERT: u8 = 21;
pub const HANDSHAKE: u8 = 22;
pub const APPLICATION_DATA: u8 = 23;

/// Handshake message types (RFC 5246 / 6347).
pub const CLIENT_HELLO: u8 = 1;
pub const SERVER_HELLO: u8 = 2;
pub const HELLO_VERIFY_REQUEST: u8 = 3;
pub const CERTIFICATE: u8 = 11;
pub const SERVER_KEY_EXCHANGE: u8 = 12;
pub const CERTIFICATE_REQUEST: u8 = 13;
pub const SERVER_HELLO_DONE: u8 = 14;
pub const CLIENT_KEY_EXCHANGE: u8 = 16;

/// Parse DTLS 1.2 record headers from a datagram.
pub fn parse_records(datagram: &[u8]) -> Vec<RecHdr> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let mut seq_bytes = [0u8; 8];
        seq_bytes[2..].copy_from_slice(&datagram[i + 5..i + 11]);
        let seq = u64::from_be_bytes(seq_bytes);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        out.push(RecHdr { ctype, epoch, seq });
        i += 13 + len;
    }
    out
}

/// Collect record headers from a slice of datagrams.
pub fn collect_headers(datagrams: &[Vec<u8>]) -> Vec<RecHdr> {
    datagrams.iter().flat_map(|d| parse_records(d)).collect()
}

/// Handshake message types of the plaintext (epoch 0) handshake records of
/// a datagram.
pub fn parse_handshake_types(datagram: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i + 13 <= datagram.len() {
        let ctype = datagram[i];
        let epoch = u16::from_be_bytes([datagram[i + 3], datagram[i + 4]]);
        let len = u16::from_be_bytes([datagram[i + 11], datagram[i + 12]]) as usize;
        let end = (i + 13 + len).min(datagram.len());
        if ctype == HANDSHAKE && epoch == 0 {
            let mut j = i + 13;
            while j + 12 <= end {
                out.push(datagram[j]);
                let frag_len = u32::from_be_bytes([
                    0,
                    datagram[j + 9],
                    datagram[j + 10],
                    datagram[j + 11],
                ]) as usize;
                j += 12 + frag_len;
            }
        }
        i = end;
    }
    out
}

/// Handshake types of every datagram, flattened.
pub fn handshake_types(datagrams: &[Vec<u8>]) -> Vec<u8> {
    datagrams
        .iter()
        .flat_map(|d| parse_handshake_types(d))
        .collect()
}

/// Assert that records of each epoch have strictly increasing sequence
/// numbers across the given headers.
pub fn assert_epochs_and_seq_increased(headers: &[RecHdr]) {
    let mut last: std::collections::HashMap<u16, u64> = std::collections::HashMap::new();
    for h in headers {
        if let Some(prev) = last.get(&h.epoch) {
            assert!(
                h.seq > *prev,
                "sequence number did not increase in epoch {}: {} after {}",
                h.epoch,
                h.seq,
                prev
            );
        }
        last.insert(h.epoch, h.seq);
    }
}

/// Record layer capturing every datagram sent.
#[derive(Default)]
pub struct Wire(Mutex<Vec<(SocketAddr, Vec<u8>)>>);

impl Wire {
    pub fn take(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn take_datagrams(&self) -> Vec<Vec<u8>> {
        self.take().into_iter().map(|(_, d)| d).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

impl RecordLayer for Wire {
    fn send(&self, peer: SocketAddr, datagrams: &[Vec<u8>]) -> Result<(), DeliveryError> {
        let mut sent = self.0.lock();
        for d in datagrams {
            sent.push((peer, d.clone()));
        }
        Ok(())
    }
}

/// Listener recording every event.
#[derive(Default)]
pub struct Events(Mutex<Vec<SessionEvent>>);

impl Events {
    pub fn all(&self) -> Vec<SessionEvent> {
        self.0.lock().clone()
    }

    pub fn started(&self) -> usize {
        self.count(|e| matches!(e, SessionEvent::HandshakeStarted))
    }

    pub fn established(&self) -> Vec<Session> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::SessionEstablished(s) => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<Error> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::HandshakeFailed(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn discarded(&self) -> Vec<RecordError> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::RecordDiscarded(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, f: impl Fn(&SessionEvent) -> bool) -> usize {
        self.0.lock().iter().filter(|e| f(e)).count()
    }
}

impl SessionListener for Events {
    fn on_handshake_started(&self) {
        self.0.lock().push(SessionEvent::HandshakeStarted);
    }

    fn on_session_established(&self, session: &Session) {
        self.0
            .lock()
            .push(SessionEvent::SessionEstablished(session.clone()));
    }

    fn on_handshake_failed(&self, error: &Error) {
        self.0.lock().push(SessionEvent::HandshakeFailed(error.clone()));
    }

    fn on_record_discarded(&self, error: &RecordError) {
        self.0.lock().push(SessionEvent::RecordDiscarded(error.clone()));
    }
}

/// An endpoint with its captured output and events.
pub struct Peer {
    pub addr: SocketAddr,
    pub endpoint: Endpoint,
    pub wire: Arc<Wire>,
    pub events: Arc<Events>,
}

impl Peer {
    pub fn new(addr: &str, config: Config) -> Self {
        Self::with_cache(addr, config, Arc::new(InMemorySessionCache::default()))
    }

    /// A peer whose endpoint keeps its sessions in `cache`.
    pub fn with_cache(addr: &str, config: Config, cache: Arc<dyn SessionCache>) -> Self {
        let wire = Arc::new(Wire::default());
        let events = Arc::new(Events::default());
        let endpoint = Endpoint::new(Arc::new(config), wire.clone(), events.clone())
            .with_session_cache(cache);
        Peer {
            addr: addr.parse().expect("peer address"),
            endpoint,
            wire,
            events,
        }
    }

    pub fn client(config: Config) -> Self {
        Self::new("192.0.2.10:40001", config)
    }

    pub fn server(config: Config) -> Self {
        Self::new("192.0.2.1:5684", config)
    }
}

/// Hand everything `from` sent to `to`. Returns the number of datagrams.
pub fn deliver(from: &Peer, to: &mut Peer, now: Instant) -> usize {
    let datagrams = from.wire.take();
    let n = datagrams.len();
    for (dest, d) in datagrams {
        assert_eq!(dest, to.addr, "datagram addressed to someone else");
        to.endpoint.handle_datagram(from.addr, &d, now);
    }
    n
}

/// Hand the given datagrams to `to` as if sent by `from`.
pub fn deliver_all(from: &Peer, to: &mut Peer, datagrams: &[Vec<u8>], now: Instant) {
    for d in datagrams {
        to.endpoint.handle_datagram(from.addr, d, now);
    }
}

/// Lose whatever `peer` sent. Returns the number of datagrams dropped.
pub fn lose(peer: &Peer) -> usize {
    peer.wire.take().len()
}

/// Exchange datagrams until both sides go quiet.
pub fn pump(client: &mut Peer, server: &mut Peer, now: Instant) {
    for _ in 0..16 {
        let moved = deliver(client, server, now) + deliver(server, client, now);
        if moved == 0 {
            return;
        }
    }
    panic!("handshake did not settle");
}

/// Connect `client` to `server` and run the handshake to completion.
pub fn connect(client: &mut Peer, server: &mut Peer, now: Instant) {
    client
        .endpoint
        .connect(server.addr, now)
        .expect("client connect");
    pump(client, server, now);
    assert!(client.endpoint.is_established(server.addr));
    assert!(server.endpoint.is_established(client.addr));
}

/// Move the clock to the peer's next deadline and fire it.
pub fn trigger_timeout(peer: &mut Peer, now: &mut Instant) {
    match peer.endpoint.poll_timeout() {
        Some(deadline) => *now = (*now).max(deadline),
        None => *now += Duration::from_secs(2),
    }
    peer.endpoint.handle_timeout(*now);
}

pub fn psk_store() -> StaticPskStore {
    StaticPskStore::new()
        .with_key(b"client-1", b"0123456789abcdef")
        .with_client_identity(b"client-1")
}

pub fn psk_config() -> Config {
    Config::builder()
        .psk_store(Arc::new(psk_store()))
        .build()
        .expect("Failed to build config")
}

/// Client and server configurations for ECDHE-ECDSA, each pinning the
/// other's certificate.
pub fn ecdhe_configs() -> (Config, Config) {
    let client_cert = generate_self_signed_certificate().expect("gen client cert");
    let server_cert = generate_self_signed_certificate().expect("gen server cert");

    let client = Config::builder()
        .cipher_suites(&[CipherSuite::EcdheEcdsaAes128GcmSha256])
        .certificate(client_cert.clone())
        .certificate_validator(Arc::new(
            PinnedCertificates::new().pin(&server_cert.certificate),
        ))
        .build()
        .expect("Failed to build client config");

    let server = Config::builder()
        .cipher_suites(&[CipherSuite::EcdheEcdsaAes128GcmSha256])
        .certificate(server_cert)
        .certificate_validator(Arc::new(
            PinnedCertificates::new().pin(&client_cert.certificate),
        ))
        .build()
        .expect("Failed to build server config");

    (client, server)
}
