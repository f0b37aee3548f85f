use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::engine::{Engine, EngineParams};
use crate::event::SessionListener;
use crate::message::{Fragment, Handshake, MessageType};
use crate::record::{DeliveryError, Record, RecordLayer};
use crate::{Config, Error, Session};

#[derive(Default)]
pub struct Capture(pub Mutex<Vec<Vec<u8>>>);

impl Capture {
    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl RecordLayer for Capture {
    fn send(&self, _peer: SocketAddr, datagrams: &[Vec<u8>]) -> Result<(), DeliveryError> {
        self.0.lock().extend_from_slice(datagrams);
        Ok(())
    }
}

pub struct Silent;

impl SessionListener for Silent {
    fn on_handshake_started(&self) {}
    fn on_session_established(&self, _session: &Session) {}
    fn on_handshake_failed(&self, _error: &Error) {}
}

pub fn peer() -> SocketAddr {
    "127.0.0.1:5684".parse().unwrap()
}

pub fn engine(config: Config, is_client: bool) -> (Engine, Arc<Capture>) {
    let capture = Arc::new(Capture::default());
    let engine = Engine::new(EngineParams {
        config: Arc::new(config),
        peer: peer(),
        is_client,
        record_layer: capture.clone(),
        listener: Arc::new(Silent),
        states: None,
        initial_message_sequence: 0,
        initial_record_sequence: 0,
    });
    (engine, capture)
}

/// Plaintext handshake messages carried by captured datagrams.
pub fn plaintext_messages(datagrams: &[Vec<u8>]) -> Vec<(MessageType, Vec<u8>)> {
    let mut out = Vec::new();
    for datagram in datagrams {
        let (records, _) = Record::parse_datagram(peer(), datagram);
        for record in records.into_iter().filter(|r| r.epoch == 0) {
            let Ok(fragments) = Fragment::parse_all(&record.fragment) else {
                continue;
            };
            for f in fragments {
                out.push((f.header.msg_type, f.body));
            }
        }
    }
    out
}

/// A single-fragment plaintext handshake record.
pub fn handshake_record(msg_type: MessageType, message_seq: u16, body: &[u8], seq: u64) -> Record {
    let bytes = Handshake::transcript_bytes(msg_type, message_seq, body);
    Record {
        content_type: crate::types::ContentType::Handshake,
        version: crate::types::ProtocolVersion::DTLS1_2,
        epoch: 0,
        sequence_number: seq,
        peer: peer(),
        fragment: bytes,
    }
}
