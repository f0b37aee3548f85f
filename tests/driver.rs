//! Handshakes running on their own tokio task.

mod dshake_common;

use std::net::SocketAddr;
use std::sync::Arc;

use dshake::driver::{self, HandshakeHandle};
use dshake::{
    DeliveryError, Error, HandshakeKind, HandshakeParams, Handshaker, Handshakers, RecordLayer,
    Session,
};
use dshake_common::*;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Record layer handing datagrams to a channel.
struct Forward(mpsc::UnboundedSender<Vec<u8>>);

impl RecordLayer for Forward {
    fn send(&self, _peer: SocketAddr, datagrams: &[Vec<u8>]) -> Result<(), DeliveryError> {
        for d in datagrams {
            let _ = self.0.send(d.clone());
        }
        Ok(())
    }
}

fn client_addr() -> SocketAddr {
    "192.0.2.10:40001".parse().unwrap()
}

fn server_addr() -> SocketAddr {
    "192.0.2.1:5684".parse().unwrap()
}

fn handshaker(kind: HandshakeKind, peer: SocketAddr, out: mpsc::UnboundedSender<Vec<u8>>) -> Handshaker {
    let params = HandshakeParams::builder()
        .session(Session::new(peer))
        .record_layer(Arc::new(Forward(out)))
        .listener(Arc::new(Events::default()))
        .config(Arc::new(psk_config()))
        .build()
        .expect("params");
    Handshakers::create(kind, params).expect("handshaker")
}

/// Forward everything arriving on `rx` to `to`.
fn wire(mut rx: mpsc::UnboundedReceiver<Vec<u8>>, to: HandshakeHandle) {
    tokio::spawn(async move {
        while let Some(datagram) = rx.recv().await {
            if to.deliver(datagram).is_err() {
                break;
            }
        }
    });
}

#[tokio::test(start_paused = true)]
async fn spawned_handshakes_complete() {
    let _ = env_logger::try_init();

    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (server_tx, server_rx) = mpsc::unbounded_channel();

    let client = driver::spawn(
        handshaker(HandshakeKind::Client, server_addr(), client_tx),
        &Handle::current(),
    );
    let server = driver::spawn(
        handshaker(HandshakeKind::Server, client_addr(), server_tx),
        &Handle::current(),
    );

    wire(client_rx, server.clone());
    wire(server_rx, client.clone());

    let c = client.outcome().await.expect("client outcome");
    let s = server.outcome().await.expect("server outcome");

    assert_eq!(c.id(), s.id());
    assert_eq!(c.master_secret(), s.master_secret());
    assert_eq!(c.write_epoch(), Some(1));
    assert!(client.is_finished());
    assert!(client.deliver(Vec::new()).is_err());
}

#[tokio::test(start_paused = true)]
async fn unanswered_handshake_times_out() {
    let _ = env_logger::try_init();

    let (client_tx, _client_rx) = mpsc::unbounded_channel();
    let client = driver::spawn(
        handshaker(HandshakeKind::Client, server_addr(), client_tx),
        &Handle::current(),
    );

    let outcome = client.outcome().await;
    assert!(matches!(outcome, Err(Error::Timeout(_))));
}

#[tokio::test(start_paused = true)]
async fn abort_ends_handshake() {
    let _ = env_logger::try_init();

    let (client_tx, mut client_rx) = mpsc::unbounded_channel();
    let client = driver::spawn(
        handshaker(HandshakeKind::Client, server_addr(), client_tx),
        &Handle::current(),
    );

    // Wait for the ClientHello before aborting.
    assert!(client_rx.recv().await.is_some());
    client.abort();

    let outcome = client.outcome().await;
    assert!(matches!(outcome, Err(Error::Aborted)));
    assert!(client_rx.try_recv().is_err(), "abort sends no alert");
}
