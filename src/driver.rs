//! Runs one handshake on a tokio task.
//!
//! The task owns the [`Handshaker`]. Datagrams, abort requests and timer
//! expiry all arrive in that one task, so handshake state is only ever
//! touched from there.

use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep_until;

use crate::handshake::{HandshakeState, Handshaker};
use crate::{Error, Session};

type Outcome = Option<Result<Session, Error>>;

enum Command {
    Datagram(Vec<u8>),
    Abort,
}

/// Spawn `handshaker` on `executor`. The handshake starts right away; an
/// initiator sends its first flight.
pub fn spawn(handshaker: Handshaker, executor: &Handle) -> HandshakeHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let (outcome_tx, outcome_rx) = watch::channel(None);

    executor.spawn(run(handshaker, rx, outcome_tx));

    HandshakeHandle {
        tx,
        outcome: outcome_rx,
    }
}

/// Control of a spawned handshake. Dropping every handle aborts it.
#[derive(Clone)]
pub struct HandshakeHandle {
    tx: mpsc::UnboundedSender<Command>,
    outcome: watch::Receiver<Outcome>,
}

impl HandshakeHandle {
    /// Feed a datagram received from the peer.
    pub fn deliver(&self, datagram: Vec<u8>) -> Result<(), Error> {
        self.tx
            .send(Command::Datagram(datagram))
            .map_err(|_| Error::InvalidState("handshake task has ended".into()))
    }

    /// Abort the handshake. Records still queued are discarded.
    pub fn abort(&self) {
        let _ = self.tx.send(Command::Abort);
    }

    /// Wait for the handshake to finish.
    pub async fn outcome(&self) -> Result<Session, Error> {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or(Err(Error::Aborted))
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

async fn run(
    mut handshaker: Handshaker,
    mut rx: mpsc::UnboundedReceiver<Command>,
    outcome: watch::Sender<Outcome>,
) {
    if handshaker.state() == HandshakeState::Initial {
        if let Err(e) = handshaker.start(now()) {
            debug!("Handshake with {} failed to start: {}", handshaker.peer(), e);
        }
    }

    loop {
        match handshaker.state() {
            HandshakeState::Established => {
                let _ = outcome.send(Some(Ok(handshaker.session())));
                break;
            }
            HandshakeState::Aborted => {
                let error = handshaker.failure().cloned().unwrap_or(Error::Aborted);
                let _ = outcome.send(Some(Err(error)));
                break;
            }
            _ => {}
        }

        let deadline = handshaker.poll_timeout();

        tokio::select! {
            command = rx.recv() => match command {
                Some(Command::Datagram(datagram)) => {
                    if let Err(e) = handshaker.handle_datagram(&datagram, now()) {
                        trace!("Datagram from {} ended handshake: {}", handshaker.peer(), e);
                    }
                }
                Some(Command::Abort) | None => {
                    debug!("Abort handshake with {}", handshaker.peer());
                    handshaker.abort();
                }
            },
            _ = sleep(deadline) => {
                if let Err(e) = handshaker.handle_timeout(now()) {
                    trace!("Timeout ended handshake with {}: {}", handshaker.peer(), e);
                }
            }
        }
    }

    trace!("Handshake task for {} done", handshaker.peer());
}

async fn sleep(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

// tokio's clock, so paused time in tests moves the handshake clock too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}
