//! Handshake state machines.
//!
//! A [`Handshaker`] negotiates one session with one peer. It is driven by
//! three inputs: received datagrams, timer expiry and an explicit abort. It
//! answers through the record layer and reports its outcome to the session
//! listener. Four roles exist: full and abbreviated, each as initiator
//! (client) and responder (server).

mod client;
mod cookie;
mod engine;
mod factory;
mod resuming_client;
mod resuming_server;
mod server;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::time::Instant;

pub use client::ClientHandshaker;
pub use factory::{HandshakeParams, HandshakeParamsBuilder, Handshakers};
pub use resuming_client::ResumingClientHandshaker;
pub use resuming_server::ResumingServerHandshaker;
pub use server::ServerHandshaker;

pub(crate) use cookie::CookieGenerator;
pub(crate) use engine::{Completion, RetainedFlight};

use self::engine::Engine;
use crate::event::dispatch;
use crate::record::{ReadState, Record, WriteState};
use crate::{Error, RecordError, Session};

/// Which handshake to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeKind {
    Client,
    Server,
    ResumingClient,
    ResumingServer,
}

impl HandshakeKind {
    pub fn is_client(&self) -> bool {
        matches!(self, HandshakeKind::Client | HandshakeKind::ResumingClient)
    }

    pub fn is_resuming(&self) -> bool {
        matches!(
            self,
            HandshakeKind::ResumingClient | HandshakeKind::ResumingServer
        )
    }
}

/// Coarse progress of a handshake, shared by all roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    /// Not started.
    Initial,
    /// A flight is out, the peer's response is outstanding.
    AwaitingFlight,
    /// Waiting for, or checking, the peer's Finished.
    VerifyingFinal,
    Established,
    /// Terminal failure.
    Aborted,
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Aborted)
    }
}

/// What every role provides to the generic driving code.
pub(crate) trait Role {
    fn engine(&self) -> &Engine;

    fn engine_mut(&mut self) -> &mut Engine;

    /// Advance as far as the received messages allow.
    fn make_progress(&mut self) -> Result<(), Error>;

    /// Progress of the role, ignoring abort.
    fn state(&self) -> HandshakeState;

    /// The session being negotiated.
    fn session(&self) -> &Session;
}

/// One handshake with one peer.
pub enum Handshaker {
    Client(ClientHandshaker),
    Server(ServerHandshaker),
    ResumingClient(ResumingClientHandshaker),
    ResumingServer(ResumingServerHandshaker),
}

impl Handshaker {
    fn role(&self) -> &dyn Role {
        match self {
            Handshaker::Client(h) => h,
            Handshaker::Server(h) => h,
            Handshaker::ResumingClient(h) => h,
            Handshaker::ResumingServer(h) => h,
        }
    }

    fn role_mut(&mut self) -> &mut dyn Role {
        match self {
            Handshaker::Client(h) => h,
            Handshaker::Server(h) => h,
            Handshaker::ResumingClient(h) => h,
            Handshaker::ResumingServer(h) => h,
        }
    }

    pub fn kind(&self) -> HandshakeKind {
        match self {
            Handshaker::Client(_) => HandshakeKind::Client,
            Handshaker::Server(_) => HandshakeKind::Server,
            Handshaker::ResumingClient(_) => HandshakeKind::ResumingClient,
            Handshaker::ResumingServer(_) => HandshakeKind::ResumingServer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.role().engine().peer()
    }

    pub fn state(&self) -> HandshakeState {
        let role = self.role();
        if role.engine().failure().is_some() {
            HandshakeState::Aborted
        } else if !role.engine().is_started() {
            HandshakeState::Initial
        } else {
            role.state()
        }
    }

    pub fn is_established(&self) -> bool {
        self.state() == HandshakeState::Established
    }

    /// The error that terminated the handshake.
    pub fn failure(&self) -> Option<&Error> {
        self.role().engine().failure()
    }

    /// The session in negotiation, with the connection state in use.
    pub fn session(&self) -> Session {
        let role = self.role();
        let mut session = role.session().clone();
        let (read, write) = role.engine().current_states();
        session.set_states(read, write);
        session
    }

    /// Number of times record keys were derived. At most one per handshake.
    pub fn key_derivations(&self) -> usize {
        self.role().engine().key_derivations()
    }

    /// Start the handshake. An initiator sends its first flight.
    pub fn start(&mut self, now: Instant) -> Result<(), Error> {
        if self.role().engine().is_started() {
            return Err(Error::InvalidState("handshake already started".into()));
        }
        let role = self.role_mut();
        role.engine_mut().start(now);
        let result = role.make_progress();
        self.finish_transition(result)
    }

    /// Feed a datagram received from the peer.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) -> Result<(), Error> {
        let (records, error) = Record::parse_datagram(self.peer(), datagram);
        for record in records {
            self.handle_record(record, now)?;
        }
        match error {
            Some(error) => self.discard_record(error),
            None => Ok(()),
        }
    }

    /// Count a record that could not be parsed. Aborts once too many
    /// records were discarded.
    pub(crate) fn discard_record(&mut self, error: RecordError) -> Result<(), Error> {
        if self.state().is_terminal() {
            return Ok(());
        }
        let result = self.role_mut().engine_mut().record_failure(error);
        self.finish_transition(result)
    }

    /// Feed one record received from the peer.
    pub fn handle_record(&mut self, record: Record, now: Instant) -> Result<(), Error> {
        if self.state().is_terminal() {
            trace!("Ignore {:?} for finished handshake", record);
            return Ok(());
        }
        if !self.role().engine().is_started() {
            self.start(now)?;
        }

        let role = self.role_mut();
        role.engine_mut().set_now(now);
        let result = role
            .engine_mut()
            .handle_record(record)
            .and_then(|_| role.make_progress());
        self.finish_transition(result)
    }

    /// Drive retransmission and the overall handshake timeout.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<(), Error> {
        if self.state().is_terminal() {
            return Ok(());
        }
        let role = self.role_mut();
        let result = role
            .engine_mut()
            .handle_timeout(now)
            .and_then(|_| role.make_progress());
        self.finish_transition(result)
    }

    /// The next instant `handle_timeout` must be called.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.state().is_terminal() {
            return None;
        }
        self.role().engine().poll_timeout()
    }

    /// Tear down the handshake. Timers stop and further input is ignored.
    pub fn abort(&mut self) {
        if self.state().is_terminal() {
            return;
        }
        let result = Err(Error::Aborted);
        let _ = self.finish_transition(result);
    }

    fn finish_transition(&mut self, result: Result<(), Error>) -> Result<(), Error> {
        let role = self.role_mut();

        if let Err(e) = &result {
            role.engine_mut().abort(e);
        } else if role.state() == HandshakeState::Established {
            let mut session = role.session().clone();
            let (read, write) = role.engine().current_states();
            session.set_states(read, write);
            role.engine_mut().report_established(&session);
        }

        let listener = role.engine().listener();
        for event in role.engine_mut().drain_events() {
            dispatch(&*listener, event);
        }

        result
    }

    /// Read and write state of the epoch the handshake started in. Over an
    /// association these are copies of the association's own.
    pub(crate) fn base_states(&self) -> (Option<&ReadState>, Option<&WriteState>) {
        self.role().engine().base_states()
    }

    /// Hand over the established session and the state an association
    /// needs to keep.
    pub(crate) fn into_completion(self) -> Completion {
        match self {
            Handshaker::Client(h) => h.into_completion(),
            Handshaker::Server(h) => h.into_completion(),
            Handshaker::ResumingClient(h) => h.into_completion(),
            Handshaker::ResumingServer(h) => h.into_completion(),
        }
    }
}

impl std::fmt::Debug for Handshaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshaker")
            .field("kind", &self.kind())
            .field("peer", &self.peer())
            .field("state", &self.state())
            .finish()
    }
}
