//! Session lifecycle events.
//!
//! A handshake queues its events while a transition runs and hands them to
//! the [`SessionListener`] once the transition is complete, so a listener
//! never observes a handshake in the middle of a state change.

use tokio::sync::mpsc::UnboundedSender;

use crate::session::Session;
use crate::{Error, RecordError};

/// Events emitted by a handshake.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The handshake started. Emitted once.
    HandshakeStarted,
    /// The handshake completed. Terminal.
    SessionEstablished(Session),
    /// The handshake was aborted. Terminal.
    HandshakeFailed(Error),
    /// A single record was discarded without aborting the handshake.
    RecordDiscarded(RecordError),
}

impl SessionEvent {
    /// True for the two events that end a handshake.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionEvent::SessionEstablished(_) | SessionEvent::HandshakeFailed(_)
        )
    }
}

/// Receiver of session lifecycle callbacks.
///
/// Exactly one of `on_session_established` or `on_handshake_failed` is called
/// per handshake.
pub trait SessionListener: Send + Sync {
    fn on_handshake_started(&self);

    fn on_session_established(&self, session: &Session);

    fn on_handshake_failed(&self, error: &Error);

    fn on_record_discarded(&self, _error: &RecordError) {}
}

impl SessionListener for UnboundedSender<SessionEvent> {
    fn on_handshake_started(&self) {
        let _ = self.send(SessionEvent::HandshakeStarted);
    }

    fn on_session_established(&self, session: &Session) {
        let _ = self.send(SessionEvent::SessionEstablished(session.clone()));
    }

    fn on_handshake_failed(&self, error: &Error) {
        let _ = self.send(SessionEvent::HandshakeFailed(error.clone()));
    }

    fn on_record_discarded(&self, error: &RecordError) {
        let _ = self.send(SessionEvent::RecordDiscarded(error.clone()));
    }
}

/// Hand one queued event to the listener.
pub(crate) fn dispatch(listener: &dyn SessionListener, event: SessionEvent) {
    match event {
        SessionEvent::HandshakeStarted => listener.on_handshake_started(),
        SessionEvent::SessionEstablished(session) => listener.on_session_established(&session),
        SessionEvent::HandshakeFailed(error) => listener.on_handshake_failed(&error),
        SessionEvent::RecordDiscarded(error) => listener.on_record_discarded(&error),
    }
}
