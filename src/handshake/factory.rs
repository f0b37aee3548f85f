use std::sync::Arc;

use super::engine::{Engine, EngineParams};
use super::{
    ClientHandshaker, HandshakeKind, Handshaker, ResumingClientHandshaker,
    ResumingServerHandshaker, ServerHandshaker,
};
use crate::event::SessionListener;
use crate::record::RecordLayer;
use crate::{Config, Error, Session};

/// Everything needed to create a [`Handshaker`].
pub struct HandshakeParams {
    session: Session,
    record_layer: Arc<dyn RecordLayer>,
    listener: Arc<dyn SessionListener>,
    config: Arc<Config>,
    initial_message_sequence: u16,
    initial_record_sequence: u64,
}

impl HandshakeParams {
    pub fn builder() -> HandshakeParamsBuilder {
        HandshakeParamsBuilder::default()
    }
}

#[derive(Default)]
pub struct HandshakeParamsBuilder {
    session: Option<Session>,
    record_layer: Option<Arc<dyn RecordLayer>>,
    listener: Option<Arc<dyn SessionListener>>,
    config: Option<Arc<Config>>,
    initial_message_sequence: u16,
    initial_record_sequence: u64,
}

impl HandshakeParamsBuilder {
    /// The session to negotiate. Empty for a full handshake, the cached
    /// session when resuming.
    pub fn session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn record_layer(mut self, record_layer: Arc<dyn RecordLayer>) -> Self {
        self.record_layer = Some(record_layer);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn config(mut self, config: Arc<Config>) -> Self {
        self.config = Some(config);
        self
    }

    /// message_seq of the first message, to continue numbering after a
    /// cookie exchange.
    pub fn initial_message_sequence(mut self, seq: u16) -> Self {
        self.initial_message_sequence = seq;
        self
    }

    /// Record sequence number of the first record sent in epoch 0.
    pub fn initial_record_sequence(mut self, seq: u64) -> Self {
        self.initial_record_sequence = seq;
        self
    }

    pub fn build(self) -> Result<HandshakeParams, Error> {
        let missing = |what: &str| Error::InvalidArgument(format!("{} must be set", what));

        Ok(HandshakeParams {
            session: self.session.ok_or_else(|| missing("session"))?,
            record_layer: self.record_layer.ok_or_else(|| missing("record layer"))?,
            listener: self.listener.ok_or_else(|| missing("listener"))?,
            config: self.config.ok_or_else(|| missing("config"))?,
            initial_message_sequence: self.initial_message_sequence,
            initial_record_sequence: self.initial_record_sequence,
        })
    }
}

/// Creates the handshaker for a role.
pub struct Handshakers;

impl Handshakers {
    /// Create a handshaker of `kind`.
    ///
    /// Resuming requires a session with a session id. When the session
    /// carries connection state (resumption over an established
    /// association) the handshake runs protected by it and the new keys
    /// belong to the next epoch.
    pub fn create(kind: HandshakeKind, params: HandshakeParams) -> Result<Handshaker, Error> {
        let HandshakeParams {
            mut session,
            record_layer,
            listener,
            config,
            initial_message_sequence,
            initial_record_sequence,
        } = params;

        if kind.is_resuming() && session.id().is_empty() {
            return Err(Error::InvalidArgument(
                "cannot resume a session without session id".into(),
            ));
        }

        let states = session.take_states();
        if let Some((_, write)) = &states {
            trace!(
                "{:?} handshake with {} over epoch {}",
                kind,
                session.peer(),
                write.epoch()
            );
        }

        let engine = Engine::new(EngineParams {
            config,
            peer: session.peer(),
            is_client: kind.is_client(),
            record_layer,
            listener,
            states,
            initial_message_sequence,
            initial_record_sequence,
        });

        let handshaker = match kind {
            HandshakeKind::Client => Handshaker::Client(ClientHandshaker::new(engine, session)?),
            HandshakeKind::Server => Handshaker::Server(ServerHandshaker::new(engine, session)?),
            HandshakeKind::ResumingClient => {
                Handshaker::ResumingClient(ResumingClientHandshaker::new(engine, session)?)
            }
            HandshakeKind::ResumingServer => {
                Handshaker::ResumingServer(ResumingServerHandshaker::new(engine, session)?)
            }
        };

        Ok(handshaker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticPskStore;
    use crate::handshake::testing::{peer, Capture, Silent};
    use crate::handshake::HandshakeState;

    fn builder() -> HandshakeParamsBuilder {
        let config = Config::builder()
            .psk_store(Arc::new(StaticPskStore::new().with_key(b"id", b"key")))
            .build()
            .unwrap();
        HandshakeParams::builder()
            .record_layer(Arc::new(Capture::default()))
            .listener(Arc::new(Silent))
            .config(Arc::new(config))
    }

    #[test]
    fn missing_session_is_invalid_argument() {
        let err = builder().build().err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn missing_listener_is_invalid_argument() {
        let err = HandshakeParams::builder()
            .session(Session::new(peer()))
            .record_layer(Arc::new(Capture::default()))
            .config(Arc::new(Config::default()))
            .build()
            .err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn resuming_without_session_id_is_invalid_argument() {
        let params = builder().session(Session::new(peer())).build().unwrap();
        let err = Handshakers::create(HandshakeKind::ResumingClient, params).err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn creates_requested_role() {
        for kind in [HandshakeKind::Client, HandshakeKind::Server] {
            let params = builder().session(Session::new(peer())).build().unwrap();
            let handshaker = Handshakers::create(kind, params).unwrap();
            assert_eq!(handshaker.kind(), kind);
            assert_eq!(handshaker.state(), HandshakeState::Initial);
        }
    }
}
