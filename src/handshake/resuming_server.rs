// Abbreviated DTLS 1.2 server handshake (RFC 5246 §7.3, session resumption):
//
// 1. Client sends ClientHello with a session id the server knows
// 2. Server sends ServerHello with that session id, ChangeCipherSpec, Finished
// 3. Client sends ChangeCipherSpec, Finished
//
// The server keeps retransmitting its flight until the client Finished
// arrives. If the ClientHello does not allow resumption (unknown session id,
// cipher suite not offered) the server runs a full handshake instead.

use subtle::ConstantTimeEq;

use crate::crypto::verify_data;
use crate::handshake::engine::Engine;
use crate::handshake::server::ServerHandshaker;
use crate::handshake::{HandshakeState, Role};
use crate::message::{ClientHello, Extension, Finished, MessageType, ServerHello};
use crate::types::{AlertDescription, CompressionMethod, KeyExchange, ProtocolVersion};
use crate::{Error, Session};

/// Abbreviated handshake, responder side.
pub struct ResumingServerHandshaker {
    phase: Phase,
    inner: ServerHandshaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitClientHello,
    AwaitClientFinished,
    Established,
    /// Resumption not possible, full handshake.
    Full,
}

impl ResumingServerHandshaker {
    pub(crate) fn new(engine: Engine, session: Session) -> Result<Self, Error> {
        if session.master_secret().is_none() || session.cipher_suite().is_none() {
            return Err(Error::InvalidArgument(
                "resumption needs a session with master secret and cipher suite".into(),
            ));
        }

        let mut inner = ServerHandshaker::new(engine, session)?;
        inner.defer_client_hello = true;

        Ok(ResumingServerHandshaker {
            phase: Phase::AwaitClientHello,
            inner,
        })
    }

    /// True once resumption was declined.
    pub fn is_full_handshake(&self) -> bool {
        self.phase == Phase::Full
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        loop {
            let prev = self.phase;
            match prev {
                Phase::Full => return self.inner.make_progress(),
                Phase::Established => return Ok(()),
                Phase::AwaitClientHello => {
                    self.inner.make_progress()?;
                    let Some(client_hello) = self.inner.take_client_hello() else {
                        return Ok(());
                    };
                    self.phase = self.process_client_hello(client_hello)?;
                }
                Phase::AwaitClientFinished => {
                    if !self.await_client_finished()? {
                        return Ok(());
                    }
                    self.phase = Phase::Established;
                }
            }
            trace!("{:?} -> {:?}", prev, self.phase);
        }
    }

    fn process_client_hello(&mut self, ch: ClientHello) -> Result<Phase, Error> {
        let inner = &mut self.inner;
        inner.check_client_hello(&ch)?;

        let resumable = !ch.session_id.is_empty()
            && &ch.session_id == inner.session.id()
            && inner.session.cipher_suite().map(|s| ch.offers(s)) == Some(true);

        if !resumable {
            debug!(
                "Cannot resume session {} with {}, full handshake",
                ch.session_id,
                inner.engine.peer()
            );
            inner.session = Session::new(inner.engine.peer());
            inner.continue_full(ch)?;
            return Ok(Phase::Full);
        }

        let Some(suite) = inner.session.cipher_suite() else {
            return Err(Error::InvalidState("no cipher suite".into()));
        };
        inner.client_random = Some(ch.random);

        inner.engine.flight_begin(2);

        let extensions = match suite.key_exchange() {
            KeyExchange::Ecdhe => vec![Extension::ec_point_formats()],
            KeyExchange::Psk => Vec::new(),
        };

        let mut body = Vec::new();
        ServerHello {
            server_version: ProtocolVersion::DTLS1_2,
            random: inner.server_random,
            session_id: inner.session.id().clone(),
            cipher_suite: suite.as_u16(),
            compression_method: CompressionMethod::Null,
            extensions,
        }
        .serialize(&mut body);
        inner
            .engine
            .create_handshake(MessageType::ServerHello, &body)?;

        let Some(master) = inner.session.master_secret() else {
            return Err(Error::InvalidState("no master secret".into()));
        };
        inner
            .engine
            .derive_keys(master, &ch.random, &inner.server_random)?;
        inner.engine.create_change_cipher_spec()?;

        let verify_data =
            verify_data(master, false, inner.engine.transcript()).map_err(Error::KeyDerivation)?;
        let mut body = Vec::new();
        Finished { verify_data }.serialize(&mut body);
        inner.engine.create_handshake(MessageType::Finished, &body)?;
        inner.engine.flush();

        debug!(
            "Resuming session {} with {}",
            inner.session.id(),
            inner.engine.peer()
        );
        Ok(Phase::AwaitClientFinished)
    }

    fn await_client_finished(&mut self) -> Result<bool, Error> {
        let inner = &mut self.inner;
        let Some(handshake) = inner.engine.next_handshake(&[MessageType::Finished])? else {
            return Ok(false);
        };

        let finished = inner.engine.decode(&handshake, Finished::parse)?;

        let Some(master) = inner.session.master_secret() else {
            return Err(Error::InvalidState("no master secret".into()));
        };
        let transcript = &inner.engine.transcript()[..handshake.transcript_offset];
        let expected = verify_data(master, true, transcript).map_err(Error::KeyDerivation)?;

        let is_eq: bool = finished.verify_data[..].ct_eq(&expected[..]).into();
        if !is_eq {
            return Err(inner.engine.failure_with(
                AlertDescription::DecryptError,
                "client Finished verify data mismatch",
            ));
        }

        inner.engine.flight_stop_resend_timers();
        debug!(
            "Resumed session {} with {}",
            inner.session.id(),
            inner.engine.peer()
        );
        Ok(true)
    }

    pub(super) fn into_completion(self) -> super::Completion {
        self.inner.into_completion()
    }
}

impl Role for ResumingServerHandshaker {
    fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    fn engine_mut(&mut self) -> &mut Engine {
        &mut self.inner.engine
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        ResumingServerHandshaker::make_progress(self)
    }

    fn state(&self) -> HandshakeState {
        match self.phase {
            Phase::Full => Role::state(&self.inner),
            Phase::AwaitClientHello => HandshakeState::AwaitingFlight,
            Phase::AwaitClientFinished => HandshakeState::VerifyingFinal,
            Phase::Established => HandshakeState::Established,
        }
    }

    fn session(&self) -> &Session {
        &self.inner.session
    }
}
