// Abbreviated DTLS 1.2 client handshake (RFC 5246 §7.3, session resumption):
//
// 1. Client sends ClientHello with the cached session id (HelloVerifyRequest
//    and the repeated ClientHello as in the full handshake)
// 2. Server sends ServerHello with the same session id, ChangeCipherSpec,
//    Finished
// 3. Client sends ChangeCipherSpec, Finished
//
// If the ServerHello carries a different session id the server did not
// recognise the session and runs a full handshake. The client then falls back
// to the full flow from that ServerHello on.

use subtle::ConstantTimeEq;

use crate::crypto::verify_data;
use crate::handshake::client::ClientHandshaker;
use crate::handshake::engine::Engine;
use crate::handshake::{HandshakeState, Role};
use crate::message::{Finished, MessageType, ServerHello};
use crate::types::{AlertDescription, CipherSuite, CompressionMethod, ProtocolVersion};
use crate::{Error, Session};

/// Abbreviated handshake, initiator side.
pub struct ResumingClientHandshaker {
    phase: Phase,
    inner: ClientHandshaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// ClientHello (and cookie exchange), handled by the full client.
    Hello,
    AwaitServerFinished,
    Established,
    /// The server chose a full handshake.
    Full,
}

impl ResumingClientHandshaker {
    pub(crate) fn new(engine: Engine, session: Session) -> Result<Self, Error> {
        if session.master_secret().is_none() || session.cipher_suite().is_none() {
            return Err(Error::InvalidArgument(
                "resumption needs a session with master secret and cipher suite".into(),
            ));
        }

        let mut inner = ClientHandshaker::new(engine, session)?;
        inner.defer_server_hello = true;

        Ok(ResumingClientHandshaker {
            phase: Phase::Hello,
            inner,
        })
    }

    /// True once the server declined the resumption.
    pub fn is_full_handshake(&self) -> bool {
        self.phase == Phase::Full
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        loop {
            let prev = self.phase;
            match prev {
                Phase::Full => return self.inner.make_progress(),
                Phase::Established => return Ok(()),
                Phase::Hello => {
                    self.inner.make_progress()?;
                    let Some(server_hello) = self.inner.take_server_hello() else {
                        return Ok(());
                    };
                    self.phase = self.process_server_hello(server_hello)?;
                }
                Phase::AwaitServerFinished => {
                    if !self.await_server_finished()? {
                        return Ok(());
                    }
                    self.phase = Phase::Established;
                }
            }
            trace!("{:?} -> {:?}", prev, self.phase);
        }
    }

    fn process_server_hello(&mut self, sh: ServerHello) -> Result<Phase, Error> {
        let inner = &mut self.inner;

        if sh.session_id.is_empty() || &sh.session_id != inner.session.id() {
            debug!(
                "Server {} declined resumption of {}, full handshake",
                inner.engine.peer(),
                inner.session.id()
            );
            inner.session = Session::new(inner.engine.peer());
            inner.continue_full(sh)?;
            return Ok(Phase::Full);
        }

        if sh.server_version != ProtocolVersion::DTLS1_2 {
            return Err(inner.engine.failure_with(
                AlertDescription::ProtocolVersion,
                format!("server version {:?}", sh.server_version),
            ));
        }

        let cached = inner.session.cipher_suite();
        if CipherSuite::from_u16(sh.cipher_suite) != cached {
            return Err(inner.engine.failure_with(
                AlertDescription::IllegalParameter,
                format!(
                    "resumed session uses {:?}, server selected {:#06x}",
                    cached, sh.cipher_suite
                ),
            ));
        }
        if sh.compression_method != CompressionMethod::Null {
            return Err(inner.engine.failure_with(
                AlertDescription::IllegalParameter,
                "server selected a compression method we did not offer",
            ));
        }

        debug!(
            "Resuming session {} with {}",
            inner.session.id(),
            inner.engine.peer()
        );
        inner.server_random = Some(sh.random);

        let Some(master) = inner.session.master_secret() else {
            return Err(Error::InvalidState("no master secret".into()));
        };
        inner
            .engine
            .derive_keys(master, &inner.random, &sh.random)?;

        Ok(Phase::AwaitServerFinished)
    }

    /// Verify the server Finished and send the final flight.
    fn await_server_finished(&mut self) -> Result<bool, Error> {
        let inner = &mut self.inner;
        let Some(handshake) = inner.engine.next_handshake(&[MessageType::Finished])? else {
            return Ok(false);
        };

        let finished = inner.engine.decode(&handshake, Finished::parse)?;

        let Some(master) = inner.session.master_secret() else {
            return Err(Error::InvalidState("no master secret".into()));
        };
        let transcript = &inner.engine.transcript()[..handshake.transcript_offset];
        let expected = verify_data(master, false, transcript).map_err(Error::KeyDerivation)?;

        let is_eq: bool = finished.verify_data[..].ct_eq(&expected[..]).into();
        if !is_eq {
            return Err(inner.engine.failure_with(
                AlertDescription::DecryptError,
                "server Finished verify data mismatch",
            ));
        }

        inner.engine.flight_begin(3);
        inner.engine.create_change_cipher_spec()?;

        let verify_data =
            verify_data(master, true, inner.engine.transcript()).map_err(Error::KeyDerivation)?;
        let mut body = Vec::new();
        Finished { verify_data }.serialize(&mut body);
        inner.engine.create_handshake(MessageType::Finished, &body)?;

        inner.engine.flight_final();
        inner.engine.flush();

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

impl Role for ResumingClientHandshaker {
    fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    fn engine_mut(&mut self) -> &mut Engine {
        &mut self.inner.engine
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        ResumingClientHandshaker::make_progress(self)
    }

    fn state(&self) -> HandshakeState {
        match self.phase {
            Phase::Full => Role::state(&self.inner),
            Phase::Hello => HandshakeState::AwaitingFlight,
            Phase::AwaitServerFinished => HandshakeState::VerifyingFinal,
            Phase::Established => HandshakeState::Established,
        }
    }

    fn session(&self) -> &Session {
        &self.inner.session
    }
}
