// DTLS 1.2 server handshake flow (RFC 6347 §4.2.4):
//
// The cookie exchange (flights 1 and 2) happens statelessly before this
// handshaker exists. It starts from the cookie-bearing ClientHello:
//
// 1. Client sends ClientHello with cookie (flight 3)
// 2. Server sends flight 4:
//    - ServerHello
//    - ECDHE: Certificate, ServerKeyExchange, CertificateRequest (if required)
//    - PSK: ServerKeyExchange with identity hint (if configured)
//    - ServerHelloDone
// 3. Client sends flight 5: [Certificate], ClientKeyExchange,
//    [CertificateVerify], ChangeCipherSpec, Finished
// 4. Server sends flight 6: ChangeCipherSpec, Finished
//
// Flight 6 is the last flight of the handshake. It is not retransmitted on a
// timer but kept by the association and resent when the client repeats
// flight 5.

use subtle::ConstantTimeEq;

use crate::credentials::PeerIdentity;
use crate::crypto::{
    master_secret, psk_premaster_secret, verify_data, verify_with_certificate, EcdhKeyPair,
    EcdsaSigner, ECDSA_SECP256R1_SHA256, SECP256R1,
};
use crate::handshake::engine::Engine;
use crate::handshake::{HandshakeState, Role};
use crate::message::{
    Certificate, CertificateRequest, CertificateVerify, ClientHello, ClientKeyExchange, Extension,
    ExtensionType, Finished, MessageType, ServerHello, ServerKeyExchange, ECDSA_SIGN,
};
use crate::types::{
    AlertDescription, CipherSuite, CompressionMethod, KeyExchange, ProtocolVersion, Random,
    SessionId,
};
use crate::{Error, Session};

/// Full handshake, responder side.
pub struct ServerHandshaker {
    /// Current server state.
    state: State,

    /// Engine in common between server and client.
    pub(super) engine: Engine,

    pub(super) session: Session,

    pub(super) client_random: Option<Random>,

    /// Random unique data. Used for ServerHello.
    pub(super) server_random: Random,

    /// Our half of the ECDHE exchange.
    key_pair: Option<EcdhKeyPair>,

    /// Leaf certificate of the client, DER.
    client_certificate: Option<Vec<u8>>,

    certificate_requested: bool,

    /// Hand the ClientHello to the caller instead of processing it.
    pub(super) defer_client_hello: bool,

    deferred_client_hello: Option<ClientHello>,
}

impl ServerHandshaker {
    pub(crate) fn new(mut engine: Engine, session: Session) -> Result<Self, Error> {
        if engine.config().usable_cipher_suites().next().is_none() {
            return Err(Error::Config(
                "no cipher suite usable with the configured credentials".into(),
            ));
        }

        let server_random = Random::new(&mut engine.rng);

        Ok(ServerHandshaker {
            state: State::AwaitClientHello,
            engine,
            session,
            client_random: None,
            server_random,
            key_pair: None,
            client_certificate: None,
            certificate_requested: false,
            defer_client_hello: false,
            deferred_client_hello: None,
        })
    }

    pub(super) fn make_progress(&mut self) -> Result<(), Error> {
        loop {
            let prev_state = self.state;

            let new_state = prev_state.make_progress(self)?;
            if prev_state != new_state {
                self.state = new_state;
                trace!("{:?} -> {:?}", prev_state, new_state);
            } else {
                break;
            }
        }
        Ok(())
    }

    pub(super) fn take_client_hello(&mut self) -> Option<ClientHello> {
        self.deferred_client_hello.take()
    }

    /// Continue with a full handshake from a ClientHello already taken off
    /// the engine.
    pub(super) fn continue_full(&mut self, client_hello: ClientHello) -> Result<(), Error> {
        self.defer_client_hello = false;
        self.state = self.process_client_hello(client_hello)?;
        self.make_progress()
    }

    /// Version and compression checks shared with the abbreviated handshake.
    pub(super) fn check_client_hello(&self, ch: &ClientHello) -> Result<(), Error> {
        // DTLS versions count downwards.
        if ch.client_version.as_u16() > ProtocolVersion::DTLS1_2.as_u16() {
            return Err(self.engine.failure_with(
                AlertDescription::ProtocolVersion,
                format!("client version {:?}", ch.client_version),
            ));
        }
        if !ch.offers_null_compression() {
            return Err(self.engine.failure_with(
                AlertDescription::HandshakeFailure,
                "client does not offer null compression",
            ));
        }
        Ok(())
    }

    fn process_client_hello(&mut self, ch: ClientHello) -> Result<State, Error> {
        self.check_client_hello(&ch)?;

        let supports_p256 = Extension::u16_list(&ch.extensions, ExtensionType::SupportedGroups)
            .map(|groups| groups.contains(&SECP256R1))
            .unwrap_or(true);

        // Server preference decides.
        let suite = self.engine.config().usable_cipher_suites().find(|s| {
            ch.offers(*s) && (s.key_exchange() != KeyExchange::Ecdhe || supports_p256)
        });

        let Some(suite) = suite else {
            return Err(self.engine.failure_with(
                AlertDescription::HandshakeFailure,
                "no common cipher suite",
            ));
        };

        let id = SessionId::random(&mut self.engine.rng);
        debug!(
            "ClientHello from {}: negotiated {} session {}",
            self.engine.peer(),
            suite,
            id
        );

        self.client_random = Some(ch.random);
        self.session.set_id(id);
        self.session.set_cipher_suite(suite);
        self.session.set_compression(CompressionMethod::Null);

        Ok(State::SendServerFlight)
    }

    pub(super) fn into_completion(self) -> super::Completion {
        self.engine.into_completion(self.session)
    }
}

impl Role for ServerHandshaker {
    fn engine(&self) -> &Engine {
        &self.engine
    }

    fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        ServerHandshaker::make_progress(self)
    }

    fn state(&self) -> HandshakeState {
        match self.state {
            State::AwaitClientFinished | State::SendFinishedFlight => {
                HandshakeState::VerifyingFinal
            }
            State::Established => HandshakeState::Established,
            _ => HandshakeState::AwaitingFlight,
        }
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitClientHello,
    SendServerFlight,
    AwaitClientCertificate,
    AwaitClientKeyExchange,
    AwaitCertificateVerify,
    AwaitClientFinished,
    SendFinishedFlight,
    Established,
}

impl State {
    fn make_progress(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        match self {
            State::AwaitClientHello => self.await_client_hello(server),
            State::SendServerFlight => self.send_server_flight(server),
            State::AwaitClientCertificate => self.await_client_certificate(server),
            State::AwaitClientKeyExchange => self.await_client_key_exchange(server),
            State::AwaitCertificateVerify => self.await_certificate_verify(server),
            State::AwaitClientFinished => self.await_client_finished(server),
            State::SendFinishedFlight => self.send_finished_flight(server),
            State::Established => Ok(self),
        }
    }

    fn await_client_hello(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        let Some(handshake) = server.engine.next_handshake(&[MessageType::ClientHello])? else {
            return Ok(self);
        };

        let client_hello = server.engine.decode(&handshake, ClientHello::parse)?;

        if server.defer_client_hello {
            server.deferred_client_hello = Some(client_hello);
            return Ok(self);
        }

        server.process_client_hello(client_hello)
    }

    fn send_server_flight(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        server.engine.flight_begin(4);

        let (Some(suite), Some(client_random)) = (server.session.cipher_suite(), server.client_random)
        else {
            return Err(Error::InvalidState("server flight before ClientHello".into()));
        };

        let extensions = match suite.key_exchange() {
            KeyExchange::Ecdhe => vec![Extension::ec_point_formats()],
            KeyExchange::Psk => Vec::new(),
        };

        let mut body = Vec::new();
        ServerHello {
            server_version: ProtocolVersion::DTLS1_2,
            random: server.server_random,
            session_id: server.session.id().clone(),
            cipher_suite: suite.as_u16(),
            compression_method: CompressionMethod::Null,
            extensions,
        }
        .serialize(&mut body);
        server
            .engine
            .create_handshake(MessageType::ServerHello, &body)?;

        match suite.key_exchange() {
            KeyExchange::Ecdhe => {
                let Some(own) = server.engine.config().certificate().cloned() else {
                    return Err(Error::Config("no certificate".into()));
                };

                let mut body = Vec::new();
                Certificate {
                    chain: vec![own.certificate.clone()],
                }
                .serialize(&mut body);
                server
                    .engine
                    .create_handshake(MessageType::Certificate, &body)?;

                let key_pair = EcdhKeyPair::generate();
                let params = ServerKeyExchange::ecdh_params(SECP256R1, key_pair.public_key());

                let mut signed = Vec::with_capacity(64 + params.len());
                signed.extend_from_slice(client_random.as_bytes());
                signed.extend_from_slice(server.server_random.as_bytes());
                signed.extend_from_slice(&params);

                let signer = EcdsaSigner::from_pkcs8(&own.private_key).map_err(Error::Crypto)?;
                let signature = signer.sign(&signed).map_err(Error::Crypto)?;

                let mut body = Vec::new();
                ServerKeyExchange::Ecdhe {
                    named_curve: SECP256R1,
                    public_key: key_pair.public_key().to_vec(),
                    signature_algorithm: ECDSA_SECP256R1_SHA256,
                    signature,
                }
                .serialize(&mut body);
                server
                    .engine
                    .create_handshake(MessageType::ServerKeyExchange, &body)?;
                server.key_pair = Some(key_pair);

                if server.engine.config().require_client_certificate() {
                    let mut body = Vec::new();
                    CertificateRequest {
                        certificate_types: vec![ECDSA_SIGN],
                        signature_algorithms: vec![ECDSA_SECP256R1_SHA256],
                        authorities: Vec::new(),
                    }
                    .serialize(&mut body);
                    server
                        .engine
                        .create_handshake(MessageType::CertificateRequest, &body)?;
                    server.certificate_requested = true;
                }
            }
            KeyExchange::Psk => {
                let hint = server
                    .engine
                    .config()
                    .psk_store()
                    .and_then(|store| store.identity_hint());
                if let Some(identity_hint) = hint {
                    let mut body = Vec::new();
                    ServerKeyExchange::Psk { identity_hint }.serialize(&mut body);
                    server
                        .engine
                        .create_handshake(MessageType::ServerKeyExchange, &body)?;
                }
            }
        }

        server
            .engine
            .create_handshake(MessageType::ServerHelloDone, &[])?;
        server.engine.flush();

        if server.certificate_requested {
            Ok(State::AwaitClientCertificate)
        } else {
            Ok(State::AwaitClientKeyExchange)
        }
    }

    fn await_client_certificate(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        let Some(handshake) = server.engine.next_handshake(&[MessageType::Certificate])? else {
            return Ok(self);
        };

        let certificate = server.engine.decode(&handshake, Certificate::parse)?;
        let Some(leaf) = certificate.chain.first() else {
            return Err(server.engine.failure_with(
                AlertDescription::HandshakeFailure,
                "client certificate required",
            ));
        };

        let Some(validator) = server.engine.config().certificate_validator() else {
            return Err(Error::Config("no certificate validator".into()));
        };

        let identity = validator
            .validate_certificate_chain(&certificate.chain, server.engine.peer())
            .map_err(|r| server.engine.failure_with(r.description, r.reason))?;

        trace!("Client certificate of {} accepted", server.engine.peer());
        server.client_certificate = Some(leaf.clone());
        server.session.set_peer_identity(identity);

        Ok(State::AwaitClientKeyExchange)
    }

    fn await_client_key_exchange(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        let maybe = server
            .engine
            .next_handshake(&[MessageType::ClientKeyExchange])?;

        let Some(handshake) = maybe else {
            return Ok(self);
        };

        let (Some(suite), Some(client_random)) = (server.session.cipher_suite(), server.client_random)
        else {
            return Err(Error::InvalidState("ClientKeyExchange before ClientHello".into()));
        };

        let kx = suite.key_exchange();
        let cke = server
            .engine
            .decode(&handshake, |i| ClientKeyExchange::parse(i, kx))?;

        let premaster = match cke {
            ClientKeyExchange::Ecdhe { public_key } => {
                let Some(key_pair) = server.key_pair.as_ref() else {
                    return Err(Error::InvalidState("no ECDH key pair".into()));
                };
                key_pair.agree(&public_key).map_err(|e| {
                    server
                        .engine
                        .failure_with(AlertDescription::IllegalParameter, e)
                })?
            }
            ClientKeyExchange::Psk { identity } => {
                let Some(store) = server.engine.config().psk_store() else {
                    return Err(Error::Config("no PSK store".into()));
                };
                let Some(psk) = store.lookup(&identity, server.engine.peer()) else {
                    return Err(server.engine.failure_with(
                        AlertDescription::UnknownPskIdentity,
                        format!(
                            "unknown PSK identity {:?}",
                            String::from_utf8_lossy(&identity)
                        ),
                    ));
                };
                server
                    .session
                    .set_peer_identity(PeerIdentity::Psk { identity });
                psk_premaster_secret(&psk)
            }
        };

        let master = master_secret(&premaster, &client_random, &server.server_random)
            .map_err(Error::KeyDerivation)?;
        server
            .engine
            .derive_keys(&master, &client_random, &server.server_random)?;
        server.session.set_master_secret(master);

        if server.client_certificate.is_some() {
            Ok(State::AwaitCertificateVerify)
        } else {
            Ok(State::AwaitClientFinished)
        }
    }

    fn await_certificate_verify(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        let maybe = server
            .engine
            .next_handshake(&[MessageType::CertificateVerify])?;

        let Some(handshake) = maybe else {
            return Ok(self);
        };

        let verify = server.engine.decode(&handshake, CertificateVerify::parse)?;
        if verify.signature_algorithm != ECDSA_SECP256R1_SHA256 {
            return Err(server.engine.failure_with(
                AlertDescription::IllegalParameter,
                format!(
                    "unsupported signature algorithm {:#06x}",
                    verify.signature_algorithm
                ),
            ));
        }

        let Some(cert) = server.client_certificate.as_ref() else {
            return Err(Error::InvalidState("no client certificate".into()));
        };

        let transcript = &server.engine.transcript()[..handshake.transcript_offset];
        verify_with_certificate(cert, transcript, &verify.signature).map_err(|e| {
            server.engine.failure_with(
                AlertDescription::DecryptError,
                format!("CertificateVerify signature: {}", e),
            )
        })?;

        Ok(State::AwaitClientFinished)
    }

    fn await_client_finished(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        let Some(handshake) = server.engine.next_handshake(&[MessageType::Finished])? else {
            return Ok(self);
        };

        let finished = server.engine.decode(&handshake, Finished::parse)?;

        let Some(master) = server.session.master_secret() else {
            return Err(Error::InvalidState("no master secret".into()));
        };
        let transcript = &server.engine.transcript()[..handshake.transcript_offset];
        let expected = verify_data(master, true, transcript).map_err(Error::KeyDerivation)?;

        let is_eq: bool = finished.verify_data[..].ct_eq(&expected[..]).into();
        if !is_eq {
            return Err(server.engine.failure_with(
                AlertDescription::DecryptError,
                "client Finished verify data mismatch",
            ));
        }

        Ok(State::SendFinishedFlight)
    }

    fn send_finished_flight(self, server: &mut ServerHandshaker) -> Result<Self, Error> {
        server.engine.flight_begin(6);
        server.engine.create_change_cipher_spec()?;

        let Some(master) = server.session.master_secret() else {
            return Err(Error::InvalidState("no master secret".into()));
        };
        let verify_data =
            verify_data(master, false, server.engine.transcript()).map_err(Error::KeyDerivation)?;

        let mut body = Vec::new();
        Finished { verify_data }.serialize(&mut body);
        server.engine.create_handshake(MessageType::Finished, &body)?;

        server.engine.flight_final();
        server.engine.flush();

        debug!(
            "Handshake with {} complete: {}",
            server.engine.peer(),
            server.session.id()
        );
        Ok(State::Established)
    }
}
