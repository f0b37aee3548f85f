// DTLS 1.2 client handshake flow (RFC 6347 §4.2.4):
//
// 1. Client sends ClientHello (flight 1)
// 2. Server may answer with HelloVerifyRequest (flight 2)
//    - Client repeats the ClientHello with the cookie (flight 3). Neither the
//      first ClientHello nor the HelloVerifyRequest are part of the transcript.
// 3. Server sends flight 4:
//    - ServerHello
//    - ECDHE: Certificate, ServerKeyExchange (signed), optional CertificateRequest
//    - PSK: optional ServerKeyExchange carrying an identity hint
//    - ServerHelloDone
// 4. Client sends flight 5:
//    - Certificate (if requested), ClientKeyExchange,
//      CertificateVerify (if a certificate was sent), ChangeCipherSpec, Finished
// 5. Server sends flight 6: ChangeCipherSpec, Finished
//
// The client verifies the server Finished and the session is established.

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
    Finished, HelloVerifyRequest, MessageType, ServerHello, ServerKeyExchange,
};
use crate::types::{
    AlertDescription, CipherSuite, CompressionMethod, Cookie, KeyExchange, ProtocolVersion, Random,
};
use crate::{Error, Session};

/// Full handshake, initiator side.
pub struct ClientHandshaker {
    /// Current client state.
    state: State,

    /// Engine in common between server and client.
    pub(super) engine: Engine,

    /// The session in negotiation. Carries the cached id when resuming.
    pub(super) session: Session,

    /// Random unique data. Used for ClientHello.
    pub(super) random: Random,

    pub(super) server_random: Option<Random>,

    /// Cookie is sent by the server in the HelloVerifyRequest.
    cookie: Cookie,

    /// Suites offered in the ClientHello, in order of preference.
    pub(super) offered: Vec<CipherSuite>,

    /// Leaf certificate of the server, DER.
    server_certificate: Option<Vec<u8>>,

    /// Server ephemeral ECDH point.
    server_public_key: Option<Vec<u8>>,

    /// PSK identity hint from the ServerKeyExchange.
    identity_hint: Option<Vec<u8>>,

    /// Whether the server requested client authentication
    certificate_requested: bool,

    /// Hand the ServerHello to the caller instead of processing it.
    pub(super) defer_server_hello: bool,

    deferred_server_hello: Option<ServerHello>,
}

impl ClientHandshaker {
    pub(crate) fn new(mut engine: Engine, session: Session) -> Result<Self, Error> {
        let mut offered: Vec<CipherSuite> = engine.config().usable_cipher_suites().collect();

        // A resumed session's suite goes first.
        if let Some(suite) = session.cipher_suite() {
            if let Some(pos) = offered.iter().position(|s| *s == suite) {
                offered.remove(pos);
                offered.insert(0, suite);
            }
        }

        if offered.is_empty() {
            return Err(Error::Config(
                "no cipher suite usable with the configured credentials".into(),
            ));
        }

        let random = Random::new(&mut engine.rng);

        Ok(ClientHandshaker {
            state: State::SendClientHello,
            engine,
            session,
            random,
            server_random: None,
            cookie: Cookie::default(),
            offered,
            server_certificate: None,
            server_public_key: None,
            identity_hint: None,
            certificate_requested: false,
            defer_server_hello: false,
            deferred_server_hello: None,
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

    pub(super) fn take_server_hello(&mut self) -> Option<ServerHello> {
        self.deferred_server_hello.take()
    }

    /// Continue with a full handshake from a ServerHello already taken off
    /// the engine.
    pub(super) fn continue_full(&mut self, server_hello: ServerHello) -> Result<(), Error> {
        self.defer_server_hello = false;
        self.state = self.process_server_hello(server_hello)?;
        self.make_progress()
    }

    pub(super) fn process_server_hello(&mut self, sh: ServerHello) -> Result<State, Error> {
        if sh.server_version != ProtocolVersion::DTLS1_2 {
            return Err(self.engine.failure_with(
                AlertDescription::ProtocolVersion,
                format!("server version {:?}", sh.server_version),
            ));
        }

        let suite = CipherSuite::from_u16(sh.cipher_suite).filter(|s| self.offered.contains(s));
        let Some(suite) = suite else {
            return Err(self.engine.failure_with(
                AlertDescription::IllegalParameter,
                format!("server selected cipher suite {:#06x} we did not offer", sh.cipher_suite),
            ));
        };

        if sh.compression_method != CompressionMethod::Null {
            return Err(self.engine.failure_with(
                AlertDescription::IllegalParameter,
                "server selected a compression method we did not offer",
            ));
        }

        debug!(
            "ServerHello from {}: {} session {}",
            self.engine.peer(),
            suite,
            sh.session_id
        );

        self.server_random = Some(sh.random);
        self.session.set_id(sh.session_id);
        self.session.set_cipher_suite(suite);
        self.session.set_compression(CompressionMethod::Null);

        Ok(match suite.key_exchange() {
            KeyExchange::Ecdhe => State::AwaitCertificate,
            KeyExchange::Psk => State::AwaitPskServerKeyExchange,
        })
    }

    pub(super) fn into_completion(self) -> super::Completion {
        self.engine.into_completion(self.session)
    }
}

impl Role for ClientHandshaker {
    fn engine(&self) -> &Engine {
        &self.engine
    }

    fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    fn make_progress(&mut self) -> Result<(), Error> {
        ClientHandshaker::make_progress(self)
    }

    fn state(&self) -> HandshakeState {
        match self.state {
            State::AwaitServerFinished => HandshakeState::VerifyingFinal,
            State::Established => HandshakeState::Established,
            _ => HandshakeState::AwaitingFlight,
        }
    }

    fn session(&self) -> &Session {
        &self.session
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum State {
    SendClientHello,
    AwaitServerHello,
    AwaitCertificate,
    AwaitServerKeyExchange,
    AwaitCertificateRequest,
    AwaitPskServerKeyExchange,
    AwaitServerHelloDone,
    SendClientFlight,
    AwaitServerFinished,
    Established,
}

impl State {
    fn make_progress(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        match self {
            State::SendClientHello => self.send_client_hello(client),
            State::AwaitServerHello => self.await_server_hello(client),
            State::AwaitCertificate => self.await_certificate(client),
            State::AwaitServerKeyExchange => self.await_server_key_exchange(client),
            State::AwaitCertificateRequest => self.await_certificate_request(client),
            State::AwaitPskServerKeyExchange => self.await_psk_server_key_exchange(client),
            State::AwaitServerHelloDone => self.await_server_hello_done(client),
            State::SendClientFlight => self.send_client_flight(client),
            State::AwaitServerFinished => self.await_server_finished(client),
            State::Established => Ok(self),
        }
    }

    fn send_client_hello(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let flight_no = if client.cookie.is_empty() { 1 } else { 3 };
        client.engine.flight_begin(flight_no);

        let extensions = if client
            .offered
            .iter()
            .any(|s| s.key_exchange() == KeyExchange::Ecdhe)
        {
            vec![
                Extension::supported_groups(),
                Extension::ec_point_formats(),
                Extension::signature_algorithms(),
            ]
        } else {
            Vec::new()
        };

        let client_hello = ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: client.random,
            session_id: client.session.id().clone(),
            cookie: client.cookie.clone(),
            cipher_suites: client.offered.iter().map(|s| s.as_u16()).collect(),
            compression_methods: vec![CompressionMethod::Null],
            extensions,
        };

        let mut body = Vec::new();
        client_hello.serialize(&mut body);
        client
            .engine
            .create_handshake(MessageType::ClientHello, &body)?;
        client.engine.flush();

        Ok(State::AwaitServerHello)
    }

    fn await_server_hello(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let maybe = client.engine.next_handshake(&[
            MessageType::HelloVerifyRequest,
            MessageType::ServerHello,
        ])?;

        let Some(handshake) = maybe else {
            return Ok(self);
        };

        if handshake.msg_type == MessageType::HelloVerifyRequest {
            if !client.cookie.is_empty() {
                return Err(client.engine.failure_with(
                    AlertDescription::UnexpectedMessage,
                    "second HelloVerifyRequest",
                ));
            }
            let hvr = client.engine.decode(&handshake, HelloVerifyRequest::parse)?;
            if hvr.cookie.is_empty() {
                return Err(client.engine.failure_with(
                    AlertDescription::IllegalParameter,
                    "HelloVerifyRequest without cookie",
                ));
            }
            debug!(
                "HelloVerifyRequest from {} ({} byte cookie)",
                client.engine.peer(),
                hvr.cookie.as_bytes().len()
            );
            client.cookie = hvr.cookie;
            client.engine.reset_transcript();
            return Ok(State::SendClientHello);
        }

        let server_hello = client.engine.decode(&handshake, ServerHello::parse)?;

        if client.defer_server_hello {
            client.deferred_server_hello = Some(server_hello);
            return Ok(self);
        }

        client.process_server_hello(server_hello)
    }

    fn await_certificate(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let Some(handshake) = client.engine.next_handshake(&[MessageType::Certificate])? else {
            return Ok(self);
        };

        let certificate = client.engine.decode(&handshake, Certificate::parse)?;
        let Some(leaf) = certificate.chain.first() else {
            return Err(client.engine.failure_with(
                AlertDescription::BadCertificate,
                "empty server certificate chain",
            ));
        };

        let Some(validator) = client.engine.config().certificate_validator() else {
            return Err(Error::Config("no certificate validator".into()));
        };

        let identity = validator
            .validate_certificate_chain(&certificate.chain, client.engine.peer())
            .map_err(|r| client.engine.failure_with(r.description, r.reason))?;

        trace!("Server certificate of {} accepted", client.engine.peer());
        client.server_certificate = Some(leaf.clone());
        client.session.set_peer_identity(identity);

        Ok(State::AwaitServerKeyExchange)
    }

    fn await_server_key_exchange(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let maybe = client
            .engine
            .next_handshake(&[MessageType::ServerKeyExchange])?;

        let Some(handshake) = maybe else {
            return Ok(self);
        };

        let ske = client.engine.decode(&handshake, |i| {
            ServerKeyExchange::parse(i, KeyExchange::Ecdhe)
        })?;

        let ServerKeyExchange::Ecdhe {
            named_curve,
            public_key,
            signature_algorithm,
            signature,
        } = ske
        else {
            return Err(client.engine.decode_error(
                MessageType::ServerKeyExchange,
                "expected ECDHE parameters".into(),
            ));
        };

        if named_curve != SECP256R1 {
            return Err(client.engine.failure_with(
                AlertDescription::IllegalParameter,
                format!("unsupported named curve {}", named_curve),
            ));
        }
        if signature_algorithm != ECDSA_SECP256R1_SHA256 {
            return Err(client.engine.failure_with(
                AlertDescription::IllegalParameter,
                format!("unsupported signature algorithm {:#06x}", signature_algorithm),
            ));
        }

        let (Some(server_random), Some(cert)) =
            (client.server_random, client.server_certificate.as_ref())
        else {
            return Err(Error::InvalidState("ServerKeyExchange before ServerHello".into()));
        };

        let mut signed = Vec::with_capacity(64 + 4 + public_key.len());
        signed.extend_from_slice(client.random.as_bytes());
        signed.extend_from_slice(server_random.as_bytes());
        signed.extend_from_slice(&ServerKeyExchange::ecdh_params(named_curve, &public_key));

        verify_with_certificate(cert, &signed, &signature).map_err(|e| {
            client.engine.failure_with(
                AlertDescription::DecryptError,
                format!("ServerKeyExchange signature: {}", e),
            )
        })?;

        client.server_public_key = Some(public_key);
        Ok(State::AwaitCertificateRequest)
    }

    fn await_certificate_request(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let maybe = client.engine.next_handshake(&[
            MessageType::CertificateRequest,
            MessageType::ServerHelloDone,
        ])?;

        let Some(handshake) = maybe else {
            return Ok(self);
        };

        if handshake.msg_type == MessageType::ServerHelloDone {
            return server_hello_done(client, &handshake.body);
        }

        let request = client.engine.decode(&handshake, CertificateRequest::parse)?;
        debug!(
            "CertificateRequest from {} ({} signature algorithms)",
            client.engine.peer(),
            request.signature_algorithms.len()
        );
        client.certificate_requested = true;

        Ok(State::AwaitServerHelloDone)
    }

    fn await_psk_server_key_exchange(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let maybe = client.engine.next_handshake(&[
            MessageType::ServerKeyExchange,
            MessageType::ServerHelloDone,
        ])?;

        let Some(handshake) = maybe else {
            return Ok(self);
        };

        if handshake.msg_type == MessageType::ServerHelloDone {
            return server_hello_done(client, &handshake.body);
        }

        let ske = client
            .engine
            .decode(&handshake, |i| ServerKeyExchange::parse(i, KeyExchange::Psk))?;
        if let ServerKeyExchange::Psk { identity_hint } = ske {
            client.identity_hint = Some(identity_hint);
        }

        Ok(State::AwaitServerHelloDone)
    }

    fn await_server_hello_done(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let maybe = client
            .engine
            .next_handshake(&[MessageType::ServerHelloDone])?;

        let Some(handshake) = maybe else {
            return Ok(self);
        };

        server_hello_done(client, &handshake.body)
    }

    fn send_client_flight(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        client.engine.flight_begin(5);

        let (Some(suite), Some(server_random)) = (client.session.cipher_suite(), client.server_random)
        else {
            return Err(Error::InvalidState("client flight before ServerHello".into()));
        };
        let peer = client.engine.peer();

        let mut signer = None;

        let premaster = match suite.key_exchange() {
            KeyExchange::Ecdhe => {
                if client.certificate_requested {
                    let own = client.engine.config().certificate().cloned();
                    let chain = own.iter().map(|c| c.certificate.clone()).collect();
                    if let Some(own) = own {
                        signer = Some(EcdsaSigner::from_pkcs8(&own.private_key).map_err(Error::Crypto)?);
                    } else {
                        debug!("No certificate to send to {}", peer);
                    }
                    let mut body = Vec::new();
                    Certificate { chain }.serialize(&mut body);
                    client
                        .engine
                        .create_handshake(MessageType::Certificate, &body)?;
                }

                let Some(server_public_key) = client.server_public_key.as_ref() else {
                    return Err(Error::InvalidState("no server ECDH parameters".into()));
                };

                let key_pair = EcdhKeyPair::generate();
                let premaster = key_pair.agree(server_public_key).map_err(|e| {
                    client
                        .engine
                        .failure_with(AlertDescription::IllegalParameter, e)
                })?;

                let mut body = Vec::new();
                ClientKeyExchange::Ecdhe {
                    public_key: key_pair.public_key().to_vec(),
                }
                .serialize(&mut body);
                client
                    .engine
                    .create_handshake(MessageType::ClientKeyExchange, &body)?;

                premaster
            }
            KeyExchange::Psk => {
                let Some(store) = client.engine.config().psk_store() else {
                    return Err(Error::Config("no PSK store".into()));
                };
                let Some((identity, psk)) = store.identity_for(peer, client.identity_hint.as_deref())
                else {
                    return Err(Error::Config(format!("no PSK identity for {}", peer)));
                };

                let mut body = Vec::new();
                ClientKeyExchange::Psk {
                    identity: identity.clone(),
                }
                .serialize(&mut body);
                client
                    .engine
                    .create_handshake(MessageType::ClientKeyExchange, &body)?;

                client
                    .session
                    .set_peer_identity(PeerIdentity::Psk { identity });
                psk_premaster_secret(&psk)
            }
        };

        let master = master_secret(&premaster, &client.random, &server_random)
            .map_err(Error::KeyDerivation)?;
        client
            .engine
            .derive_keys(&master, &client.random, &server_random)?;

        if let Some(signer) = signer {
            let signature = signer.sign(client.engine.transcript()).map_err(Error::Crypto)?;
            let mut body = Vec::new();
            CertificateVerify {
                signature_algorithm: ECDSA_SECP256R1_SHA256,
                signature,
            }
            .serialize(&mut body);
            client
                .engine
                .create_handshake(MessageType::CertificateVerify, &body)?;
        }

        client.engine.create_change_cipher_spec()?;

        let verify_data =
            verify_data(&master, true, client.engine.transcript()).map_err(Error::KeyDerivation)?;
        let mut body = Vec::new();
        Finished { verify_data }.serialize(&mut body);
        client.engine.create_handshake(MessageType::Finished, &body)?;

        client.session.set_master_secret(master);
        client.engine.flush();

        Ok(State::AwaitServerFinished)
    }

    fn await_server_finished(self, client: &mut ClientHandshaker) -> Result<Self, Error> {
        let Some(handshake) = client.engine.next_handshake(&[MessageType::Finished])? else {
            return Ok(self);
        };

        let finished = client.engine.decode(&handshake, Finished::parse)?;

        let Some(master) = client.session.master_secret() else {
            return Err(Error::InvalidState("no master secret".into()));
        };
        let transcript = &client.engine.transcript()[..handshake.transcript_offset];
        let expected = verify_data(master, false, transcript).map_err(Error::KeyDerivation)?;

        let is_eq: bool = finished.verify_data[..].ct_eq(&expected[..]).into();
        if !is_eq {
            return Err(client.engine.failure_with(
                AlertDescription::DecryptError,
                "server Finished verify data mismatch",
            ));
        }

        client.engine.flight_stop_resend_timers();
        debug!(
            "Handshake with {} complete: {}",
            client.engine.peer(),
            client.session.id()
        );

        Ok(State::Established)
    }
}

fn server_hello_done(client: &ClientHandshaker, body: &[u8]) -> Result<State, Error> {
    if !body.is_empty() {
        return Err(client.engine.decode_error(
            MessageType::ServerHelloDone,
            format!("{} trailing bytes", body.len()),
        ));
    }
    Ok(State::SendClientFlight)
}
