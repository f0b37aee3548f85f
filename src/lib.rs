//! dshake
//!
//! A DTLS 1.2 handshake engine for unreliable datagram transports.
//!
//! The crate negotiates secure sessions between two peers: full handshakes
//! with PSK or ECDHE-ECDSA key exchange, abbreviated handshakes resuming an
//! earlier session, stateless cookie exchange on the responder, and
//! flight retransmission under loss, reordering and duplication. It does no
//! network I/O itself; datagrams go out through a [`RecordLayer`] and come in
//! through [`Endpoint::handle_datagram`] or [`Handshaker::handle_datagram`].
//!
//! # Driving a handshake
//!
//! A [`Handshaker`] is created by [`Handshakers::create`] for one of four
//! roles (full or resuming, client or server) and driven by three inputs:
//! received datagrams, timer expiry and abort. [`Endpoint`] does this for
//! every peer of a socket, and [`driver::spawn`] runs a single handshake on
//! a tokio task.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use dshake::{Config, Endpoint, StaticPskStore};
//! # use dshake::{RecordLayer, DeliveryError, SessionListener, Session, Error};
//! # struct Udp;
//! # impl RecordLayer for Udp {
//! #     fn send(&self, _: std::net::SocketAddr, _: &[Vec<u8>]) -> Result<(), DeliveryError> { Ok(()) }
//! # }
//! # struct Log;
//! # impl SessionListener for Log {
//! #     fn on_handshake_started(&self) {}
//! #     fn on_session_established(&self, _: &Session) {}
//! #     fn on_handshake_failed(&self, _: &Error) {}
//! # }
//!
//! let psk = StaticPskStore::new()
//!     .with_key(b"device-1", b"secret")
//!     .with_client_identity(b"device-1");
//! let config = Config::builder().psk_store(Arc::new(psk)).build().unwrap();
//!
//! let mut endpoint = Endpoint::new(Arc::new(config), Arc::new(Udp), Arc::new(Log));
//! let server = "192.0.2.1:5684".parse().unwrap();
//! endpoint.connect(server, Instant::now()).unwrap();
//!
//! // feed datagrams from the socket:
//! // endpoint.handle_datagram(server, &datagram, Instant::now());
//! // and wake up for timers:
//! // endpoint.poll_timeout()
//! ```
//!
//! # Correlation
//!
//! [`correlation`] decides whether a message may travel over a given
//! connection or secure session, for plain datagram, stream and secure
//! transports.

#![forbid(unsafe_code)]
#![warn(clippy::all)]
#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;

mod certificate;
mod config;
pub mod correlation;
mod credentials;
pub mod crypto;
pub mod driver;
mod endpoint;
mod error;
mod event;
mod handshake;
pub mod message;
mod record;
mod rng;
mod session;
mod timer;
pub mod types;
mod window;

pub use certificate::{
    calculate_fingerprint, format_fingerprint, generate_certificate,
    generate_self_signed_certificate, CertificateError, DtlsCertificate,
};
pub use config::{Config, ConfigBuilder};
pub use credentials::{
    CertificateRejection, CertificateValidator, PeerIdentity, PinnedCertificates, PskStore,
    StaticPskStore,
};
pub use endpoint::Endpoint;
pub use error::{Error, HandshakeFailure, RecordError, RecordErrorKind};
pub use event::{SessionEvent, SessionListener};
pub use handshake::{
    ClientHandshaker, HandshakeKind, HandshakeParams, HandshakeParamsBuilder, HandshakeState,
    Handshaker, Handshakers, ResumingClientHandshaker, ResumingServerHandshaker, ServerHandshaker,
};
pub use record::{DeliveryError, ReadState, Record, RecordLayer, WriteState};
pub use rng::SeededRng;
pub use session::{InMemorySessionCache, Session, SessionCache};
pub use window::ReplayWindow;
