use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::types::{Alert, AlertDescription, AlertLevel, ContentType};

/// Underlying cause attached to a record or handshake failure.
pub type Cause = Arc<dyn std::error::Error + Send + Sync>;

/// Errors surfaced by the handshake engine.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// A single record could not be processed.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// A semantic handshake violation. Fatal.
    #[error(transparent)]
    Handshake(#[from] HandshakeFailure),

    #[error("peer {peer} sent alert: {alert}")]
    PeerAlert { peer: SocketAddr, alert: Alert },

    /// Flight retries or the overall handshake time exhausted.
    #[error("{0} timeout")]
    Timeout(&'static str),

    /// Local key derivation failure. Fatal and never retried.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Local cryptographic failure (bad key material, exhausted counters).
    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("receive queue full")]
    ReceiveQueueFull,

    #[error("handshake aborted")]
    Aborted,

    #[error("no association with {0}")]
    NotConnected(SocketAddr),
}

impl Error {
    /// The alert to send to the peer when this error terminates a handshake.
    ///
    /// Local failures and timeouts have no alert.
    pub fn alert(&self) -> Option<Alert> {
        match self {
            Error::Record(e) => Some(e.alert()),
            Error::Handshake(e) => Some(e.alert()),
            _ => None,
        }
    }

    /// True if a fatal alert was sent or received. The session negotiated
    /// must not be resumed afterwards (RFC 5246 §7.2.2).
    pub fn invalidates_session(&self) -> bool {
        match self {
            Error::PeerAlert { alert, .. } => alert.is_fatal(),
            e => e.alert().is_some_and(|a| a.is_fatal()),
        }
    }

    /// The alert description carried by this error, if any.
    pub fn alert_description(&self) -> Option<AlertDescription> {
        self.alert().map(|a| a.description)
    }
}

/// Which layer of record processing failed.
///
/// `Decryption` is a refinement of `Parsing`, which is a refinement of
/// `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordErrorKind {
    /// Unspecified record-level problem.
    Processing,
    /// Malformed record structure.
    Parsing,
    /// Authentication or decryption failed.
    Decryption,
}

/// Failure to process one record.
#[derive(Debug, Clone, Error)]
#[error("{message} from {peer}{}: {alert}", content_type_suffix(.content_type))]
pub struct RecordError {
    kind: RecordErrorKind,
    peer: SocketAddr,
    content_type: Option<ContentType>,
    alert: Alert,
    message: String,
    #[source]
    cause: Option<Cause>,
}

fn content_type_suffix(content_type: &Option<ContentType>) -> String {
    content_type
        .map(|ct| format!(" ({})", ct))
        .unwrap_or_default()
}

impl RecordError {
    pub fn processing(
        peer: SocketAddr,
        content_type: Option<ContentType>,
        alert: Alert,
        message: impl Into<String>,
    ) -> Self {
        RecordError {
            kind: RecordErrorKind::Processing,
            peer,
            content_type,
            alert,
            message: message.into(),
            cause: None,
        }
    }

    /// A parsing failure with alert "decode error".
    pub fn parsing(
        peer: SocketAddr,
        content_type: Option<ContentType>,
        message: impl Into<String>,
    ) -> Self {
        Self::parsing_with(peer, content_type, AlertDescription::DecodeError, message)
    }

    /// A parsing failure with a more specific alert description.
    pub fn parsing_with(
        peer: SocketAddr,
        content_type: Option<ContentType>,
        description: AlertDescription,
        message: impl Into<String>,
    ) -> Self {
        RecordError {
            kind: RecordErrorKind::Parsing,
            alert: Alert::fatal(description),
            ..Self::processing(peer, content_type, Alert::fatal(description), message)
        }
    }

    /// A decryption failure. Always fatal with alert "decrypt error".
    pub fn decryption(
        peer: SocketAddr,
        content_type: Option<ContentType>,
        message: impl Into<String>,
    ) -> Self {
        RecordError {
            kind: RecordErrorKind::Decryption,
            ..Self::processing(
                peer,
                content_type,
                Alert::fatal(AlertDescription::DecryptError),
                message,
            )
        }
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn kind(&self) -> RecordErrorKind {
        self.kind
    }

    /// True for parsing failures, including decryption failures.
    pub fn is_parsing(&self) -> bool {
        matches!(
            self.kind,
            RecordErrorKind::Parsing | RecordErrorKind::Decryption
        )
    }

    pub fn is_decryption(&self) -> bool {
        self.kind == RecordErrorKind::Decryption
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn content_type(&self) -> Option<ContentType> {
        self.content_type
    }

    pub fn alert(&self) -> Alert {
        self.alert
    }

    pub fn level(&self) -> AlertLevel {
        self.alert.level
    }

    pub fn description(&self) -> AlertDescription {
        self.alert.description
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A semantic handshake violation carrying the exact alert to send back.
#[derive(Debug, Clone, Error)]
#[error("handshake with {peer} failed: {message} ({alert})")]
pub struct HandshakeFailure {
    peer: SocketAddr,
    alert: Alert,
    message: String,
    #[source]
    cause: Option<Cause>,
}

impl HandshakeFailure {
    pub fn new(peer: SocketAddr, alert: Alert, message: impl Into<String>) -> Self {
        HandshakeFailure {
            peer,
            alert,
            message: message.into(),
            cause: None,
        }
    }

    pub fn fatal(
        peer: SocketAddr,
        description: AlertDescription,
        message: impl Into<String>,
    ) -> Self {
        Self::new(peer, Alert::fatal(description), message)
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Handshake failures always concern handshake records.
    pub fn content_type(&self) -> ContentType {
        ContentType::Handshake
    }

    pub fn alert(&self) -> Alert {
        self.alert
    }

    pub fn description(&self) -> AlertDescription {
        self.alert.description
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
