//! Correlation of messages with the connection or secure session they
//! travelled over.
//!
//! A transport produces a [`CorrelationContext`] whenever it establishes or
//! re-establishes a connection or secure session. A [`CorrelationMatcher`]
//! compares the context stored with an outbound request against the context
//! of the connection about to carry a message, and decides whether the
//! message may cross. A mismatch is a silent drop, never an error.

mod matcher;

pub use matcher::{matcher_for, CorrelationMatcher, DatagramMatcher, KeySetMatcher};
pub use matcher::{ExchangeFilter, TransportKind};

use std::collections::BTreeMap;
use std::fmt;

use crate::types::{CipherSuite, SessionId};
use crate::Error;

/// Keys a correlation context may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContextKey {
    ConnectionId,
    SessionId,
    Cipher,
    ReadEpoch,
    WriteEpoch,
}

impl ContextKey {
    pub fn name(&self) -> &'static str {
        match self {
            ContextKey::ConnectionId => "CONNECTION_ID",
            ContextKey::SessionId => "SESSION_ID",
            ContextKey::Cipher => "CIPHER",
            ContextKey::ReadEpoch => "READ_EPOCH",
            ContextKey::WriteEpoch => "WRITE_EPOCH",
        }
    }
}

/// Immutable key/value description of a connection or secure session.
///
/// Two contexts are equal only if they carry the same keys with the same
/// values.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CorrelationContext {
    entries: BTreeMap<ContextKey, String>,
}

impl CorrelationContext {
    /// Context of a plain datagram transport. Carries nothing.
    pub fn datagram() -> Self {
        Self::default()
    }

    pub fn stream(connection_id: impl Into<String>) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(ContextKey::ConnectionId, connection_id.into());
        CorrelationContext { entries }
    }

    pub fn secure_stream(
        connection_id: impl Into<String>,
        session_id: &SessionId,
        cipher: impl Into<String>,
    ) -> Self {
        let mut ctx = Self::stream(connection_id);
        ctx.insert_session_id(session_id);
        ctx.entries.insert(ContextKey::Cipher, cipher.into());
        ctx
    }

    /// Context of a secure datagram association. Absent values are left out.
    pub fn secure_datagram(
        session_id: &SessionId,
        read_epoch: Option<u16>,
        write_epoch: Option<u16>,
        cipher: Option<CipherSuite>,
    ) -> Self {
        let mut ctx = Self::default();
        ctx.insert_session_id(session_id);
        if let Some(epoch) = read_epoch {
            ctx.entries.insert(ContextKey::ReadEpoch, epoch.to_string());
        }
        if let Some(epoch) = write_epoch {
            ctx.entries.insert(ContextKey::WriteEpoch, epoch.to_string());
        }
        if let Some(cipher) = cipher {
            ctx.entries.insert(ContextKey::Cipher, cipher.name().to_string());
        }
        ctx
    }

    fn insert_session_id(&mut self, session_id: &SessionId) {
        if !session_id.is_empty() {
            self.entries
                .insert(ContextKey::SessionId, session_id.to_hex());
        }
    }

    pub fn get(&self, key: ContextKey) -> Option<&str> {
        self.entries.get(&key).map(|v| v.as_str())
    }

    pub fn connection_id(&self) -> Option<&str> {
        self.get(ContextKey::ConnectionId)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.get(ContextKey::SessionId)
    }

    pub fn cipher(&self) -> Option<&str> {
        self.get(ContextKey::Cipher)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ContextKey, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl fmt::Debug for CorrelationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(k, v)| (k.name(), v)))
            .finish()
    }
}

/// Security parameters of a TLS stream, once its handshake finished.
#[derive(Debug, Clone)]
pub struct TlsStreamInfo {
    pub session_id: SessionId,
    pub cipher: String,
}

/// A stream connection as seen by the transport binding.
#[derive(Debug, Clone)]
pub struct StreamConnection {
    connection_id: String,
    tls: Option<TlsStreamInfo>,
}

impl StreamConnection {
    pub fn plain(connection_id: impl Into<String>) -> Self {
        StreamConnection {
            connection_id: connection_id.into(),
            tls: None,
        }
    }

    pub fn secure(connection_id: impl Into<String>, tls: TlsStreamInfo) -> Self {
        StreamConnection {
            connection_id: connection_id.into(),
            tls: Some(tls),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Context for messages carried by this connection.
    ///
    /// A secure connection whose session id is still empty has not finished
    /// its handshake and has no context yet.
    pub fn correlation_context(&self) -> Result<CorrelationContext, Error> {
        let Some(tls) = &self.tls else {
            return Ok(CorrelationContext::stream(self.connection_id.clone()));
        };

        if tls.session_id.is_empty() {
            return Err(Error::InvalidState(format!(
                "TLS session of connection {} not established",
                self.connection_id
            )));
        }

        Ok(CorrelationContext::secure_stream(
            self.connection_id.clone(),
            &tls.session_id,
            tls.cipher.clone(),
        ))
    }
}
