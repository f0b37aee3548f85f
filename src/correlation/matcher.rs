use super::{ContextKey, CorrelationContext};

/// Decides whether a message may travel over, or be attributed to, a
/// connection.
pub trait CorrelationMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// May a message whose exchange stored `message` be sent over a
    /// connection currently described by `connection`?
    fn is_to_be_sent(
        &self,
        message: Option<&CorrelationContext>,
        connection: Option<&CorrelationContext>,
    ) -> bool;

    /// Does a response received with `response` belong to a request sent
    /// with `request`?
    fn is_response_related_to_request(
        &self,
        request: Option<&CorrelationContext>,
        response: Option<&CorrelationContext>,
    ) -> bool;
}

/// Matcher for plain datagram transports. Always matches.
#[derive(Debug, Default, Clone, Copy)]
pub struct DatagramMatcher;

impl CorrelationMatcher for DatagramMatcher {
    fn name(&self) -> &'static str {
        "datagram correlation"
    }

    fn is_to_be_sent(
        &self,
        _message: Option<&CorrelationContext>,
        _connection: Option<&CorrelationContext>,
    ) -> bool {
        true
    }

    fn is_response_related_to_request(
        &self,
        _request: Option<&CorrelationContext>,
        _response: Option<&CorrelationContext>,
    ) -> bool {
        true
    }
}

/// Matcher requiring a fixed set of keys to be equal.
///
/// A missing stored context always matches. A stored context against a
/// missing connection context never matches.
#[derive(Debug, Clone, Copy)]
pub struct KeySetMatcher {
    name: &'static str,
    keys: &'static [ContextKey],
}

impl KeySetMatcher {
    pub const fn new(name: &'static str, keys: &'static [ContextKey]) -> Self {
        KeySetMatcher { name, keys }
    }

    pub const fn stream() -> Self {
        Self::new("tcp correlation", &[ContextKey::ConnectionId])
    }

    pub const fn secure_stream() -> Self {
        Self::new(
            "tls correlation",
            &[
                ContextKey::ConnectionId,
                ContextKey::SessionId,
                ContextKey::Cipher,
            ],
        )
    }

    /// Every security parameter must match, so a rekey breaks correlation.
    pub const fn strict_secure_datagram() -> Self {
        Self::new(
            "strict dtls correlation",
            &[
                ContextKey::SessionId,
                ContextKey::ReadEpoch,
                ContextKey::WriteEpoch,
                ContextKey::Cipher,
            ],
        )
    }

    /// Only the session id must match.
    pub const fn relaxed_secure_datagram() -> Self {
        Self::new("relaxed dtls correlation", &[ContextKey::SessionId])
    }

    pub fn keys(&self) -> &'static [ContextKey] {
        self.keys
    }

    fn matches(
        &self,
        stored: Option<&CorrelationContext>,
        current: Option<&CorrelationContext>,
    ) -> bool {
        let Some(stored) = stored else {
            return true;
        };
        let Some(current) = current else {
            return false;
        };
        self.keys.iter().all(|k| stored.get(*k) == current.get(*k))
    }
}

impl CorrelationMatcher for KeySetMatcher {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_to_be_sent(
        &self,
        message: Option<&CorrelationContext>,
        connection: Option<&CorrelationContext>,
    ) -> bool {
        self.matches(message, connection)
    }

    fn is_response_related_to_request(
        &self,
        request: Option<&CorrelationContext>,
        response: Option<&CorrelationContext>,
    ) -> bool {
        self.matches(request, response)
    }
}

/// Kinds of transport binding a matcher is chosen for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Datagram,
    SecureDatagram,
    Stream,
    SecureStream,
}

/// The matcher for a transport. `strict` only affects secure datagrams.
pub fn matcher_for(transport: TransportKind, strict: bool) -> Box<dyn CorrelationMatcher> {
    match transport {
        TransportKind::Datagram => Box::new(DatagramMatcher),
        TransportKind::SecureDatagram if strict => {
            Box::new(KeySetMatcher::strict_secure_datagram())
        }
        TransportKind::SecureDatagram => Box::new(KeySetMatcher::relaxed_secure_datagram()),
        TransportKind::Stream => Box::new(KeySetMatcher::stream()),
        TransportKind::SecureStream => Box::new(KeySetMatcher::secure_stream()),
    }
}

/// Applies a matcher at the exchange boundary, logging every drop.
pub struct ExchangeFilter {
    matcher: Box<dyn CorrelationMatcher>,
}

impl ExchangeFilter {
    pub fn new(matcher: Box<dyn CorrelationMatcher>) -> Self {
        ExchangeFilter { matcher }
    }

    pub fn for_transport(transport: TransportKind, strict: bool) -> Self {
        Self::new(matcher_for(transport, strict))
    }

    pub fn matcher(&self) -> &dyn CorrelationMatcher {
        self.matcher.as_ref()
    }

    /// Returns false if the outbound message must be dropped.
    pub fn allow_send(
        &self,
        message: Option<&CorrelationContext>,
        connection: Option<&CorrelationContext>,
    ) -> bool {
        let allow = self.matcher.is_to_be_sent(message, connection);
        if !allow {
            debug!(
                "{}: drop outbound message, context {:?} does not match connection {:?}",
                self.matcher.name(),
                message,
                connection
            );
        }
        allow
    }

    /// Returns false if the response must be dropped.
    pub fn allow_response(
        &self,
        request: Option<&CorrelationContext>,
        response: Option<&CorrelationContext>,
    ) -> bool {
        let allow = self.matcher.is_response_related_to_request(request, response);
        if !allow {
            debug!(
                "{}: drop response, context {:?} does not match request {:?}",
                self.matcher.name(),
                response,
                request
            );
        }
        allow
    }
}
