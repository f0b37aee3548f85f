//! Credential collaborators: certificate chain validation and pre-shared keys.
//!
//! The handshake never decides trust itself. It hands the peer's chain to a
//! [`CertificateValidator`] and receives either a [`PeerIdentity`] or a
//! [`CertificateRejection`] naming the alert to send.

use std::fmt;
use std::net::SocketAddr;

use zeroize::Zeroizing;

use crate::certificate::{calculate_fingerprint, format_fingerprint};
use crate::types::AlertDescription;

/// Authenticated identity of the peer.
#[derive(Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    Certificate { fingerprint: [u8; 32], der: Vec<u8> },
    Psk { identity: Vec<u8> },
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerIdentity::Certificate { fingerprint, .. } => f
                .debug_tuple("Certificate")
                .field(&format_fingerprint(fingerprint))
                .finish(),
            PeerIdentity::Psk { identity } => f
                .debug_tuple("Psk")
                .field(&String::from_utf8_lossy(identity))
                .finish(),
        }
    }
}

/// A validator's refusal of a certificate chain.
#[derive(Debug, Clone, thiserror::Error)]
#[error("certificate rejected: {reason}")]
pub struct CertificateRejection {
    pub description: AlertDescription,
    pub reason: String,
}

impl CertificateRejection {
    pub fn bad_certificate(reason: impl Into<String>) -> Self {
        CertificateRejection {
            description: AlertDescription::BadCertificate,
            reason: reason.into(),
        }
    }
}

/// Decides whether a peer's certificate chain is trusted.
pub trait CertificateValidator: Send + Sync {
    /// `chain` is leaf first, DER encoded.
    fn validate_certificate_chain(
        &self,
        chain: &[Vec<u8>],
        peer: SocketAddr,
    ) -> Result<PeerIdentity, CertificateRejection>;
}

/// Pre-shared key lookup.
pub trait PskStore: Send + Sync {
    /// Responder side: the secret for an identity presented by `peer`.
    fn lookup(&self, identity: &[u8], peer: SocketAddr) -> Option<Zeroizing<Vec<u8>>>;

    /// Initiator side: which identity and secret to use towards `peer`.
    fn identity_for(
        &self,
        peer: SocketAddr,
        hint: Option<&[u8]>,
    ) -> Option<(Vec<u8>, Zeroizing<Vec<u8>>)>;

    /// Identity hint the responder announces, if any.
    fn identity_hint(&self) -> Option<Vec<u8>> {
        None
    }
}

/// Trusts exactly the leaf certificates whose SHA-256 fingerprint is pinned.
#[derive(Debug, Clone, Default)]
pub struct PinnedCertificates {
    fingerprints: Vec<[u8; 32]>,
}

impl PinnedCertificates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pin(mut self, cert_der: &[u8]) -> Self {
        self.fingerprints.push(calculate_fingerprint(cert_der));
        self
    }
}

impl CertificateValidator for PinnedCertificates {
    fn validate_certificate_chain(
        &self,
        chain: &[Vec<u8>],
        peer: SocketAddr,
    ) -> Result<PeerIdentity, CertificateRejection> {
        let Some(leaf) = chain.first() else {
            return Err(CertificateRejection::bad_certificate("empty chain"));
        };
        let fingerprint = calculate_fingerprint(leaf);
        if !self.fingerprints.contains(&fingerprint) {
            debug!(
                "Unpinned certificate from {}: {}",
                peer,
                format_fingerprint(&fingerprint)
            );
            return Err(CertificateRejection::bad_certificate(format!(
                "certificate {} is not pinned",
                format_fingerprint(&fingerprint)
            )));
        }
        Ok(PeerIdentity::Certificate {
            fingerprint,
            der: leaf.clone(),
        })
    }
}

/// Fixed table of identities and secrets.
#[derive(Default)]
pub struct StaticPskStore {
    keys: Vec<(Vec<u8>, Zeroizing<Vec<u8>>)>,
    client_identity: Option<Vec<u8>>,
    hint: Option<Vec<u8>>,
}

impl StaticPskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, identity: &[u8], secret: &[u8]) -> Self {
        self.keys
            .push((identity.to_vec(), Zeroizing::new(secret.to_vec())));
        self
    }

    /// Identity to present when acting as initiator.
    pub fn with_client_identity(mut self, identity: &[u8]) -> Self {
        self.client_identity = Some(identity.to_vec());
        self
    }

    pub fn with_hint(mut self, hint: &[u8]) -> Self {
        self.hint = Some(hint.to_vec());
        self
    }
}

impl PskStore for StaticPskStore {
    fn lookup(&self, identity: &[u8], _peer: SocketAddr) -> Option<Zeroizing<Vec<u8>>> {
        self.keys
            .iter()
            .find(|(id, _)| id == identity)
            .map(|(_, secret)| secret.clone())
    }

    fn identity_for(
        &self,
        peer: SocketAddr,
        _hint: Option<&[u8]>,
    ) -> Option<(Vec<u8>, Zeroizing<Vec<u8>>)> {
        let identity = self.client_identity.as_ref()?;
        let secret = self.lookup(identity, peer)?;
        Some((identity.clone(), secret))
    }

    fn identity_hint(&self) -> Option<Vec<u8>> {
        self.hint.clone()
    }
}

impl fmt::Debug for StaticPskStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticPskStore")
            .field("keys", &self.keys.len())
            .field("client_identity", &self.client_identity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::generate_self_signed_certificate;

    fn peer() -> SocketAddr {
        "10.0.0.1:5684".parse().unwrap()
    }

    #[test]
    fn pinned_certificate_accepted() {
        let cert = generate_self_signed_certificate().unwrap();
        let validator = PinnedCertificates::new().pin(&cert.certificate);

        let identity = validator
            .validate_certificate_chain(&[cert.certificate.clone()], peer())
            .unwrap();
        assert!(matches!(identity, PeerIdentity::Certificate { .. }));
    }

    #[test]
    fn unpinned_or_empty_chain_rejected() {
        let cert = generate_self_signed_certificate().unwrap();
        let validator = PinnedCertificates::new();

        let err = validator
            .validate_certificate_chain(&[cert.certificate], peer())
            .unwrap_err();
        assert_eq!(err.description, AlertDescription::BadCertificate);
        assert!(validator.validate_certificate_chain(&[], peer()).is_err());
    }

    #[test]
    fn psk_lookup() {
        let store = StaticPskStore::new()
            .with_key(b"client-1", b"secret")
            .with_client_identity(b"client-1");

        assert_eq!(
            store.lookup(b"client-1", peer()).map(|s| s.to_vec()),
            Some(b"secret".to_vec())
        );
        assert!(store.lookup(b"nobody", peer()).is_none());
        let (id, _) = store.identity_for(peer(), None).unwrap();
        assert_eq!(id, b"client-1");
    }
}
