//! Ephemeral secp256r1 key agreement.

use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use rand_core::OsRng;
use zeroize::Zeroizing;

/// NamedCurve secp256r1 (RFC 8422).
pub const SECP256R1: u16 = 23;

/// Our half of an ECDHE exchange.
pub struct EcdhKeyPair {
    secret: EphemeralSecret,
    public_key: Vec<u8>,
}

impl EcdhKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public_key = PublicKey::from(&secret).to_sec1_bytes().to_vec();
        EcdhKeyPair { secret, public_key }
    }

    /// Uncompressed SEC1 encoding of our public key.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// Compute the shared secret (the premaster secret for ECDHE suites).
    pub fn agree(&self, peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, String> {
        let peer = PublicKey::from_sec1_bytes(peer_public)
            .map_err(|_| "Invalid P-256 public key".to_string())?;
        let shared = self.secret.diffie_hellman(&peer);
        Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
    }
}

impl std::fmt::Debug for EcdhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcdhKeyPair")
            .field("public_key", &self.public_key.len())
            .finish()
    }
}
