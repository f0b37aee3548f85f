//! ECDSA P-256 signing with SHA-256, and verification against a peer certificate.

use der::Decode;
use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use sha2::{Digest, Sha256};
use spki::ObjectIdentifier;
use x509_cert::Certificate as X509Certificate;

/// SignatureAndHashAlgorithm ecdsa_secp256r1_sha256.
pub const ECDSA_SECP256R1_SHA256: u16 = 0x0403;

const OID_EC_PUBLIC_KEY: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.2.1");
const OID_P256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.3.1.7");

/// Signing key loaded from a PKCS#8 DER private key.
#[derive(Clone)]
pub struct EcdsaSigner {
    key: SigningKey,
}

impl EcdsaSigner {
    pub fn from_pkcs8(key_der: &[u8]) -> Result<Self, String> {
        let key = SigningKey::from_pkcs8_der(key_der)
            .map_err(|e| format!("Failed to parse P-256 PKCS#8 key: {}", e))?;
        Ok(EcdsaSigner { key })
    }

    /// Sign SHA-256(data), returning an ASN.1 DER signature.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, String> {
        let hash = Sha256::digest(data);
        let signature: Signature = self
            .key
            .sign_prehash(&hash)
            .map_err(|_| "Signing failed".to_string())?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

impl std::fmt::Debug for EcdsaSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EcdsaSigner").field(&"P-256").finish()
    }
}

/// Verify a DER ECDSA signature over SHA-256(data) with the key in `cert_der`.
pub fn verify_with_certificate(cert_der: &[u8], data: &[u8], signature: &[u8]) -> Result<(), String> {
    let cert = X509Certificate::from_der(cert_der)
        .map_err(|e| format!("Failed to parse certificate: {e}"))?;
    let spki = &cert.tbs_certificate.subject_public_key_info;

    if spki.algorithm.oid != OID_EC_PUBLIC_KEY {
        return Err(format!(
            "Unsupported public key algorithm: {}",
            spki.algorithm.oid
        ));
    }

    let curve_oid: ObjectIdentifier = spki
        .algorithm
        .parameters
        .as_ref()
        .ok_or("Missing EC curve parameter in certificate")?
        .decode_as()
        .map_err(|_| "Invalid EC curve parameter in certificate".to_string())?;

    if curve_oid != OID_P256 {
        return Err(format!("Unsupported EC curve: {}", curve_oid));
    }

    let pubkey_bytes = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| "Invalid EC subject_public_key bitstring".to_string())?;

    let verifying_key = VerifyingKey::from_sec1_bytes(pubkey_bytes)
        .map_err(|_| "Invalid P-256 public key".to_string())?;
    let sig = Signature::from_der(signature).map_err(|_| "Invalid signature format".to_string())?;

    let hash = Sha256::digest(data);
    verifying_key
        .verify_prehash(&hash, &sig)
        .map_err(|_| "ECDSA signature verification failed".to_string())
}
