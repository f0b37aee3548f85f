//! Certificate helpers: self-signed generation and SHA-256 fingerprints.

use rcgen::{
    Certificate as RcgenCertificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    PKCS_ECDSA_P256_SHA256,
};
use sha2::{Digest, Sha256};
use std::fmt;

/// Certificate utility error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertificateError {
    #[error("certificate generation failed")]
    GenerationFailed,
}

/// Certificate and private key pair
#[derive(Clone)]
pub struct DtlsCertificate {
    /// Certificate in DER format
    pub certificate: Vec<u8>,
    /// PKCS#8 private key in DER format
    pub private_key: Vec<u8>,
}

/// Generate a self-signed P-256 certificate with the given common name.
pub fn generate_certificate(common_name: &str) -> Result<DtlsCertificate, CertificateError> {
    let key_pair = KeyPair::generate(&PKCS_ECDSA_P256_SHA256)
        .map_err(|_| CertificateError::GenerationFailed)?;

    let mut params = CertificateParams::new(vec![common_name.to_string()]);

    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::OrganizationName, "dshake".to_string());
    distinguished_name.push(DnType::CommonName, common_name.to_string());
    params.distinguished_name = distinguished_name;
    params.is_ca = IsCa::NoCa;
    params.alg = &PKCS_ECDSA_P256_SHA256;
    params.key_pair = Some(key_pair);

    let not_before = time::OffsetDateTime::now_utc();
    params.not_before = not_before;
    params.not_after = not_before + time::Duration::days(365);

    let cert =
        RcgenCertificate::from_params(params).map_err(|_| CertificateError::GenerationFailed)?;

    let certificate = cert
        .serialize_der()
        .map_err(|_| CertificateError::GenerationFailed)?;
    let private_key = cert.serialize_private_key_der();

    Ok(DtlsCertificate {
        certificate,
        private_key,
    })
}

/// Generate a self-signed certificate named "DTLS Peer".
pub fn generate_self_signed_certificate() -> Result<DtlsCertificate, CertificateError> {
    generate_certificate("DTLS Peer")
}

/// SHA-256 over the DER certificate.
pub fn calculate_fingerprint(cert_der: &[u8]) -> [u8; 32] {
    Sha256::digest(cert_der).into()
}

/// Format a fingerprint as a colon-separated hex string
/// Example: "AF:12:F6:..."
pub fn format_fingerprint(fingerprint: &[u8]) -> String {
    fingerprint
        .iter()
        .map(|byte| format!("{:02X}", byte))
        .collect::<Vec<String>>()
        .join(":")
}

impl DtlsCertificate {
    pub fn fingerprint(&self) -> [u8; 32] {
        calculate_fingerprint(&self.certificate)
    }

    pub fn fingerprint_str(&self) -> String {
        format_fingerprint(&self.fingerprint())
    }
}

impl fmt::Debug for DtlsCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DtlsCertificate")
            .field("certificate", &self.certificate.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_certificate() {
        let cert = generate_self_signed_certificate().unwrap();
        assert!(!cert.certificate.is_empty());
        assert!(!cert.private_key.is_empty());
        assert_ne!(
            cert.fingerprint(),
            generate_self_signed_certificate().unwrap().fingerprint()
        );
    }

    #[test]
    fn fingerprint_formatting() {
        assert_eq!(format_fingerprint(&[0xAF, 0x12, 0xF6]), "AF:12:F6");

        let cert = generate_certificate("node-a").unwrap();
        let formatted = cert.fingerprint_str();
        assert_eq!(formatted.len(), 95);
        assert!(formatted.split(':').all(|s| s.len() == 2));
    }
}
