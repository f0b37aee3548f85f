use std::sync::Arc;
use std::time::Duration;

use crate::certificate::DtlsCertificate;
use crate::credentials::{CertificateValidator, PskStore};
use crate::crypto::EcdsaSigner;
use crate::types::CipherSuite;
use crate::Error;

const MIN_MTU: usize = 256;

/// Handshake engine configuration
#[derive(Clone)]
pub struct Config {
    mtu: usize,
    max_queue_rx: usize,
    max_fragmented_size: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    max_record_failures: usize,
    require_client_certificate: bool,
    cipher_suites: Vec<CipherSuite>,
    certificate: Option<DtlsCertificate>,
    certificate_validator: Option<Arc<dyn CertificateValidator>>,
    psk_store: Option<Arc<dyn PskStore>>,
    rng_seed: Option<u64>,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            mtu: 1150,
            max_queue_rx: 30,
            max_fragmented_size: 16_384,
            flight_start_rto: Duration::from_secs(1),
            flight_max_rto: Duration::from_secs(60),
            flight_retries: 4,
            handshake_timeout: Duration::from_secs(40),
            max_record_failures: 8,
            require_client_certificate: true,
            cipher_suites: CipherSuite::ALL.to_vec(),
            certificate: None,
            certificate_validator: None,
            psk_store: None,
            rng_seed: None,
        }
    }

    /// Max transmission unit.
    ///
    /// The largest datagrams a flight is packed into.
    #[inline(always)]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Max amount of records from a future epoch to hold back until the
    /// peer's ChangeCipherSpec arrives.
    #[inline(always)]
    pub fn max_queue_rx(&self) -> usize {
        self.max_queue_rx
    }

    /// Largest handshake message accepted for reassembly.
    #[inline(always)]
    pub fn max_fragmented_size(&self) -> usize {
        self.max_fragmented_size
    }

    /// Time of first retry.
    ///
    /// Every flight restarts with this value.
    #[inline(always)]
    pub fn flight_start_rto(&self) -> Duration {
        self.flight_start_rto
    }

    /// Ceiling for the doubled retransmission timeout.
    #[inline(always)]
    pub fn flight_max_rto(&self) -> Duration {
        self.flight_max_rto
    }

    /// Max number of retries per flight.
    #[inline(always)]
    pub fn flight_retries(&self) -> usize {
        self.flight_retries
    }

    /// Timeout for the entire handshake, regardless of flights.
    #[inline(always)]
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Number of discarded records after which a handshake is aborted.
    #[inline(always)]
    pub fn max_record_failures(&self) -> usize {
        self.max_record_failures
    }

    /// For a server, require a client certificate.
    ///
    /// Only applies to certificate based cipher suites.
    #[inline(always)]
    pub fn require_client_certificate(&self) -> bool {
        self.require_client_certificate
    }

    /// Cipher suites in order of preference.
    #[inline(always)]
    pub fn cipher_suites(&self) -> &[CipherSuite] {
        &self.cipher_suites
    }

    /// Local certificate and private key.
    #[inline(always)]
    pub fn certificate(&self) -> Option<&DtlsCertificate> {
        self.certificate.as_ref()
    }

    /// Validator consulted for the peer's certificate chain.
    #[inline(always)]
    pub fn certificate_validator(&self) -> Option<&Arc<dyn CertificateValidator>> {
        self.certificate_validator.as_ref()
    }

    /// Pre-shared key lookup.
    #[inline(always)]
    pub fn psk_store(&self) -> Option<&Arc<dyn PskStore>> {
        self.psk_store.as_ref()
    }

    /// Seed for non-cryptographic randomness.
    #[inline(always)]
    pub fn rng_seed(&self) -> Option<u64> {
        self.rng_seed
    }

    /// Suites usable in our configuration, in order of preference.
    pub(crate) fn usable_cipher_suites(&self) -> impl Iterator<Item = CipherSuite> + '_ {
        self.cipher_suites.iter().copied().filter(|s| match s {
            CipherSuite::PskAes128GcmSha256 => self.psk_store.is_some(),
            CipherSuite::EcdheEcdsaAes128GcmSha256 => {
                self.certificate.is_some() && self.certificate_validator.is_some()
            }
        })
    }
}

/// Builder for the handshake configuration.
pub struct ConfigBuilder {
    mtu: usize,
    max_queue_rx: usize,
    max_fragmented_size: usize,
    flight_start_rto: Duration,
    flight_max_rto: Duration,
    flight_retries: usize,
    handshake_timeout: Duration,
    max_record_failures: usize,
    require_client_certificate: bool,
    cipher_suites: Vec<CipherSuite>,
    certificate: Option<DtlsCertificate>,
    certificate_validator: Option<Arc<dyn CertificateValidator>>,
    psk_store: Option<Arc<dyn PskStore>>,
    rng_seed: Option<u64>,
}

impl ConfigBuilder {
    /// Set the max transmission unit (MTU).
    ///
    /// Defaults to 1150.
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Set the max amount of held back records from a future epoch.
    ///
    /// Defaults to 30.
    pub fn max_queue_rx(mut self, max_queue_rx: usize) -> Self {
        self.max_queue_rx = max_queue_rx;
        self
    }

    /// Set the largest handshake message accepted for reassembly.
    ///
    /// Defaults to 16384 bytes.
    pub fn max_fragmented_size(mut self, size: usize) -> Self {
        self.max_fragmented_size = size;
        self
    }

    /// Set the time of first retry.
    ///
    /// Defaults to 1 second.
    pub fn flight_start_rto(mut self, rto: Duration) -> Self {
        self.flight_start_rto = rto;
        self
    }

    /// Set the ceiling for the retransmission timeout.
    ///
    /// Defaults to 60 seconds.
    pub fn flight_max_rto(mut self, rto: Duration) -> Self {
        self.flight_max_rto = rto;
        self
    }

    /// Set the max number of retries per flight.
    ///
    /// Defaults to 4.
    pub fn flight_retries(mut self, retries: usize) -> Self {
        self.flight_retries = retries;
        self
    }

    /// Set the timeout for the entire handshake, regardless of flights.
    ///
    /// Defaults to 40 seconds.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set how many discarded records abort a handshake.
    ///
    /// Defaults to 8.
    pub fn max_record_failures(mut self, failures: usize) -> Self {
        self.max_record_failures = failures;
        self
    }

    /// Set whether to require a client certificate (for servers).
    ///
    /// Defaults to true.
    pub fn require_client_certificate(mut self, require: bool) -> Self {
        self.require_client_certificate = require;
        self
    }

    /// Set the cipher suites in order of preference.
    ///
    /// Defaults to ECDHE_ECDSA followed by PSK.
    pub fn cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    /// Set the local certificate and private key.
    pub fn certificate(mut self, certificate: DtlsCertificate) -> Self {
        self.certificate = Some(certificate);
        self
    }

    /// Set the validator for peer certificate chains.
    pub fn certificate_validator(mut self, validator: Arc<dyn CertificateValidator>) -> Self {
        self.certificate_validator = Some(validator);
        self
    }

    /// Set the pre-shared key store.
    pub fn psk_store(mut self, store: Arc<dyn PskStore>) -> Self {
        self.psk_store = Some(store);
        self
    }

    /// Seed the non-cryptographic RNG for deterministic runs.
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Build the configuration.
    ///
    /// Returns `Error::Config` for inconsistent settings or a private key that
    /// cannot be used for signing.
    pub fn build(self) -> Result<Config, Error> {
        if self.mtu < MIN_MTU {
            return Err(Error::Config(format!("mtu must be at least {}", MIN_MTU)));
        }
        if self.cipher_suites.is_empty() {
            return Err(Error::Config("no cipher suites".into()));
        }
        if self.flight_start_rto.is_zero() {
            return Err(Error::Config("flight_start_rto must be positive".into()));
        }
        if self.flight_start_rto > self.flight_max_rto {
            return Err(Error::Config(
                "flight_start_rto exceeds flight_max_rto".into(),
            ));
        }
        if let Some(cert) = &self.certificate {
            EcdsaSigner::from_pkcs8(&cert.private_key)
                .map_err(|e| Error::Config(format!("unusable private key: {}", e)))?;
        }

        Ok(Config {
            mtu: self.mtu,
            max_queue_rx: self.max_queue_rx,
            max_fragmented_size: self.max_fragmented_size,
            flight_start_rto: self.flight_start_rto,
            flight_max_rto: self.flight_max_rto,
            flight_retries: self.flight_retries,
            handshake_timeout: self.handshake_timeout,
            max_record_failures: self.max_record_failures,
            require_client_certificate: self.require_client_certificate,
            cipher_suites: self.cipher_suites,
            certificate: self.certificate,
            certificate_validator: self.certificate_validator,
            psk_store: self.psk_store,
            rng_seed: self.rng_seed,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder()
            .build()
            .expect("Default config should always validate")
    }
}
