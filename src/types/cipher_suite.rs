use std::fmt;

/// Cipher suites this engine can negotiate.
///
/// Both suites use AES-128-GCM record protection and the SHA-256 based
/// TLS 1.2 PRF. They differ in how the premaster secret is agreed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    /// TLS_PSK_WITH_AES_128_GCM_SHA256 (RFC 5487)
    PskAes128GcmSha256,
    /// TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 (RFC 5289)
    EcdheEcdsaAes128GcmSha256,
}

/// How the premaster secret is agreed for a suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyExchange {
    Psk,
    Ecdhe,
}

impl CipherSuite {
    pub const ALL: &'static [CipherSuite] = &[
        CipherSuite::EcdheEcdsaAes128GcmSha256,
        CipherSuite::PskAes128GcmSha256,
    ];

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x00A8 => Some(CipherSuite::PskAes128GcmSha256),
            0xC02B => Some(CipherSuite::EcdheEcdsaAes128GcmSha256),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CipherSuite::PskAes128GcmSha256 => 0x00A8,
            CipherSuite::EcdheEcdsaAes128GcmSha256 => 0xC02B,
        }
    }

    pub fn key_exchange(&self) -> KeyExchange {
        match self {
            CipherSuite::PskAes128GcmSha256 => KeyExchange::Psk,
            CipherSuite::EcdheEcdsaAes128GcmSha256 => KeyExchange::Ecdhe,
        }
    }

    /// IANA name of the suite.
    pub fn name(&self) -> &'static str {
        match self {
            CipherSuite::PskAes128GcmSha256 => "TLS_PSK_WITH_AES_128_GCM_SHA256",
            CipherSuite::EcdheEcdsaAes128GcmSha256 => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        }
    }
}

impl fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Record compression. Only null compression is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMethod {
    #[default]
    Null,
    Unknown(u8),
}

impl CompressionMethod {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => CompressionMethod::Null,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CompressionMethod::Null => 0,
            CompressionMethod::Unknown(value) => *value,
        }
    }
}
