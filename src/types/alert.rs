use std::fmt;

use nom::number::complete::be_u8;
use nom::IResult;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertLevel {
    Warning,
    Fatal,
    Unknown(u8),
}

impl AlertLevel {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => AlertLevel::Warning,
            2 => AlertLevel::Fatal,
            _ => AlertLevel::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            AlertLevel::Warning => 1,
            AlertLevel::Fatal => 2,
            AlertLevel::Unknown(value) => *value,
        }
    }
}

/// Alert descriptions from RFC 5246 §7.2 plus RFC 4279.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertDescription {
    CloseNotify,
    UnexpectedMessage,
    BadRecordMac,
    RecordOverflow,
    DecompressionFailure,
    HandshakeFailure,
    BadCertificate,
    UnsupportedCertificate,
    CertificateRevoked,
    CertificateExpired,
    CertificateUnknown,
    IllegalParameter,
    UnknownCa,
    AccessDenied,
    DecodeError,
    DecryptError,
    ProtocolVersion,
    InsufficientSecurity,
    InternalError,
    UserCanceled,
    NoRenegotiation,
    UnsupportedExtension,
    UnknownPskIdentity,
    Unknown(u8),
}

impl AlertDescription {
    pub fn from_u8(value: u8) -> Self {
        use AlertDescription::*;
        match value {
            0 => CloseNotify,
            10 => UnexpectedMessage,
            20 => BadRecordMac,
            22 => RecordOverflow,
            30 => DecompressionFailure,
            40 => HandshakeFailure,
            42 => BadCertificate,
            43 => UnsupportedCertificate,
            44 => CertificateRevoked,
            45 => CertificateExpired,
            46 => CertificateUnknown,
            47 => IllegalParameter,
            48 => UnknownCa,
            49 => AccessDenied,
            50 => DecodeError,
            51 => DecryptError,
            70 => ProtocolVersion,
            71 => InsufficientSecurity,
            80 => InternalError,
            90 => UserCanceled,
            100 => NoRenegotiation,
            110 => UnsupportedExtension,
            115 => UnknownPskIdentity,
            _ => Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        use AlertDescription::*;
        match self {
            CloseNotify => 0,
            UnexpectedMessage => 10,
            BadRecordMac => 20,
            RecordOverflow => 22,
            DecompressionFailure => 30,
            HandshakeFailure => 40,
            BadCertificate => 42,
            UnsupportedCertificate => 43,
            CertificateRevoked => 44,
            CertificateExpired => 45,
            CertificateUnknown => 46,
            IllegalParameter => 47,
            UnknownCa => 48,
            AccessDenied => 49,
            DecodeError => 50,
            DecryptError => 51,
            ProtocolVersion => 70,
            InsufficientSecurity => 71,
            InternalError => 80,
            UserCanceled => 90,
            NoRenegotiation => 100,
            UnsupportedExtension => 110,
            UnknownPskIdentity => 115,
            Unknown(value) => *value,
        }
    }
}

impl fmt::Display for AlertDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AlertDescription::*;
        let name = match self {
            CloseNotify => "close notify",
            UnexpectedMessage => "unexpected message",
            BadRecordMac => "bad record mac",
            RecordOverflow => "record overflow",
            DecompressionFailure => "decompression failure",
            HandshakeFailure => "handshake failure",
            BadCertificate => "bad certificate",
            UnsupportedCertificate => "unsupported certificate",
            CertificateRevoked => "certificate revoked",
            CertificateExpired => "certificate expired",
            CertificateUnknown => "certificate unknown",
            IllegalParameter => "illegal parameter",
            UnknownCa => "unknown ca",
            AccessDenied => "access denied",
            DecodeError => "decode error",
            DecryptError => "decrypt error",
            ProtocolVersion => "protocol version",
            InsufficientSecurity => "insufficient security",
            InternalError => "internal error",
            UserCanceled => "user canceled",
            NoRenegotiation => "no renegotiation",
            UnsupportedExtension => "unsupported extension",
            UnknownPskIdentity => "unknown psk identity",
            Unknown(value) => return write!(f, "unknown({})", value),
        };
        f.write_str(name)
    }
}

/// An alert as carried in an Alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Alert {
    pub level: AlertLevel,
    pub description: AlertDescription,
}

impl Alert {
    pub const LEN: usize = 2;

    pub fn fatal(description: AlertDescription) -> Self {
        Alert {
            level: AlertLevel::Fatal,
            description,
        }
    }

    pub fn warning(description: AlertDescription) -> Self {
        Alert {
            level: AlertLevel::Warning,
            description,
        }
    }

    pub fn close_notify() -> Self {
        Self::warning(AlertDescription::CloseNotify)
    }

    pub fn is_fatal(&self) -> bool {
        self.level == AlertLevel::Fatal
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Alert> {
        let (input, level) = be_u8(input)?;
        let (input, description) = be_u8(input)?;
        Ok((
            input,
            Alert {
                level: AlertLevel::from_u8(level),
                description: AlertDescription::from_u8(description),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.level.as_u8());
        output.push(self.description.as_u8());
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            AlertLevel::Warning => "warning",
            AlertLevel::Fatal => "fatal",
            AlertLevel::Unknown(_) => "unknown",
        };
        write!(f, "{} {}", level, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_fatal_decrypt_error() {
        let (rest, alert) = Alert::parse(&[0x02, 0x33]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(alert, Alert::fatal(AlertDescription::DecryptError));
        assert_eq!(alert.to_string(), "fatal decrypt error");
    }

    #[test]
    fn unknown_description_is_preserved() {
        let (_, alert) = Alert::parse(&[0x01, 0xEE]).unwrap();
        assert_eq!(alert.description, AlertDescription::Unknown(0xEE));

        let mut out = Vec::new();
        alert.serialize(&mut out);
        assert_eq!(out, vec![0x01, 0xEE]);
    }

    #[test]
    fn truncated_alert_fails() {
        assert!(Alert::parse(&[0x02]).is_err());
    }
}
