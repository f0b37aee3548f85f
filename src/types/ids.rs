use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

use crate::SeededRng;

/// Hello random: 4 bytes of gmt_unix_time followed by 28 random bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Random(pub [u8; 32]);

impl Random {
    pub const LEN: usize = 32;

    pub fn new(rng: &mut SeededRng) -> Self {
        let mut bytes = [0u8; 32];
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        bytes[..4].copy_from_slice(&now.to_be_bytes());
        rng.fill(&mut bytes[4..]);
        Random(bytes)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Random> {
        let (input, data) = take(Self::LEN)(input)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(data);
        Ok((input, Random(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for Random {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Random({})", hex(&self.0[..4]))
    }
}

/// Session identifier, 0 to 32 bytes. Empty means "no session".
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Vec<u8>);

impl SessionId {
    pub const MAX_LEN: usize = 32;

    pub fn empty() -> Self {
        SessionId(Vec::new())
    }

    pub fn try_new(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > Self::MAX_LEN {
            return None;
        }
        Some(SessionId(bytes.to_vec()))
    }

    pub fn random(rng: &mut SeededRng) -> Self {
        let mut bytes = vec![0u8; Self::MAX_LEN];
        rng.fill(&mut bytes);
        SessionId(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex(&self.0)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], SessionId> {
        let (input, len) = be_u8(input)?;
        if len as usize > Self::MAX_LEN {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, data) = take(len as usize)(input)?;
        Ok((input, SessionId(data.to_vec())))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.0.len() as u8);
        output.extend_from_slice(&self.0);
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.to_hex())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// HelloVerifyRequest cookie, 0 to 255 bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookie(Vec<u8>);

impl Cookie {
    pub fn try_new(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > u8::MAX as usize {
            return None;
        }
        Some(Cookie(bytes.to_vec()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Cookie> {
        let (input, len) = be_u8(input)?;
        let (input, data) = take(len as usize)(input)?;
        Ok((input, Cookie(data.to_vec())))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.0.len() as u8);
        output.extend_from_slice(&self.0);
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_too_long() {
        let mut input = vec![33u8];
        input.extend_from_slice(&[0xAA; 33]);
        assert!(SessionId::parse(&input).is_err());
        assert!(SessionId::try_new(&[0; 33]).is_none());
    }

    #[test]
    fn session_id_hex() {
        let id = SessionId::try_new(&[0x01, 0xAB]).unwrap();
        assert_eq!(id.to_hex(), "01ab");
        assert!(!id.is_empty());
        assert!(SessionId::empty().is_empty());
    }

    #[test]
    fn random_is_seeded() {
        let mut a = SeededRng::new(Some(7));
        let mut b = SeededRng::new(Some(7));
        assert_eq!(Random::new(&mut a).0[4..], Random::new(&mut b).0[4..]);
    }
}
