use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use super::Extension;
use crate::types::{CipherSuite, CompressionMethod, Cookie, ProtocolVersion, Random, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHello {
    pub client_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cookie: Cookie,
    /// Raw suite values, including ones we do not implement.
    pub cipher_suites: Vec<u16>,
    pub compression_methods: Vec<CompressionMethod>,
    pub extensions: Vec<Extension>,
}

impl ClientHello {
    /// Offered suites we know, in the client's order.
    pub fn offered_suites(&self) -> impl Iterator<Item = CipherSuite> + '_ {
        self.cipher_suites
            .iter()
            .filter_map(|v| CipherSuite::from_u16(*v))
    }

    pub fn offers(&self, suite: CipherSuite) -> bool {
        self.cipher_suites.contains(&suite.as_u16())
    }

    pub fn offers_null_compression(&self) -> bool {
        self.compression_methods.contains(&CompressionMethod::Null)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ClientHello> {
        let (input, client_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cookie) = Cookie::parse(input)?;

        let (input, suites_len) = be_u16(input)?;
        if suites_len % 2 != 0 || suites_len == 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, suites) = take(suites_len as usize)(input)?;
        let cipher_suites = suites
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        let (input, comp_len) = be_u8(input)?;
        if comp_len == 0 {
            return Err(Err::Failure(Error::new(input, ErrorKind::LengthValue)));
        }
        let (input, comps) = take(comp_len as usize)(input)?;
        let compression_methods = comps
            .iter()
            .map(|c| CompressionMethod::from_u8(*c))
            .collect();

        let (input, extensions) = Extension::parse_list(input)?;

        Ok((
            input,
            ClientHello {
                client_version,
                random,
                session_id,
                cookie,
                cipher_suites,
                compression_methods,
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.client_version.serialize(output);
        output.extend_from_slice(self.random.as_bytes());
        self.session_id.serialize(output);
        self.cookie.serialize(output);
        output.extend_from_slice(&((self.cipher_suites.len() * 2) as u16).to_be_bytes());
        for suite in &self.cipher_suites {
            output.extend_from_slice(&suite.to_be_bytes());
        }
        output.push(self.compression_methods.len() as u8);
        for comp in &self.compression_methods {
            output.push(comp.as_u8());
        }
        Extension::serialize_list(&self.extensions, output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hello() -> ClientHello {
        ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: Random([0x11; 32]),
            session_id: SessionId::try_new(&[0xAB; 32]).unwrap(),
            cookie: Cookie::try_new(&[0xCC; 4]).unwrap(),
            cipher_suites: vec![0xC02B, 0x1301, 0x00A8],
            compression_methods: vec![CompressionMethod::Null],
            extensions: vec![Extension::supported_groups()],
        }
    }

    #[test]
    fn roundtrip_keeps_unknown_suites() {
        let ch = hello();
        let mut out = Vec::new();
        ch.serialize(&mut out);

        let (rest, parsed) = ClientHello::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, ch);
        assert_eq!(
            parsed.offered_suites().collect::<Vec<_>>(),
            vec![
                CipherSuite::EcdheEcdsaAes128GcmSha256,
                CipherSuite::PskAes128GcmSha256
            ]
        );
        assert!(parsed.offers_null_compression());
    }

    #[test]
    fn odd_suite_length_rejected() {
        let mut out = Vec::new();
        hello().serialize(&mut out);
        // version(2) random(32) sid(1+32) cookie(1+4) -> suites length at 72
        out[73] = 5;
        assert!(ClientHello::parse(&out).is_err());
    }
}
