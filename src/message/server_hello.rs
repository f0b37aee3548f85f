use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use super::Extension;
use crate::types::{CompressionMethod, ProtocolVersion, Random, SessionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub server_version: ProtocolVersion,
    pub random: Random,
    pub session_id: SessionId,
    pub cipher_suite: u16,
    pub compression_method: CompressionMethod,
    pub extensions: Vec<Extension>,
}

impl ServerHello {
    pub fn parse(input: &[u8]) -> IResult<&[u8], ServerHello> {
        let (input, server_version) = ProtocolVersion::parse(input)?;
        let (input, random) = Random::parse(input)?;
        let (input, session_id) = SessionId::parse(input)?;
        let (input, cipher_suite) = be_u16(input)?;
        let (input, compression_method) = be_u8(input)?;
        let (input, extensions) = Extension::parse_list(input)?;

        Ok((
            input,
            ServerHello {
                server_version,
                random,
                session_id,
                cipher_suite,
                compression_method: CompressionMethod::from_u8(compression_method),
                extensions,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.server_version.serialize(output);
        output.extend_from_slice(self.random.as_bytes());
        self.session_id.serialize(output);
        output.extend_from_slice(&self.cipher_suite.to_be_bytes());
        output.push(self.compression_method.as_u8());
        Extension::serialize_list(&self.extensions, output);
    }
}
