//! Handshake message codecs.
//!
//! Every body type has a nom `parse` and a `serialize` into a `Vec<u8>`.
//! Handshake messages travel as fragments, each with the 12-byte DTLS
//! handshake header.

mod certificate;
mod client_hello;
mod extension;
mod finished;
mod hello_verify;
mod key_exchange;
mod server_hello;

pub use certificate::{Certificate, CertificateRequest, ECDSA_SIGN};
pub use client_hello::ClientHello;
pub use extension::{Extension, ExtensionType};
pub use finished::{CertificateVerify, Finished};
pub use hello_verify::HelloVerifyRequest;
pub use key_exchange::{ClientKeyExchange, ServerKeyExchange};
pub use server_hello::ServerHello;

use nom::bytes::complete::take;
use nom::combinator::all_consuming;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::{Err, IResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    ClientHello,
    ServerHello,
    HelloVerifyRequest,
    Certificate,
    ServerKeyExchange,
    CertificateRequest,
    ServerHelloDone,
    CertificateVerify,
    ClientKeyExchange,
    Finished,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use MessageType::*;
        let t = match value {
            1 => ClientHello,
            2 => ServerHello,
            3 => HelloVerifyRequest,
            11 => Certificate,
            12 => ServerKeyExchange,
            13 => CertificateRequest,
            14 => ServerHelloDone,
            15 => CertificateVerify,
            16 => ClientKeyExchange,
            20 => Finished,
            _ => return None,
        };
        Some(t)
    }

    pub fn as_u8(&self) -> u8 {
        use MessageType::*;
        match self {
            ClientHello => 1,
            ServerHello => 2,
            HelloVerifyRequest => 3,
            Certificate => 11,
            ServerKeyExchange => 12,
            CertificateRequest => 13,
            ServerHelloDone => 14,
            CertificateVerify => 15,
            ClientKeyExchange => 16,
            Finished => 20,
        }
    }
}

/// DTLS handshake header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MessageType,
    pub length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
}

impl Header {
    pub const LEN: usize = 12;

    pub fn parse(input: &[u8]) -> IResult<&[u8], Header> {
        let (input, msg_type) = be_u8(input)?;
        let Some(msg_type) = MessageType::from_u8(msg_type) else {
            return Err(Err::Failure(Error::new(input, ErrorKind::Alt)));
        };
        let (input, length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;

        if fragment_offset as u64 + fragment_length as u64 > length as u64 {
            return Err(Err::Failure(Error::new(input, ErrorKind::Verify)));
        }

        Ok((
            input,
            Header {
                msg_type,
                length,
                message_seq,
                fragment_offset,
                fragment_length,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.msg_type.as_u8());
        put_u24(output, self.length);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        put_u24(output, self.fragment_offset);
        put_u24(output, self.fragment_length);
    }
}

/// One handshake fragment as carried in a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub header: Header,
    pub body: Vec<u8>,
}

impl Fragment {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Fragment> {
        let (input, header) = Header::parse(input)?;
        let (input, body) = take(header.fragment_length as usize)(input)?;
        Ok((
            input,
            Fragment {
                header,
                body: body.to_vec(),
            },
        ))
    }

    /// Parse every fragment in a handshake record.
    pub fn parse_all(mut input: &[u8]) -> Result<Vec<Fragment>, String> {
        let mut out = Vec::new();
        while !input.is_empty() {
            let (rest, fragment) =
                Fragment::parse(input).map_err(|e| format!("bad handshake fragment: {:?}", e))?;
            out.push(fragment);
            input = rest;
        }
        if out.is_empty() {
            return Err("empty handshake record".into());
        }
        Ok(out)
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        self.header.serialize(output);
        output.extend_from_slice(&self.body);
    }
}

/// A complete, reassembled handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub msg_type: MessageType,
    pub message_seq: u16,
    pub body: Vec<u8>,
    /// Length of the transcript before this message was appended.
    pub transcript_offset: usize,
}

impl Handshake {
    /// Transcript form: unfragmented header followed by the body.
    pub fn transcript_bytes(msg_type: MessageType, message_seq: u16, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(Header::LEN + body.len());
        Header {
            msg_type,
            length: body.len() as u32,
            message_seq,
            fragment_offset: 0,
            fragment_length: body.len() as u32,
        }
        .serialize(&mut out);
        out.extend_from_slice(body);
        out
    }
}

/// Parse a whole handshake body, rejecting trailing bytes.
pub fn parse_body<'a, T, F>(input: &'a [u8], parser: F) -> Result<T, String>
where
    F: FnMut(&'a [u8]) -> IResult<&'a [u8], T>,
{
    all_consuming(parser)(input)
        .map(|(_, v)| v)
        .map_err(|e| format!("{:?}", e))
}

pub(crate) fn put_u24(output: &mut Vec<u8>, value: u32) {
    output.extend_from_slice(&value.to_be_bytes()[1..]);
}

/// ChangeCipherSpec record payload.
pub const CHANGE_CIPHER_SPEC: [u8; 1] = [1];
