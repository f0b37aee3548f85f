use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::number::complete::{be_u16, be_u8};
use nom::{Err, IResult};

use crate::types::KeyExchange;

/// ECCurveType named_curve.
const NAMED_CURVE: u8 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerKeyExchange {
    Ecdhe {
        named_curve: u16,
        public_key: Vec<u8>,
        signature_algorithm: u16,
        signature: Vec<u8>,
    },
    Psk {
        identity_hint: Vec<u8>,
    },
}

impl ServerKeyExchange {
    /// ServerECDHParams: curve_type, named_curve, public point.
    pub fn ecdh_params(named_curve: u16, public_key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + public_key.len());
        out.push(NAMED_CURVE);
        out.extend_from_slice(&named_curve.to_be_bytes());
        out.push(public_key.len() as u8);
        out.extend_from_slice(public_key);
        out
    }

    pub fn parse(input: &[u8], kx: KeyExchange) -> IResult<&[u8], ServerKeyExchange> {
        match kx {
            KeyExchange::Ecdhe => {
                let (input, curve_type) = be_u8(input)?;
                if curve_type != NAMED_CURVE {
                    return Err(Err::Failure(Error::new(input, ErrorKind::Tag)));
                }
                let (input, named_curve) = be_u16(input)?;
                let (input, pk_len) = be_u8(input)?;
                let (input, public_key) = take(pk_len as usize)(input)?;
                let (input, signature_algorithm) = be_u16(input)?;
                let (input, sig_len) = be_u16(input)?;
                let (input, signature) = take(sig_len as usize)(input)?;
                Ok((
                    input,
                    ServerKeyExchange::Ecdhe {
                        named_curve,
                        public_key: public_key.to_vec(),
                        signature_algorithm,
                        signature: signature.to_vec(),
                    },
                ))
            }
            KeyExchange::Psk => {
                let (input, len) = be_u16(input)?;
                let (input, hint) = take(len as usize)(input)?;
                Ok((
                    input,
                    ServerKeyExchange::Psk {
                        identity_hint: hint.to_vec(),
                    },
                ))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            ServerKeyExchange::Ecdhe {
                named_curve,
                public_key,
                signature_algorithm,
                signature,
            } => {
                output.extend_from_slice(&Self::ecdh_params(*named_curve, public_key));
                output.extend_from_slice(&signature_algorithm.to_be_bytes());
                output.extend_from_slice(&(signature.len() as u16).to_be_bytes());
                output.extend_from_slice(signature);
            }
            ServerKeyExchange::Psk { identity_hint } => {
                output.extend_from_slice(&(identity_hint.len() as u16).to_be_bytes());
                output.extend_from_slice(identity_hint);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientKeyExchange {
    Ecdhe { public_key: Vec<u8> },
    Psk { identity: Vec<u8> },
}

impl ClientKeyExchange {
    pub fn parse(input: &[u8], kx: KeyExchange) -> IResult<&[u8], ClientKeyExchange> {
        match kx {
            KeyExchange::Ecdhe => {
                let (input, len) = be_u8(input)?;
                let (input, pk) = take(len as usize)(input)?;
                Ok((
                    input,
                    ClientKeyExchange::Ecdhe {
                        public_key: pk.to_vec(),
                    },
                ))
            }
            KeyExchange::Psk => {
                let (input, len) = be_u16(input)?;
                let (input, identity) = take(len as usize)(input)?;
                Ok((
                    input,
                    ClientKeyExchange::Psk {
                        identity: identity.to_vec(),
                    },
                ))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            ClientKeyExchange::Ecdhe { public_key } => {
                output.push(public_key.len() as u8);
                output.extend_from_slice(public_key);
            }
            ClientKeyExchange::Psk { identity } => {
                output.extend_from_slice(&(identity.len() as u16).to_be_bytes());
                output.extend_from_slice(identity);
            }
        }
    }
}
