use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::crypto::{ECDSA_SECP256R1_SHA256, SECP256R1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionType {
    SupportedGroups,
    EcPointFormats,
    SignatureAlgorithms,
    Other(u16),
}

impl ExtensionType {
    pub fn from_u16(value: u16) -> Self {
        match value {
            10 => ExtensionType::SupportedGroups,
            11 => ExtensionType::EcPointFormats,
            13 => ExtensionType::SignatureAlgorithms,
            _ => ExtensionType::Other(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ExtensionType::SupportedGroups => 10,
            ExtensionType::EcPointFormats => 11,
            ExtensionType::SignatureAlgorithms => 13,
            ExtensionType::Other(value) => *value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub extension_type: ExtensionType,
    pub data: Vec<u8>,
}

impl Extension {
    /// supported_groups = [secp256r1]
    pub fn supported_groups() -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&SECP256R1.to_be_bytes());
        Extension {
            extension_type: ExtensionType::SupportedGroups,
            data,
        }
    }

    /// ec_point_formats = [uncompressed]
    pub fn ec_point_formats() -> Self {
        Extension {
            extension_type: ExtensionType::EcPointFormats,
            data: vec![1, 0],
        }
    }

    /// signature_algorithms = [ecdsa_secp256r1_sha256]
    pub fn signature_algorithms() -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&ECDSA_SECP256R1_SHA256.to_be_bytes());
        Extension {
            extension_type: ExtensionType::SignatureAlgorithms,
            data,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], Extension> {
        let (input, extension_type) = be_u16(input)?;
        let (input, len) = be_u16(input)?;
        let (input, data) = take(len as usize)(input)?;
        Ok((
            input,
            Extension {
                extension_type: ExtensionType::from_u16(extension_type),
                data: data.to_vec(),
            },
        ))
    }

    /// Parses the optional extensions block at the end of a hello.
    pub fn parse_list(input: &[u8]) -> IResult<&[u8], Vec<Extension>> {
        if input.is_empty() {
            return Ok((input, Vec::new()));
        }
        let (input, len) = be_u16(input)?;
        let (input, mut block) = take(len as usize)(input)?;
        let mut out = Vec::new();
        while !block.is_empty() {
            let (rest, ext) = Extension::parse(block)?;
            out.push(ext);
            block = rest;
        }
        Ok((input, out))
    }

    pub fn serialize_list(extensions: &[Extension], output: &mut Vec<u8>) {
        if extensions.is_empty() {
            return;
        }
        let len: usize = extensions.iter().map(|e| 4 + e.data.len()).sum();
        output.extend_from_slice(&(len as u16).to_be_bytes());
        for ext in extensions {
            output.extend_from_slice(&ext.extension_type.as_u16().to_be_bytes());
            output.extend_from_slice(&(ext.data.len() as u16).to_be_bytes());
            output.extend_from_slice(&ext.data);
        }
    }

    /// u16 values of a u16-length-prefixed list extension, if present.
    pub fn u16_list(extensions: &[Extension], extension_type: ExtensionType) -> Option<Vec<u16>> {
        let ext = extensions
            .iter()
            .find(|e| e.extension_type == extension_type)?;
        let (_, list) = parse_u16_list(&ext.data).ok()?;
        Some(list)
    }
}

fn parse_u16_list(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    let (input, len) = be_u16(input)?;
    let (input, mut data) = take(len as usize)(input)?;
    let mut out = Vec::new();
    while data.len() >= 2 {
        let (rest, v) = be_u16(data)?;
        out.push(v);
        data = rest;
    }
    Ok((input, out))
}
