use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use super::put_u24;

/// ClientCertificateType ecdsa_sign (RFC 8422).
pub const ECDSA_SIGN: u8 = 64;

/// Certificate chain, leaf first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub chain: Vec<Vec<u8>>,
}

impl Certificate {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Certificate> {
        let (input, total) = be_u24(input)?;
        let (input, mut list) = take(total as usize)(input)?;
        let mut chain = Vec::new();
        while !list.is_empty() {
            let (rest, len) = be_u24(list)?;
            let (rest, der) = take(len as usize)(rest)?;
            chain.push(der.to_vec());
            list = rest;
        }
        Ok((input, Certificate { chain }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        let total: usize = self.chain.iter().map(|c| 3 + c.len()).sum();
        put_u24(output, total as u32);
        for der in &self.chain {
            put_u24(output, der.len() as u32);
            output.extend_from_slice(der);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub certificate_types: Vec<u8>,
    pub signature_algorithms: Vec<u16>,
    pub authorities: Vec<Vec<u8>>,
}

impl CertificateRequest {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateRequest> {
        let (input, types_len) = be_u8(input)?;
        let (input, types) = take(types_len as usize)(input)?;

        let (input, algs_len) = be_u16(input)?;
        let (input, algs) = take(algs_len as usize)(input)?;
        let signature_algorithms = algs
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();

        let (input, dn_len) = be_u16(input)?;
        let (input, mut dns) = take(dn_len as usize)(input)?;
        let mut authorities = Vec::new();
        while !dns.is_empty() {
            let (rest, len) = be_u16(dns)?;
            let (rest, dn) = take(len as usize)(rest)?;
            authorities.push(dn.to_vec());
            dns = rest;
        }

        Ok((
            input,
            CertificateRequest {
                certificate_types: types.to_vec(),
                signature_algorithms,
                authorities,
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.certificate_types.len() as u8);
        output.extend_from_slice(&self.certificate_types);
        output.extend_from_slice(&((self.signature_algorithms.len() * 2) as u16).to_be_bytes());
        for alg in &self.signature_algorithms {
            output.extend_from_slice(&alg.to_be_bytes());
        }
        let dn_total: usize = self.authorities.iter().map(|d| 2 + d.len()).sum();
        output.extend_from_slice(&(dn_total as u16).to_be_bytes());
        for dn in &self.authorities {
            output.extend_from_slice(&(dn.len() as u16).to_be_bytes());
            output.extend_from_slice(dn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_roundtrip() {
        let cert = Certificate {
            chain: vec![vec![1, 2, 3], vec![4; 300]],
        };
        let mut out = Vec::new();
        cert.serialize(&mut out);
        let (rest, parsed) = Certificate::parse(&out).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, cert);
    }

    #[test]
    fn empty_chain() {
        let (_, parsed) = Certificate::parse(&[0, 0, 0]).unwrap();
        assert!(parsed.chain.is_empty());
    }

    #[test]
    fn truncated_entry_fails() {
        assert!(Certificate::parse(&[0, 0, 5, 0, 0, 9, 1, 2]).is_err());
    }

    #[test]
    fn request_wire_format() {
        let req = CertificateRequest {
            certificate_types: vec![ECDSA_SIGN],
            signature_algorithms: vec![0x0403],
            authorities: vec![],
        };
        let mut out = Vec::new();
        req.serialize(&mut out);
        assert_eq!(out, vec![1, 64, 0, 2, 0x04, 0x03, 0, 0]);
    }
}
