use nom::bytes::complete::take;
use nom::number::complete::be_u16;
use nom::IResult;

use crate::crypto::VERIFY_DATA_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finished {
    pub verify_data: [u8; VERIFY_DATA_LEN],
}

impl Finished {
    pub fn parse(input: &[u8]) -> IResult<&[u8], Finished> {
        let (input, data) = take(VERIFY_DATA_LEN)(input)?;
        let mut verify_data = [0u8; VERIFY_DATA_LEN];
        verify_data.copy_from_slice(data);
        Ok((input, Finished { verify_data }))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.verify_data);
    }
}

/// Digitally-signed transcript proving possession of the client key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateVerify {
    pub signature_algorithm: u16,
    pub signature: Vec<u8>,
}

impl CertificateVerify {
    pub fn parse(input: &[u8]) -> IResult<&[u8], CertificateVerify> {
        let (input, signature_algorithm) = be_u16(input)?;
        let (input, len) = be_u16(input)?;
        let (input, signature) = take(len as usize)(input)?;
        Ok((
            input,
            CertificateVerify {
                signature_algorithm,
                signature: signature.to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.signature_algorithm.to_be_bytes());
        output.extend_from_slice(&(self.signature.len() as u16).to_be_bytes());
        output.extend_from_slice(&self.signature);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_finished_fails() {
        assert!(Finished::parse(&[0u8; 11]).is_err());
    }

    #[test]
    fn certificate_verify_layout() {
        let cv = CertificateVerify {
            signature_algorithm: 0x0403,
            signature: vec![0xAA, 0xBB],
        };
        let mut out = Vec::new();
        cv.serialize(&mut out);
        assert_eq!(out, vec![0x04, 0x03, 0x00, 0x02, 0xAA, 0xBB]);
    }
}
