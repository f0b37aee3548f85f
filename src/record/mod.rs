//! Record layer: the wire record, per-epoch protection, and the transport
//! contract the handshake hands its flights to.

mod protection;

pub use protection::{ReadState, WriteState, MAX_SEQUENCE};

use std::fmt;
use std::net::SocketAddr;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

use crate::types::{AlertDescription, ContentType, ProtocolVersion};
use crate::RecordError;

/// Largest protected fragment accepted (2^14 + 2048, RFC 5246 §6.2.3).
const MAX_FRAGMENT_LEN: usize = 16_384 + 2048;

/// A record received from a peer. The fragment is still protected when the
/// epoch is non-zero.
#[derive(Clone, PartialEq, Eq)]
pub struct Record {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub epoch: u16,
    pub sequence_number: u64,
    pub peer: SocketAddr,
    pub fragment: Vec<u8>,
}

struct RawHeader {
    content_type: u8,
    version: ProtocolVersion,
    epoch: u16,
    sequence_number: u64,
    length: u16,
}

fn be_u48(input: &[u8]) -> IResult<&[u8], u64> {
    let (input, bytes) = take(6usize)(input)?;
    let value = bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64);
    Ok((input, value))
}

fn parse_header(input: &[u8]) -> IResult<&[u8], RawHeader> {
    let (input, content_type) = be_u8(input)?;
    let (input, version) = ProtocolVersion::parse(input)?;
    let (input, epoch) = be_u16(input)?;
    let (input, sequence_number) = be_u48(input)?;
    let (input, length) = be_u16(input)?;
    Ok((
        input,
        RawHeader {
            content_type,
            version,
            epoch,
            sequence_number,
            length,
        },
    ))
}

impl Record {
    /// content_type(1) + version(2) + epoch(2) + seq(6) + length(2)
    pub const HEADER_LEN: usize = 13;

    /// Split a datagram into records.
    ///
    /// Parsing stops at the first malformed record; the records before it are
    /// returned along with the failure.
    pub fn parse_datagram(peer: SocketAddr, datagram: &[u8]) -> (Vec<Record>, Option<RecordError>) {
        let mut records = Vec::new();
        let mut input = datagram;

        while !input.is_empty() {
            let Ok((rest, header)) = parse_header(input) else {
                let e = RecordError::parsing(peer, None, "truncated record header");
                return (records, Some(e));
            };

            let content_type = ContentType::from_u8(header.content_type);

            let Some(content_type) = content_type else {
                let e = RecordError::parsing(
                    peer,
                    None,
                    format!("unknown content type {}", header.content_type),
                );
                return (records, Some(e));
            };

            if !matches!(
                header.version,
                ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2
            ) {
                let e = RecordError::parsing_with(
                    peer,
                    Some(content_type),
                    AlertDescription::ProtocolVersion,
                    format!("unsupported record version {:?}", header.version),
                );
                return (records, Some(e));
            }

            if header.length as usize > MAX_FRAGMENT_LEN {
                let e = RecordError::parsing_with(
                    peer,
                    Some(content_type),
                    AlertDescription::RecordOverflow,
                    format!("record length {} too large", header.length),
                );
                return (records, Some(e));
            }

            let Ok((rest, fragment)) = take::<_, _, nom::error::Error<&[u8]>>(
                header.length as usize,
            )(rest) else {
                let e = RecordError::parsing(peer, Some(content_type), "truncated record fragment");
                return (records, Some(e));
            };

            records.push(Record {
                content_type,
                version: header.version,
                epoch: header.epoch,
                sequence_number: header.sequence_number,
                peer,
                fragment: fragment.to_vec(),
            });
            input = rest;
        }

        (records, None)
    }
}

/// Append a record header and fragment to `out`.
pub(crate) fn serialize_record(
    content_type: ContentType,
    epoch: u16,
    sequence_number: u64,
    fragment: &[u8],
    out: &mut Vec<u8>,
) {
    out.push(content_type.as_u8());
    ProtocolVersion::DTLS1_2.serialize(out);
    out.extend_from_slice(&epoch.to_be_bytes());
    out.extend_from_slice(&sequence_number.to_be_bytes()[2..]);
    out.extend_from_slice(&(fragment.len() as u16).to_be_bytes());
    out.extend_from_slice(fragment);
}

/// Append a record to the last datagram if it fits within `mtu`, else start
/// a new datagram.
pub(crate) fn pack_record(
    datagrams: &mut Vec<Vec<u8>>,
    mtu: usize,
    state: &mut WriteState,
    content_type: ContentType,
    fragment: &[u8],
) -> Result<(), crate::Error> {
    let wire_len = state.wire_len(fragment.len());

    let last = datagrams
        .last_mut()
        .filter(|d| d.len() + wire_len <= mtu);

    if let Some(last) = last {
        return state.write_record(content_type, fragment, last);
    }

    let mut datagram = Vec::with_capacity(mtu);
    state.write_record(content_type, fragment, &mut datagram)?;
    datagrams.push(datagram);
    Ok(())
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("content_type", &self.content_type)
            .field("epoch", &self.epoch)
            .field("sequence_number", &self.sequence_number)
            .field("peer", &self.peer)
            .field("length", &self.fragment.len())
            .finish()
    }
}

/// Transport delivery failure. Treated as transient: the flight stays
/// armed for retransmission.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("{0} unreachable")]
    Unreachable(SocketAddr),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transport binding used to hand flights to a peer.
///
/// Implementations must serialize their own per-connection I/O; one record
/// layer is shared by every handshake of an endpoint.
pub trait RecordLayer: Send + Sync {
    /// Send the datagrams carrying one flight, in order.
    fn send(&self, peer: SocketAddr, datagrams: &[Vec<u8>]) -> Result<(), DeliveryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x2A, // sequence_number
        0x00, 0x03, // length
        0x01, 0x02, 0x03, // fragment
    ];

    fn peer() -> SocketAddr {
        "192.168.1.2:5684".parse().unwrap()
    }

    #[test]
    fn parse_two_records() {
        let mut datagram = RECORD.to_vec();
        datagram.extend_from_slice(RECORD);

        let (records, err) = Record::parse_datagram(peer(), &datagram);
        assert!(err.is_none());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].epoch, 1);
        assert_eq!(records[0].sequence_number, 42);
        assert_eq!(records[0].fragment, vec![1, 2, 3]);
    }

    #[test]
    fn serialize_matches_wire() {
        let mut out = Vec::new();
        serialize_record(ContentType::Handshake, 1, 42, &[1, 2, 3], &mut out);
        assert_eq!(out, RECORD);
    }

    #[test]
    fn truncated_record_is_decode_error() {
        let (records, err) = Record::parse_datagram(peer(), &RECORD[..14]);
        assert!(records.is_empty());
        let err = err.unwrap();
        assert_eq!(err.description(), AlertDescription::DecodeError);
        assert!(err.is_parsing());
    }

    #[test]
    fn unknown_content_type() {
        let mut datagram = RECORD.to_vec();
        datagram[0] = 0x63;
        let (_, err) = Record::parse_datagram(peer(), &datagram);
        assert_eq!(err.unwrap().description(), AlertDescription::DecodeError);
    }

    #[test]
    fn good_record_before_garbage_survives() {
        let mut datagram = RECORD.to_vec();
        datagram.extend_from_slice(&[0x17, 0xFE]);
        let (records, err) = Record::parse_datagram(peer(), &datagram);
        assert_eq!(records.len(), 1);
        assert!(err.is_some());
    }
}
