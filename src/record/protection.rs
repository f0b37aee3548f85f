use crate::crypto::{Aad, RecordCipher, AEAD_OVERHEAD, EXPLICIT_NONCE_LEN, TAG_LEN};
use crate::record::{serialize_record, Record};
use crate::types::{ContentType, ProtocolVersion};
use crate::window::ReplayWindow;
use crate::{Error, RecordError};

/// Record sequence numbers are 48 bits.
pub const MAX_SEQUENCE: u64 = (1 << 48) - 1;

fn epoch_and_sequence(epoch: u16, sequence_number: u64) -> [u8; 8] {
    let mut out = sequence_number.to_be_bytes();
    out[..2].copy_from_slice(&epoch.to_be_bytes());
    out
}

fn aad(
    epoch: u16,
    sequence_number: u64,
    content_type: ContentType,
    version: ProtocolVersion,
    length: usize,
) -> Aad {
    let mut aad = [0u8; 13];
    aad[..8].copy_from_slice(&epoch_and_sequence(epoch, sequence_number));
    aad[8] = content_type.as_u8();
    aad[9..11].copy_from_slice(&version.as_u16().to_be_bytes());
    aad[11..].copy_from_slice(&(length as u16).to_be_bytes());
    aad
}

/// Outbound state of one epoch.
#[derive(Debug, Clone)]
pub struct WriteState {
    epoch: u16,
    next_sequence: u64,
    cipher: Option<RecordCipher>,
}

impl WriteState {
    pub fn plaintext(epoch: u16, initial_sequence: u64) -> Self {
        WriteState {
            epoch,
            next_sequence: initial_sequence,
            cipher: None,
        }
    }

    pub fn protected(epoch: u16, cipher: RecordCipher) -> Self {
        WriteState {
            epoch,
            next_sequence: 0,
            cipher: Some(cipher),
        }
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    /// Sequence number the next record will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn is_protected(&self) -> bool {
        self.cipher.is_some()
    }

    /// Continue after the records a copy of this epoch's state wrote.
    pub(crate) fn catch_up(&mut self, copy: &WriteState) {
        if copy.epoch == self.epoch {
            self.next_sequence = self.next_sequence.max(copy.next_sequence);
        }
    }

    /// Size on the wire of a record carrying `plaintext_len` bytes.
    pub fn wire_len(&self, plaintext_len: usize) -> usize {
        let overhead = if self.is_protected() { AEAD_OVERHEAD } else { 0 };
        Record::HEADER_LEN + plaintext_len + overhead
    }

    /// Protect `plaintext` under this epoch and append the record to `out`.
    pub fn write_record(
        &mut self,
        content_type: ContentType,
        plaintext: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<(), Error> {
        if self.next_sequence > MAX_SEQUENCE {
            return Err(Error::Crypto(format!(
                "sequence numbers of epoch {} exhausted",
                self.epoch
            )));
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let Some(cipher) = &self.cipher else {
            serialize_record(content_type, self.epoch, sequence, plaintext, out);
            return Ok(());
        };

        let explicit = epoch_and_sequence(self.epoch, sequence);
        let aad = aad(
            self.epoch,
            sequence,
            content_type,
            ProtocolVersion::DTLS1_2,
            plaintext.len(),
        );

        let mut data = Vec::with_capacity(plaintext.len() + TAG_LEN);
        data.extend_from_slice(plaintext);
        cipher.seal(&explicit, &aad, &mut data).map_err(Error::Crypto)?;

        let mut fragment = Vec::with_capacity(EXPLICIT_NONCE_LEN + data.len());
        fragment.extend_from_slice(&explicit);
        fragment.extend_from_slice(&data);

        serialize_record(content_type, self.epoch, sequence, &fragment, out);
        Ok(())
    }
}

/// Inbound state of one epoch, with its own replay window.
#[derive(Debug, Clone)]
pub struct ReadState {
    epoch: u16,
    cipher: Option<RecordCipher>,
    window: ReplayWindow,
}

impl ReadState {
    pub fn plaintext(epoch: u16) -> Self {
        ReadState {
            epoch,
            cipher: None,
            window: ReplayWindow::new(),
        }
    }

    pub fn protected(epoch: u16, cipher: RecordCipher) -> Self {
        ReadState {
            epoch,
            cipher: Some(cipher),
            window: ReplayWindow::new(),
        }
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn is_protected(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn window(&self) -> &ReplayWindow {
        &self.window
    }

    /// Take over the records a copy of this epoch's state accepted.
    pub(crate) fn merge(&mut self, copy: &ReadState) {
        if copy.epoch == self.epoch {
            self.window.merge(&copy.window);
        }
    }

    /// Unprotect a record of this epoch.
    ///
    /// Returns `Ok(None)` for duplicates and records below the replay window,
    /// which are dropped silently. The window only advances once a record
    /// authenticated.
    pub fn open(&mut self, record: &Record) -> Result<Option<Vec<u8>>, RecordError> {
        debug_assert_eq!(record.epoch, self.epoch);

        if !self.window.check(record.sequence_number) {
            trace!(
                "Drop replayed or stale record epoch {} seq {} from {}",
                record.epoch,
                record.sequence_number,
                record.peer
            );
            return Ok(None);
        }

        let plaintext = match &self.cipher {
            None => record.fragment.clone(),
            Some(cipher) => {
                if record.fragment.len() < AEAD_OVERHEAD {
                    return Err(RecordError::decryption(
                        record.peer,
                        Some(record.content_type),
                        "protected record too short",
                    ));
                }
                let (explicit, ciphertext) = record.fragment.split_at(EXPLICIT_NONCE_LEN);
                let mut nonce = [0u8; EXPLICIT_NONCE_LEN];
                nonce.copy_from_slice(explicit);

                let aad = aad(
                    record.epoch,
                    record.sequence_number,
                    record.content_type,
                    record.version,
                    ciphertext.len() - TAG_LEN,
                );

                let mut data = ciphertext.to_vec();
                cipher.open(&nonce, &aad, &mut data).map_err(|e| {
                    RecordError::decryption(record.peer, Some(record.content_type), e)
                })?;
                data
            }
        };

        self.window.mark(record.sequence_number);
        Ok(Some(plaintext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertDescription;
    use std::net::SocketAddr;

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    fn pair() -> (WriteState, ReadState) {
        let cipher = RecordCipher::new(&[5u8; 16], [9, 9, 9, 9]).unwrap();
        (
            WriteState::protected(1, cipher.clone()),
            ReadState::protected(1, cipher),
        )
    }

    fn parse_one(datagram: &[u8]) -> Record {
        let (mut records, err) = Record::parse_datagram(peer(), datagram);
        assert!(err.is_none());
        records.remove(0)
    }

    #[test]
    fn protected_record_roundtrip() {
        let (mut write, mut read) = pair();
        let mut out = Vec::new();
        write
            .write_record(ContentType::ApplicationData, b"ping", &mut out)
            .unwrap();
        assert_eq!(out.len(), write.wire_len(4));

        let record = parse_one(&out);
        assert_eq!(record.epoch, 1);
        assert_eq!(record.sequence_number, 0);
        assert_eq!(read.open(&record).unwrap(), Some(b"ping".to_vec()));
    }

    #[test]
    fn duplicate_is_dropped_silently() {
        let (mut write, mut read) = pair();
        let mut out = Vec::new();
        write
            .write_record(ContentType::ApplicationData, b"ping", &mut out)
            .unwrap();
        let record = parse_one(&out);

        assert!(read.open(&record).unwrap().is_some());
        assert!(read.open(&record).unwrap().is_none());
    }

    #[test]
    fn forged_record_is_decrypt_error_and_does_not_advance_window() {
        let (mut write, mut read) = pair();
        let mut out = Vec::new();
        write
            .write_record(ContentType::ApplicationData, b"ping", &mut out)
            .unwrap();
        let mut record = parse_one(&out);
        let last = record.fragment.len() - 1;
        record.fragment[last] ^= 0xFF;

        let err = read.open(&record).unwrap_err();
        assert_eq!(err.description(), AlertDescription::DecryptError);
        assert!(err.is_decryption());
        assert!(read.window().check(record.sequence_number));
    }

    #[test]
    fn copies_of_an_epoch_reconcile() {
        let (mut write, mut read) = pair();
        let mut copy = write.clone();
        let mut read_copy = read.clone();

        let mut out = Vec::new();
        copy.write_record(ContentType::Handshake, b"hello", &mut out)
            .unwrap();
        let first = parse_one(&out);
        assert!(read_copy.open(&first).unwrap().is_some());

        write.catch_up(&copy);
        assert_eq!(write.next_sequence(), 1);

        let mut out = Vec::new();
        write
            .write_record(ContentType::ApplicationData, b"ping", &mut out)
            .unwrap();
        let second = parse_one(&out);
        assert_eq!(second.sequence_number, 1);
        assert!(read.open(&second).unwrap().is_some());

        read_copy.merge(&read);
        assert!(read_copy.open(&second).unwrap().is_none());
        assert!(read_copy.open(&first).unwrap().is_none());

        let other = WriteState::plaintext(0, 40);
        write.catch_up(&other);
        assert_eq!(write.next_sequence(), 2);
    }

    #[test]
    fn short_protected_record_is_decrypt_error() {
        let (_, mut read) = pair();
        let record = Record {
            content_type: ContentType::Handshake,
            version: ProtocolVersion::DTLS1_2,
            epoch: 1,
            sequence_number: 3,
            peer: peer(),
            fragment: vec![0; 10],
        };
        let err = read.open(&record).unwrap_err();
        assert_eq!(err.description(), AlertDescription::DecryptError);
    }

    #[test]
    fn exhausted_sequence_is_local_error() {
        let mut write = WriteState::plaintext(0, MAX_SEQUENCE + 1);
        let mut out = Vec::new();
        let err = write
            .write_record(ContentType::Handshake, &[1], &mut out)
            .unwrap_err();
        assert!(matches!(err, Error::Crypto(_)));
    }
}
