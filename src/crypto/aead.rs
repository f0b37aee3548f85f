//! AES-128-GCM record protection (RFC 5288).

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::Aes128Gcm;

/// 8-byte explicit nonce carried in every protected record.
pub const EXPLICIT_NONCE_LEN: usize = 8;
pub const TAG_LEN: usize = 16;
/// Bytes added to a fragment by protection.
pub const AEAD_OVERHEAD: usize = EXPLICIT_NONCE_LEN + TAG_LEN;

/// Additional authenticated data: seq_num(8) + type(1) + version(2) + length(2).
pub type Aad = [u8; 13];

/// One direction of record protection.
#[derive(Clone)]
pub struct RecordCipher {
    aead: Aes128Gcm,
    fixed_iv: [u8; 4],
}

impl RecordCipher {
    pub fn new(key: &[u8], fixed_iv: [u8; 4]) -> Result<Self, String> {
        let aead = Aes128Gcm::new_from_slice(key)
            .map_err(|_| format!("Invalid key size for AES-128-GCM: {}", key.len()))?;
        Ok(RecordCipher { aead, fixed_iv })
    }

    fn nonce(&self, explicit: &[u8; EXPLICIT_NONCE_LEN]) -> [u8; 12] {
        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.fixed_iv);
        nonce[4..].copy_from_slice(explicit);
        nonce
    }

    /// Encrypt `data` in place, appending the tag.
    pub fn seal(
        &self,
        explicit: &[u8; EXPLICIT_NONCE_LEN],
        aad: &Aad,
        data: &mut Vec<u8>,
    ) -> Result<(), String> {
        let nonce = self.nonce(explicit);
        self.aead
            .encrypt_in_place(GenericArray::from_slice(&nonce), aad, data)
            .map_err(|_| "AES-GCM encryption failed".to_string())
    }

    /// Decrypt `data` (ciphertext || tag) in place, removing the tag.
    pub fn open(
        &self,
        explicit: &[u8; EXPLICIT_NONCE_LEN],
        aad: &Aad,
        data: &mut Vec<u8>,
    ) -> Result<(), String> {
        if data.len() < TAG_LEN {
            return Err(format!("Ciphertext too short: {}", data.len()));
        }
        let nonce = self.nonce(explicit);
        self.aead
            .decrypt_in_place(GenericArray::from_slice(&nonce), aad, data)
            .map_err(|_| "AES-GCM decryption failed".to_string())
    }
}

impl std::fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RecordCipher").field(&"AES_128_GCM").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open() {
        let cipher = RecordCipher::new(&[9u8; 16], [1, 2, 3, 4]).unwrap();
        let explicit = [0u8, 1, 0, 0, 0, 0, 0, 5];
        let aad = [0u8; 13];

        let mut data = b"hello".to_vec();
        cipher.seal(&explicit, &aad, &mut data).unwrap();
        assert_eq!(data.len(), 5 + TAG_LEN);

        cipher.open(&explicit, &aad, &mut data).unwrap();
        assert_eq!(data, b"hello");
    }

    #[test]
    fn tampered_aad_fails() {
        let cipher = RecordCipher::new(&[9u8; 16], [1, 2, 3, 4]).unwrap();
        let explicit = [0u8; 8];
        let mut data = b"payload".to_vec();
        cipher.seal(&explicit, &[0u8; 13], &mut data).unwrap();

        let mut aad = [0u8; 13];
        aad[8] = 23;
        assert!(cipher.open(&explicit, &aad, &mut data).is_err());
    }

    #[test]
    fn wrong_key_length() {
        assert!(RecordCipher::new(&[0u8; 15], [0; 4]).is_err());
    }
}
