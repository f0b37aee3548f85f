//! Cryptographic building blocks, all backed by RustCrypto crates.

mod aead;
mod ecdhe;
mod prf;
mod signing;

pub use aead::{Aad, RecordCipher, AEAD_OVERHEAD, EXPLICIT_NONCE_LEN, TAG_LEN};
pub use ecdhe::{EcdhKeyPair, SECP256R1};
pub use prf::{hmac_sha256, master_secret, psk_premaster_secret, sha256, verify_data, KeyBlock};
pub use prf::{MASTER_SECRET_LEN, VERIFY_DATA_LEN};
pub use signing::{verify_with_certificate, EcdsaSigner, ECDSA_SECP256R1_SHA256};
