//! TLS 1.2 PRF (RFC 5246 §5) with HMAC-SHA256 and the key schedule built on it.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::types::Random;

pub const MASTER_SECRET_LEN: usize = 48;
pub const VERIFY_DATA_LEN: usize = 12;

const MAC_KEY_LEN: usize = 0;
const ENC_KEY_LEN: usize = 16;
const FIXED_IV_LEN: usize = 4;
const KEY_BLOCK_LEN: usize = 2 * (MAC_KEY_LEN + ENC_KEY_LEN + FIXED_IV_LEN);

/// PRF(secret, label, seed) = P_SHA256(secret, label + seed)
pub fn prf_tls12(
    secret: &[u8],
    label: &str,
    seed: &[u8],
    output_len: usize,
) -> Result<Zeroizing<Vec<u8>>, String> {
    let mut full_seed = Vec::with_capacity(label.len() + seed.len());
    full_seed.extend_from_slice(label.as_bytes());
    full_seed.extend_from_slice(seed);

    p_hash(secret, &full_seed, output_len)
}

fn p_hash(secret: &[u8], full_seed: &[u8], output_len: usize) -> Result<Zeroizing<Vec<u8>>, String> {
    let mut out = Zeroizing::new(Vec::with_capacity(output_len));

    let new_mac = || {
        Hmac::<Sha256>::new_from_slice(secret).map_err(|_| "Invalid HMAC key length".to_string())
    };

    // A(1) = HMAC_hash(secret, A(0)) where A(0) = seed
    let mut a_mac = new_mac()?;
    a_mac.update(full_seed);
    let mut a = a_mac.finalize().into_bytes();

    while out.len() < output_len {
        // HMAC_hash(secret, A(i) + seed)
        let mut ctx = new_mac()?;
        ctx.update(&a);
        ctx.update(full_seed);
        let output = ctx.finalize().into_bytes();

        let to_copy = (output_len - out.len()).min(output.len());
        out.extend_from_slice(&output[..to_copy]);

        if out.len() < output_len {
            // A(i+1) = HMAC_hash(secret, A(i))
            let mut next = new_mac()?;
            next.update(&a);
            a = next.finalize().into_bytes();
        }
    }

    Ok(out)
}

/// HMAC-SHA256, used for the stateless cookie.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 32], String> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|_| "Invalid HMAC key length".to_string())?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// master_secret = PRF(pre_master_secret, "master secret", client_random + server_random)
pub fn master_secret(
    pre_master_secret: &[u8],
    client_random: &Random,
    server_random: &Random,
) -> Result<Zeroizing<Vec<u8>>, String> {
    let mut seed = Vec::with_capacity(64);
    seed.extend_from_slice(client_random.as_bytes());
    seed.extend_from_slice(server_random.as_bytes());
    prf_tls12(pre_master_secret, "master secret", &seed, MASTER_SECRET_LEN)
}

/// The four pieces of record keying material for one connection.
pub struct KeyBlock {
    pub client_write_key: Zeroizing<Vec<u8>>,
    pub server_write_key: Zeroizing<Vec<u8>>,
    pub client_write_iv: [u8; FIXED_IV_LEN],
    pub server_write_iv: [u8; FIXED_IV_LEN],
}

impl KeyBlock {
    /// key_block = PRF(master_secret, "key expansion", server_random + client_random)
    pub fn derive(
        master_secret: &[u8],
        client_random: &Random,
        server_random: &Random,
    ) -> Result<Self, String> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(server_random.as_bytes());
        seed.extend_from_slice(client_random.as_bytes());
        let block = prf_tls12(master_secret, "key expansion", &seed, KEY_BLOCK_LEN)?;

        let (client_write_key, rest) = block.split_at(ENC_KEY_LEN);
        let (server_write_key, rest) = rest.split_at(ENC_KEY_LEN);
        let (client_write_iv, server_write_iv) = rest.split_at(FIXED_IV_LEN);

        let mut c_iv = [0u8; FIXED_IV_LEN];
        c_iv.copy_from_slice(client_write_iv);
        let mut s_iv = [0u8; FIXED_IV_LEN];
        s_iv.copy_from_slice(server_write_iv);

        Ok(KeyBlock {
            client_write_key: Zeroizing::new(client_write_key.to_vec()),
            server_write_key: Zeroizing::new(server_write_key.to_vec()),
            client_write_iv: c_iv,
            server_write_iv: s_iv,
        })
    }
}

/// verify_data = PRF(master_secret, finished_label, Hash(handshake_messages))[0..12]
pub fn verify_data(
    master_secret: &[u8],
    is_client: bool,
    transcript: &[u8],
) -> Result<[u8; VERIFY_DATA_LEN], String> {
    let label = if is_client {
        "client finished"
    } else {
        "server finished"
    };
    let hash = sha256(transcript);
    let out = prf_tls12(master_secret, label, &hash, VERIFY_DATA_LEN)?;
    let mut verify = [0u8; VERIFY_DATA_LEN];
    verify.copy_from_slice(&out);
    Ok(verify)
}

/// RFC 4279 §2: other_secret is N zero bytes for plain PSK.
pub fn psk_premaster_secret(psk: &[u8]) -> Zeroizing<Vec<u8>> {
    let n = psk.len() as u16;
    let mut out = Zeroizing::new(Vec::with_capacity(4 + 2 * psk.len()));
    out.extend_from_slice(&n.to_be_bytes());
    out.extend(std::iter::repeat(0u8).take(psk.len()));
    out.extend_from_slice(&n.to_be_bytes());
    out.extend_from_slice(psk);
    out
}
