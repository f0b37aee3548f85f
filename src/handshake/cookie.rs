//! Stateless HelloVerifyRequest cookies (RFC 6347 §4.2.1).
//!
//! The cookie binds a ClientHello to the address it came from, so a
//! responder commits no per-peer state until the initiator proved it can
//! receive at that address. The secret rotates; cookies made with the
//! previous secret are still accepted.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::crypto::hmac_sha256;
use crate::message::ClientHello;
use crate::rng::SeededRng;
use crate::types::Cookie;

const SECRET_LIFETIME: Duration = Duration::from_secs(5 * 60);

pub(crate) struct CookieGenerator {
    rng: SeededRng,
    current: Zeroizing<[u8; 32]>,
    previous: Option<Zeroizing<[u8; 32]>>,
    next_rotation: Option<Instant>,
}

impl CookieGenerator {
    pub fn new(mut rng: SeededRng) -> Self {
        let current = fresh_secret(&mut rng);
        CookieGenerator {
            rng,
            current,
            previous: None,
            next_rotation: None,
        }
    }

    /// Cookie for `ch` received from `peer`.
    pub fn generate(&mut self, peer: SocketAddr, ch: &ClientHello, now: Instant) -> Option<Cookie> {
        self.rotate(now);
        let mac = compute(&self.current, peer, ch)?;
        Cookie::try_new(&mac)
    }

    /// Whether the cookie of `ch` was made by us for `peer`.
    pub fn verify(&mut self, peer: SocketAddr, ch: &ClientHello, now: Instant) -> bool {
        self.rotate(now);

        if ch.cookie.as_bytes().len() != 32 {
            return false;
        }

        let matches = |secret: &[u8; 32]| {
            compute(secret, peer, ch)
                .is_some_and(|mac| bool::from(mac[..].ct_eq(ch.cookie.as_bytes())))
        };

        matches(&*self.current) || self.previous.as_deref().is_some_and(|p| matches(p))
    }

    fn rotate(&mut self, now: Instant) {
        let Some(next_rotation) = self.next_rotation else {
            self.next_rotation = Some(now + SECRET_LIFETIME);
            return;
        };
        if now < next_rotation {
            return;
        }
        trace!("Rotate cookie secret");
        let fresh = fresh_secret(&mut self.rng);
        let old = std::mem::replace(&mut self.current, fresh);
        self.previous = Some(old);
        self.next_rotation = Some(now + SECRET_LIFETIME);
    }
}

fn fresh_secret(rng: &mut SeededRng) -> Zeroizing<[u8; 32]> {
    let mut secret = Zeroizing::new([0u8; 32]);
    rng.fill(&mut secret[..]);
    secret
}

// HMAC(secret, peer || client_random || session_id || cipher_suites || compression_methods)
fn compute(secret: &[u8; 32], peer: SocketAddr, ch: &ClientHello) -> Option<[u8; 32]> {
    let mut address = Vec::with_capacity(18);
    match peer.ip() {
        IpAddr::V4(ip) => address.extend_from_slice(&ip.octets()),
        IpAddr::V6(ip) => address.extend_from_slice(&ip.octets()),
    }
    address.extend_from_slice(&peer.port().to_be_bytes());

    let suites: Vec<u8> = ch
        .cipher_suites
        .iter()
        .flat_map(|s| s.to_be_bytes())
        .collect();
    let compressions: Vec<u8> = ch.compression_methods.iter().map(|c| c.as_u8()).collect();

    hmac_sha256(
        secret,
        &[
            &address,
            ch.random.as_bytes(),
            ch.session_id.as_bytes(),
            &suites,
            &compressions,
        ],
    )
    .map_err(|e| warn!("Cookie computation failed: {}", e))
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompressionMethod, ProtocolVersion, Random, SessionId};

    fn hello() -> ClientHello {
        ClientHello {
            client_version: ProtocolVersion::DTLS1_2,
            random: Random([7; 32]),
            session_id: SessionId::empty(),
            cookie: Cookie::default(),
            cipher_suites: vec![0x00A8],
            compression_methods: vec![CompressionMethod::Null],
            extensions: Vec::new(),
        }
    }

    fn peer() -> SocketAddr {
        "10.0.0.1:5684".parse().unwrap()
    }

    #[test]
    fn cookie_verifies_for_same_hello_and_peer() {
        let now = Instant::now();
        let mut generator = CookieGenerator::new(SeededRng::new(Some(1)));

        let mut ch = hello();
        ch.cookie = generator.generate(peer(), &ch, now).unwrap();
        assert_eq!(ch.cookie.as_bytes().len(), 32);
        assert!(generator.verify(peer(), &ch, now));

        let other: SocketAddr = "10.0.0.2:5684".parse().unwrap();
        assert!(!generator.verify(other, &ch, now));

        ch.random = Random([8; 32]);
        assert!(!generator.verify(peer(), &ch, now));
    }

    #[test]
    fn altered_cookie_is_rejected() {
        let now = Instant::now();
        let mut generator = CookieGenerator::new(SeededRng::new(Some(1)));

        let mut ch = hello();
        let cookie = generator.generate(peer(), &ch, now).unwrap();

        let mut bytes = cookie.as_bytes().to_vec();
        bytes[31] ^= 1;
        ch.cookie = Cookie::try_new(&bytes).unwrap();
        assert!(!generator.verify(peer(), &ch, now));

        ch.cookie = Cookie::try_new(&cookie.as_bytes()[..31]).unwrap();
        assert!(!generator.verify(peer(), &ch, now));
    }

    #[test]
    fn empty_cookie_is_rejected() {
        let mut generator = CookieGenerator::new(SeededRng::new(Some(1)));
        assert!(!generator.verify(peer(), &hello(), Instant::now()));
    }

    #[test]
    fn previous_secret_accepted_for_one_rotation() {
        let start = Instant::now();
        let mut generator = CookieGenerator::new(SeededRng::new(Some(1)));

        let mut ch = hello();
        ch.cookie = generator.generate(peer(), &ch, start).unwrap();

        let later = start + SECRET_LIFETIME;
        assert!(generator.verify(peer(), &ch, later));

        let much_later = later + SECRET_LIFETIME;
        assert!(!generator.verify(peer(), &ch, much_later));
    }
}
