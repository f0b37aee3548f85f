//! Seedable random number generator for deterministic testing.
//!
//! When a seed is provided via [`Config::rng_seed`](crate::Config::rng_seed),
//! hello randoms, session ids and cookie secrets become deterministic. Ephemeral
//! ECDH keys always come from the operating system.

use rand::distributions::{Distribution, Standard};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// A random number generator that can be seeded for deterministic behavior.
pub struct SeededRng {
    inner: Option<StdRng>,
}

impl SeededRng {
    /// Create a new RNG with an optional seed.
    ///
    /// If `seed` is `None`, the thread-local generator is used.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = seed.map(StdRng::seed_from_u64);
        Self { inner }
    }

    /// Derive an independent generator, seeded from this one when seeded.
    pub fn fork(&mut self) -> Self {
        match self.inner.as_mut() {
            Some(rng) => SeededRng::new(Some(rng.gen())),
            None => SeededRng::new(None),
        }
    }

    /// Generate a random value of type T.
    pub fn random<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        match self.inner.as_mut() {
            Some(rng) => rng.gen(),
            None => rand::random(),
        }
    }

    /// Fill `dest` with random bytes.
    pub fn fill(&mut self, dest: &mut [u8]) {
        match self.inner.as_mut() {
            Some(rng) => rng.fill_bytes(dest),
            None => rand::thread_rng().fill_bytes(dest),
        }
    }
}

impl std::fmt::Debug for SeededRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let is_seeded = self.inner.is_some();
        f.debug_struct("SeededRng")
            .field("seeded", &is_seeded)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_is_deterministic() {
        let mut rng1 = SeededRng::new(Some(12345));
        let mut rng2 = SeededRng::new(Some(12345));

        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        rng1.fill(&mut a);
        rng2.fill(&mut b);
        assert_eq!(a, b, "Same seed should produce same bytes");

        let x: u64 = rng1.random();
        let y: u64 = rng2.random();
        assert_eq!(x, y);
    }

    #[test]
    fn forked_rngs_diverge_from_parent() {
        let mut parent = SeededRng::new(Some(1));
        let mut child = parent.fork();

        let from_parent: u64 = parent.random();
        let from_child: u64 = child.random();
        assert_ne!(from_parent, from_child);
    }
}
