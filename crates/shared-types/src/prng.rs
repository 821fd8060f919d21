//! # Randomness Service
//!
//! The engine never touches a random number generator directly. Instance uids,
//! message uids and the per-message randomization performed by the channel
//! layer all draw from a [`PrngService`].

use crate::entities::{Uid, UID_LENGTH};
use parking_lot::Mutex;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};

/// Source of cryptographically secure random bytes.
pub trait PrngService: Send + Sync {
    /// Fill `dest` with random bytes.
    fn fill_bytes(&self, dest: &mut [u8]);

    /// Generate a fresh random uid.
    fn gen_uid(&self) -> Uid {
        let mut bytes = [0u8; UID_LENGTH];
        self.fill_bytes(&mut bytes);
        Uid(bytes)
    }
}

/// Operating-system backed PRNG. Production default.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsPrng;

impl PrngService for OsPrng {
    fn fill_bytes(&self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Deterministic PRNG seeded from a fixed value, for tests and replays.
pub struct SeededPrng {
    rng: Mutex<StdRng>,
}

impl SeededPrng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl PrngService for SeededPrng {
    fn fill_bytes(&self, dest: &mut [u8]) {
        self.rng.lock().fill_bytes(dest);
    }
}
