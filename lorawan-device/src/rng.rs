//! A small `rand_core::RngCore` wrapper over `fastrand`, used when a caller has no hardware RNG
//! to supply (DevNonce generation, ACK-timeout jitter, randomized channel selection).
use rand_core::{Error, RngCore};

/// A non-cryptographic PRNG seeded once at construction. Good enough for the jitter and nonce
/// uses the MAC engine needs; callers with a hardware TRNG should implement `RngCore` directly
/// against it instead of using this type.
pub struct Prng {
    rng: fastrand::Rng,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        Self { rng: fastrand::Rng::with_seed(seed) }
    }
}

impl RngCore for Prng {
    fn next_u32(&mut self) -> u32 {
        self.rng.u32(..)
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.u64(..)
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for b in dest.iter_mut() {
            *b = self.rng.u8(..);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}
