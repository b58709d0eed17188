//! Seeded randomness for simulation runs.
//!
//! A run carries one master seed. Every consumer of randomness (slippage noise,
//! Monte Carlo VaR, synthetic data) asks for its own stream by name, and the
//! stream's seed is a BLAKE3 hash of `(master, stream, index)`. Derivation does
//! not depend on call order, so parallel sweeps reproduce single-threaded runs.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Well-known stream names.
pub mod streams {
    pub const SLIPPAGE: &str = "slippage";
    pub const MONTE_CARLO: &str = "monte-carlo";
    pub const SYNTHETIC: &str = "synthetic";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RngHierarchy {
    master_seed: u64,
}

impl RngHierarchy {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    /// Deterministic sub-seed for `(stream, index)`.
    pub fn sub_seed(&self, stream: &str, index: u64) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.master_seed.to_le_bytes());
        hasher.update(stream.as_bytes());
        hasher.update(&index.to_le_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }

    pub fn rng_for(&self, stream: &str, index: u64) -> StdRng {
        StdRng::seed_from_u64(self.sub_seed(stream, index))
    }
}
