//! §4.2 HashKernel — integer/float key to small-range index mapping, tuned
//! per table capacity.
//!
//! The teacher repo selects its hash family through a cargo feature
//! (`hash_crc32` vs `hash_wyhash` vs the `rustc_hash::FxHasher` default —
//! see `hash_leaf.rs`/`alloc_hash.rs`); we follow the same shape here with
//! `hash-16class`/`hash-8class` features selecting between the two
//! compile-time mixing-constant tables spec §4.2 calls for. Per-`cap`
//! constants are generated once into a `once_cell::sync::Lazy` table, the
//! same pattern the teacher uses for its global lazily-initialized state
//! (`adaptive.rs::RAND`).

use once_cell::sync::Lazy;

/// One entry per possible table capacity `[0, 255]`: a multiplicative
/// mixing constant and the coprime probe stride derived from it.
#[derive(Clone, Copy)]
struct CapTuning {
    mix: u64,
    stride: u8,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Smallest stride `>= 1` that is coprime to `cap`, preferring odd strides
/// (odd numbers are coprime to any power of two and tend to avoid short
/// cycles for typical small `cap`).
fn coprime_stride(cap: u16) -> u8 {
    if cap <= 1 {
        return 1;
    }
    let cap64 = cap as u64;
    let mut candidate: u64 = if cap % 2 == 0 { 1 } else { 2 };
    loop {
        if gcd(candidate, cap64) == 1 {
            return (candidate % cap64).max(1) as u8;
        }
        candidate += 1;
        if candidate >= cap64 {
            return 1;
        }
    }
}

/// Builds the per-capacity mixing table. The "16-collision-class" variant
/// draws from a wider spread of odd multiplicative constants (more distinct
/// constants per capacity class, preferred for accuracy); the
/// "8-collision-class" variant reuses fewer constants across neighbouring
/// capacities (preferred for code size), per spec §4.2.
fn build_table(classes: u64) -> Vec<CapTuning> {
    // A fixed base sequence of odd 64-bit multiplicative constants, cycled
    // through `classes` buckets keyed by `cap % classes`. Values are drawn
    // from the well-known splitmix64 family of odd odd-phi-derived
    // constants so that neighbouring classes disperse bits well.
    const BASE_CONSTANTS: [u64; 16] = [
        0x9E3779B97F4A7C15,
        0xBF58476D1CE4E5B9,
        0x94D049BB133111EB,
        0xFF51AFD7ED558CCD,
        0xC4CEB9FE1A85EC53,
        0x2545F4914F6CDD1D,
        0xD6E8FEB86659FD93,
        0xA24BAED4963EE407,
        0x9FB21C651E98DF25,
        0x369DEA0F31A53F85,
        0xE6646B9A862F3223,
        0x7A646E4D55B25E1F,
        0xB5026F5AA96619E9,
        0x1D8E4E27C47D124F,
        0xC2B2AE3D27D4EB4F,
        0x165667B19E3779F9,
    ];
    (0u16..=255)
        .map(|cap| {
            let bucket = (cap as u64) % classes;
            let mix = BASE_CONSTANTS[(bucket as usize) % BASE_CONSTANTS.len()];
            let stride = coprime_stride(cap.max(1));
            CapTuning { mix, stride }
        })
        .collect()
}

static TABLE_16CLASS: Lazy<Vec<CapTuning>> = Lazy::new(|| build_table(16));
static TABLE_8CLASS: Lazy<Vec<CapTuning>> = Lazy::new(|| build_table(8));

fn active_table() -> &'static Lazy<Vec<CapTuning>> {
    if cfg!(feature = "hash-8class") {
        &TABLE_8CLASS
    } else {
        &TABLE_16CLASS
    }
}

fn tuning_for(cap: u16) -> CapTuning {
    active_table()[cap.min(255) as usize]
}

/// Maps an integer key into `[0, cap)`. `cap` must be in `[1, 255]` (the
/// container layer never calls with a larger physical capacity — that is
/// exactly the point of chaining, §4.7).
pub fn hash_u64(key: u64, cap: u16) -> u16 {
    debug_assert!(cap >= 1 && cap <= 255);
    if cap == 0 {
        return 0;
    }
    let CapTuning { mix, .. } = tuning_for(cap);
    let mut x = key ^ mix;
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    (x % cap as u64) as u16
}

/// Float keys are hashed by canonical bit reinterpretation (normalizing
/// `-0.0` to `0.0` and canonicalizing all NaNs so that equal-by-IEEE-754
/// floats, and all NaNs, hash identically) followed by the integer kernel.
pub fn hash_f64(key: f64, cap: u16) -> u16 {
    let canonical = if key == 0.0 {
        0.0_f64
    } else if key.is_nan() {
        f64::NAN
    } else {
        key
    };
    hash_u64(canonical.to_bits(), cap)
}

/// `linear_probe(index, cap, step)` — `step` is the coprime stride derived
/// once per `cap` at resize time (spec §4.2).
pub fn linear_probe(index: u16, cap: u16, step: u8) -> u16 {
    debug_assert!(cap >= 1);
    ((index as u32 + step as u32) % cap as u32) as u16
}

/// Stride to use for a given table capacity; derived once at resize and
/// then threaded through every `linear_probe` call for that table.
pub fn probe_stride(cap: u16) -> u8 {
    tuning_for(cap).stride
}

/// A modulus hash not bounded to the 255-slot single-table budget, used by
/// [`crate::chained_map::ChainedMap`] to route a key into one of its
/// shards' key ranges. Shares the same mixing core as [`hash_u64`] so that
/// a key's route and its in-shard slot are both derived from one
/// consistent bit-mixing step.
pub fn hash_wide(key: u64, modulus: u32) -> u32 {
    debug_assert!(modulus > 0);
    let mut x = key ^ 0x9E3779B97F4A7C15;
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^= x >> 33;
    (x % modulus as u64) as u32
}
