//! Crate-wide error taxonomy (spec §7).
//!
//! Three of the four error classes in the design notes are surfaced through
//! `Result`: configuration errors always propagate to the caller; resource
//! exhaustion and invalid persisted state are converted into local skips by
//! their caller and only reach a `Result` at the boundary that decides
//! whether to keep going. Programmer errors (out-of-range index on a safe
//! accessor) never produce an `Error` value — they clamp or return a default,
//! per §7.

use thiserror::Error;

/// Configuration-time failures. These always abort the run that produced
/// them; nothing downstream can recover from a malformed config or dataset
/// header.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("quantization_coefficient {0} is not one of {{1,2,3,4,6,8}}")]
    InvalidQuantizationBitWidth(u8),
    #[error("split ratios {train}+{test}+{valid} do not reconcile with training_score {mode}")]
    InconsistentSplitRatio {
        train: f32,
        test: f32,
        valid: f32,
        mode: &'static str,
    },
    #[error("missing required quantization_coefficient: not in config and no *_dp.csv metadata file found")]
    MissingQuantizationBitWidth,
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset record on line {line} has {found} features, expected {expected}")]
    MalformedRecord {
        line: usize,
        found: usize,
        expected: usize,
    },
}

/// Resource-exhaustion conditions: the allocator returned nothing, or a
/// container reached saturation. These degrade gracefully at the call site
/// (returning `false`/abstaining) — this type exists so the trainer can log
/// a structured reason when it decides to skip a candidate.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    #[error("allocator exhausted for requested block")]
    AllocatorExhausted,
    #[error("open-addressing table saturated at virtual capacity")]
    MapSaturated,
    #[error("chained map has no free shard and cannot grow further")]
    ChainExhausted,
    #[error("decision tree exceeded the 2047-node budget")]
    TreeNodeBudgetExceeded,
}

/// Invalid persisted or runtime state: corrupt tree files, bad magic,
/// out-of-bounds child indices encountered during prediction.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("bad magic 0x{found:08x}, expected 0x{expected:08x}")]
    BadMagic { found: u32, expected: u32 },
    #[error("node count {0} exceeds the 2047-node budget")]
    NodeCountExceeded(u32),
    #[error("truncated tree file: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
}

/// Top-level error returned from the public trainer/drift-controller APIs.
#[derive(Debug, Error)]
pub enum ForestError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error(transparent)]
    State(#[from] StateError),
}

pub type Result<T, E = ForestError> = std::result::Result<T, E>;
