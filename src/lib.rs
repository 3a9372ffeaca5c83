//! `edgeforest` — space-constrained containers for microcontrollers (open
//! addressing, chained hashing, bit-packed storage) plus a Random Forest
//! trainer with incremental drift adaptation built on top of them.
//!
//! Module layout mirrors the dependency order of the container and
//! trainer subsystems: containers first (leaves), then the RNG and tree
//! node layout, then the forest trainer and drift controller.

pub mod error;

pub mod alloc;
pub mod hash_kernel;
pub mod slot_state;
pub mod bitarray;
pub mod packed_vector;
pub mod oamap;
pub mod chained_map;

pub mod rng;
pub mod tree;

pub mod dataset;
pub mod config;

pub mod forest;
pub mod drift;

pub mod logging;

pub use config::Config;
pub use dataset::Dataset;
pub use drift::DriftController;
pub use error::ForestError;
pub use forest::{ForestTrainer, TrainedForest};
pub use rng::DeterministicRng;
pub use tree::{DecisionTree, TreeNode};
