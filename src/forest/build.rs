//! §4.10 ForestTrainer, bootstrap sampling + per-tree BFS construction.
//!
//! Grounded on `examples/original_source/tools/pre_train/random_forest_pc.cpp`
//! (`RandomForest::build_tree`, the BFS queue / in-place partition / random
//! feature subset shape) generalized to spec §4.10's exact leaf/split rules
//! (the sample-size-scaled impurity threshold in step 5 is spec's own
//! redesign, not present in the original, which just halves
//! `impurity_threshold` for Gini).

use crate::chained_map::ChainedSet;
use crate::config::ResolvedConfig;
use crate::dataset::{Dataset, Sample};
use crate::rng::DeterministicRng;
use crate::tree::{DecisionTree, TreeNode};
use smallvec::SmallVec;
use std::collections::VecDeque;

/// Per-node feature-subset buffer (spec §4.10 step 3: `K = max(1,
/// floor(sqrt(num_features)))`). Inline storage for the common case of a
/// handful of quantized features, matching the teacher's own use of
/// `smallvec` for small bounded buffers (`art_node.rs`, `head_node.rs`).
type FeatureSubset = SmallVec<[u16; 16]>;

/// One grid-search candidate's pinned hyperparameters (spec §4.10, §6).
#[derive(Debug, Clone, Copy)]
pub struct HyperParams {
    pub min_split: u32,
    pub min_leaf: u32,
    pub max_depth: u32,
}

/// Packed-node threshold slots are stored in 2 bits (spec §3's worked
/// layout), so only the first 4 quantization slots are representable
/// regardless of how wide `B` is. Candidate thresholds above this are
/// never generated by [`build_tree`] — a documented consequence of the
/// spec's fixed 32-bit node layout, not a training bug (see DESIGN.md).
pub const MAX_STORABLE_THRESHOLD_SLOT: u8 = 3;

fn max_slot_for(quantization_bits: u8) -> u8 {
    let full = (1u16 << quantization_bits).saturating_sub(1) as u8;
    full.min(MAX_STORABLE_THRESHOLD_SLOT)
}

/// Draws one tree's bag of training-sample indices (spec §4.10): with
/// replacement when `use_bootstrap`, otherwise a without-replacement
/// Fisher-Yates selection of `floor(n * bootstrap_ratio)` indices. Retries
/// with an incremented nonce (up to 8 times) whenever the drawn multiset's
/// hash collides with one already seen, to guarantee distinct bags across
/// trees; the 9th attempt is accepted unconditionally as a perturbed
/// fallback.
pub fn draw_bag(
    base_rng: &DeterministicRng,
    tree_index: u64,
    n: usize,
    use_bootstrap: bool,
    bootstrap_ratio: f32,
    seen_bag_hashes: &mut ChainedSet<u64>,
) -> Vec<u32> {
    const MAX_RETRIES: u64 = 8;
    let mut nonce = 0u64;
    loop {
        let mut rng = base_rng.derive(tree_index, nonce);
        let bag = if use_bootstrap {
            (0..n).map(|_| rng.bounded(n as u32)).collect::<Vec<u32>>()
        } else {
            fisher_yates_select(&mut rng, n, ((n as f32) * bootstrap_ratio).floor() as usize)
        };
        let hash = multiset_hash(&bag);
        if nonce >= MAX_RETRIES || seen_bag_hashes.insert(hash) {
            return bag;
        }
        nonce += 1;
    }
}

fn fisher_yates_select(rng: &mut DeterministicRng, n: usize, k: usize) -> Vec<u32> {
    let k = k.min(n);
    let mut pool: Vec<u32> = (0..n as u32).collect();
    for i in 0..k {
        let j = i + rng.bounded((n - i) as u32) as usize;
        pool.swap(i, j);
    }
    pool.truncate(k);
    pool
}

/// Hashes a drawn bag (order-independent, since it is a multiset) with
/// `crc32fast`, matching the teacher's own `crc32fast` dependency — used
/// here to detect colliding bags across trees (spec §4.10) rather than
/// file-integrity checksums, its original purpose in the teacher repo.
fn multiset_hash(bag: &[u32]) -> u64 {
    let mut sorted = bag.to_vec();
    sorted.sort_unstable();
    let mut hasher = crc32fast::Hasher::new();
    for v in &sorted {
        hasher.update(&v.to_le_bytes());
    }
    hasher.finalize() as u64
}

struct NodeToBuild {
    node_index: usize,
    begin: usize,
    end: usize,
    depth: u32,
}

fn majority_label(dataset: &Dataset, indices: &[u32], range: std::ops::Range<usize>, num_labels: u16) -> (u8, bool) {
    let mut counts = vec![0u32; num_labels.max(1) as usize];
    for &idx in &indices[range] {
        let label = dataset.samples[idx as usize].label as usize;
        if label < counts.len() {
            counts[label] += 1;
        }
    }
    let mut best_label = 0u8;
    let mut best_count = 0u32;
    let mut distinct = 0;
    for (label, &count) in counts.iter().enumerate() {
        if count > 0 {
            distinct += 1;
        }
        if count > best_count {
            best_count = count;
            best_label = label as u8;
        }
    }
    (best_label, distinct <= 1)
}

fn impurity(counts: &[u32], total: u32, use_gini: bool) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f32;
    if use_gini {
        let sum_sq: f32 = counts.iter().map(|&c| (c as f32 / total).powi(2)).sum();
        1.0 - sum_sq
    } else {
        counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f32 / total;
                -p * p.log2()
            })
            .sum()
    }
}

struct BestSplit {
    feature_id: u16,
    slot: u8,
    gain: f32,
}

/// Selects `K = max(1, floor(sqrt(num_features)))` distinct feature
/// indices via partial Fisher-Yates over `0..num_features` (spec §4.10
/// step 3: "reservoir-style without repetition, drawn from `R_t`").
fn select_feature_subset(rng: &mut DeterministicRng, num_features: usize) -> FeatureSubset {
    let k = ((num_features as f32).sqrt().floor() as usize).max(1).min(num_features.max(1));
    fisher_yates_select(rng, num_features, k).into_iter().map(|v| v as u16).collect()
}

fn find_best_split(
    dataset: &Dataset,
    indices: &[u32],
    range: std::ops::Range<usize>,
    features: &[u16],
    num_labels: u16,
    use_gini: bool,
    min_leaf: u32,
    quantization_bits: u8,
) -> Option<BestSplit> {
    let slice = &indices[range.clone()];
    let total = slice.len() as u32;
    let mut parent_counts = vec![0u32; num_labels.max(1) as usize];
    for &idx in slice {
        let label = dataset.samples[idx as usize].label as usize;
        if label < parent_counts.len() {
            parent_counts[label] += 1;
        }
    }
    let parent_impurity = impurity(&parent_counts, total, use_gini);
    let max_slot = max_slot_for(quantization_bits);

    let mut best: Option<BestSplit> = None;
    for &feature_id in features {
        for slot in 0..=max_slot {
            let mut left_counts = vec![0u32; num_labels.max(1) as usize];
            let mut left_total = 0u32;
            for &idx in slice {
                let sample = &dataset.samples[idx as usize];
                let value = sample.features.get(feature_id as usize).copied().unwrap_or(0);
                if value <= slot {
                    left_total += 1;
                    let label = sample.label as usize;
                    if label < left_counts.len() {
                        left_counts[label] += 1;
                    }
                }
            }
            let right_total = total - left_total;
            if left_total < min_leaf || right_total < min_leaf {
                continue;
            }
            let right_counts: Vec<u32> = parent_counts
                .iter()
                .zip(left_counts.iter())
                .map(|(&p, &l)| p - l)
                .collect();
            let left_imp = impurity(&left_counts, left_total, use_gini);
            let right_imp = impurity(&right_counts, right_total, use_gini);
            let weighted = (left_total as f32 / total as f32) * left_imp + (right_total as f32 / total as f32) * right_imp;
            let gain = parent_impurity - weighted;
            let is_better = match &best {
                None => true,
                Some(b) => gain > b.gain,
            };
            if is_better {
                best = Some(BestSplit { feature_id, slot, gain });
            }
        }
    }
    best
}

/// Partitions `indices[range]` in place around `feature_id <= slot`
/// (samples satisfying the predicate move left), returning the split
/// point. Relative order within each side is not preserved (spec §3 does
/// not require stability).
fn partition_in_place(dataset: &Dataset, indices: &mut [u32], range: std::ops::Range<usize>, feature_id: u16, slot: u8) -> usize {
    let mut left = range.start;
    for k in range.clone() {
        let sample: &Sample = &dataset.samples[indices[k] as usize];
        let value = sample.features.get(feature_id as usize).copied().unwrap_or(0);
        if value <= slot {
            indices.swap(left, k);
            left += 1;
        }
    }
    left
}

/// Builds one tree breadth-first over `indices[..]` (owned by the caller;
/// mutated in place per spec's "Sampling view"). Returns the finished
/// [`DecisionTree`].
pub fn build_tree(
    dataset: &Dataset,
    indices: &mut [u32],
    params: &HyperParams,
    config: &ResolvedConfig,
    num_labels: u16,
    num_features: usize,
    rng: &mut DeterministicRng,
) -> DecisionTree {
    let mut tree = DecisionTree::new();
    if indices.is_empty() {
        tree.push(TreeNode::leaf(0));
        return tree;
    }
    tree.push(TreeNode::leaf(0)); // root placeholder

    let mut queue = VecDeque::new();
    queue.push_back(NodeToBuild {
        node_index: 0,
        begin: 0,
        end: indices.len(),
        depth: 0,
    });

    while let Some(current) = queue.pop_front() {
        let size = (current.end - current.begin) as u32;
        let (majority, all_equal) = majority_label(dataset, indices, current.begin..current.end, num_labels);

        let force_leaf = all_equal || size < params.min_split || current.depth >= params.max_depth;
        if force_leaf {
            tree.set(current.node_index, TreeNode::leaf(majority));
            continue;
        }

        let features = select_feature_subset(rng, num_features);
        let best = find_best_split(
            dataset,
            indices,
            current.begin..current.end,
            &features,
            num_labels,
            config.use_gini,
            params.min_leaf,
            config.quantization_bits,
        );

        let threshold_prime = (config.config.impurity_threshold / (1.0 + (size as f32 + 1.0).log2())).max(1e-4);
        let Some(best) = best.filter(|b| b.gain > threshold_prime) else {
            tree.set(current.node_index, TreeNode::leaf(majority));
            continue;
        };

        let split_point = partition_in_place(dataset, indices, current.begin..current.end, best.feature_id, best.slot);
        let (left_begin, left_end) = (current.begin, split_point);
        let (right_begin, right_end) = (split_point, current.end);

        let left_child_index = tree.len();
        if !tree.push(TreeNode::leaf(majority)) || !tree.push(TreeNode::leaf(majority)) {
            // Node budget exhausted (spec I4 / §7 resource exhaustion):
            // give up on this split and keep the current node a leaf.
            tree.set(current.node_index, TreeNode::leaf(majority));
            continue;
        }
        tree.set(
            current.node_index,
            TreeNode::internal(best.feature_id, best.slot, left_child_index as u16),
        );

        if left_end > left_begin {
            queue.push_back(NodeToBuild {
                node_index: left_child_index,
                begin: left_begin,
                end: left_end,
                depth: current.depth + 1,
            });
        } // else: leaf(majority) placeholder already correct (spec edge case)

        if right_end > right_begin {
            queue.push_back(NodeToBuild {
                node_index: left_child_index + 1,
                begin: right_begin,
                end: right_end,
                depth: current.depth + 1,
            });
        }
    }

    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn xor_dataset() -> Dataset {
        // 2-feature XOR-like dataset, B=2.
        let mut samples = Vec::new();
        for a in 0..2u8 {
            for b in 0..2u8 {
                let label = a ^ b;
                for _ in 0..25 {
                    samples.push(Sample {
                        features: vec![a, b],
                        label,
                    });
                }
            }
        }
        Dataset {
            samples,
            num_features: 2,
            quantization_bits: Some(2),
            num_labels: Some(2),
        }
    }

    fn resolved(quant_bits: u8) -> ResolvedConfig {
        Config::default().reconcile(2, &[50, 50], Some(quant_bits)).unwrap()
    }

    #[test]
    fn bootstrap_bags_are_distinct_across_trees() {
        let rng = DeterministicRng::new(42);
        let mut seen = ChainedSet::new();
        let bag_a = draw_bag(&rng, 0, 100, true, 0.632, &mut seen);
        let bag_b = draw_bag(&rng, 1, 100, true, 0.632, &mut seen);
        assert_ne!(bag_a, bag_b);
    }

    #[test]
    fn non_bootstrap_draws_ratio_sized_bag_without_replacement() {
        let rng = DeterministicRng::new(1);
        let mut seen = ChainedSet::new();
        let bag = draw_bag(&rng, 0, 100, false, 0.5, &mut seen);
        assert_eq!(bag.len(), 50);
        let mut sorted = bag.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), bag.len(), "without-replacement draw must not repeat indices");
    }

    #[test]
    fn builds_a_separating_tree_on_xor_data() {
        let dataset = xor_dataset();
        let config = resolved(2);
        let params = HyperParams {
            min_split: 2,
            min_leaf: 1,
            max_depth: 10,
        };
        let mut indices: Vec<u32> = (0..dataset.samples.len() as u32).collect();
        let mut rng = DeterministicRng::new(7);
        let tree = build_tree(&dataset, &mut indices, &params, &config, 2, 2, &mut rng);
        let mut correct = 0;
        for sample in &dataset.samples {
            if tree.predict(&sample.features) == sample.label {
                correct += 1;
            }
        }
        assert!(correct as f32 / dataset.samples.len() as f32 > 0.9);
    }

    #[test]
    fn empty_index_range_yields_single_leaf() {
        let dataset = xor_dataset();
        let config = resolved(2);
        let params = HyperParams {
            min_split: 2,
            min_leaf: 1,
            max_depth: 5,
        };
        let mut indices: Vec<u32> = Vec::new();
        let mut rng = DeterministicRng::new(1);
        let tree = build_tree(&dataset, &mut indices, &params, &config, 2, 2, &mut rng);
        assert_eq!(tree.len(), 1);
        assert!(tree.nodes()[0].is_leaf());
    }

    #[test]
    fn same_seed_produces_bit_identical_tree() {
        let dataset = xor_dataset();
        let config = resolved(2);
        let params = HyperParams {
            min_split: 2,
            min_leaf: 1,
            max_depth: 10,
        };
        let build = || {
            let mut indices: Vec<u32> = (0..dataset.samples.len() as u32).collect();
            let mut rng = DeterministicRng::new(99);
            build_tree(&dataset, &mut indices, &params, &config, 2, 2, &mut rng)
        };
        let a = build();
        let b = build();
        assert_eq!(a.nodes(), b.nodes());
    }
}
