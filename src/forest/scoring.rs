//! §4.10 scoring modes (OOB / hold-out / k-fold), weighted consensus, and
//! the consensus-threshold sweep shared across all three (SPEC_FULL.md §C.2).
//!
//! Grounded on `examples/original_source/tools/pre_train/random_forest_pc.cpp`
//! (`get_training_evaluation_index`, `computeConsensus`) and
//! `tools/drift_benchmark/src/random_forest_pc.cpp` (`computeConsensus`
//! weighted by `tree_scores`).

use crate::chained_map::ChainedSet;
use crate::config::{ResolvedConfig, TrainingFlags};
use crate::dataset::{Dataset, Sample};
use crate::forest::build::{build_tree, HyperParams};
use crate::rng::DeterministicRng;
use crate::tree::DecisionTree;

/// Per-sample tree bag membership, built once per forest (spec §4.10:
/// "precomputed once by inverted index"). Backed by
/// [`crate::chained_map::ChainedSet`] so membership checks stay within the
/// container layer's own addressing budget rather than reaching for a
/// general-purpose set.
pub struct OobIndex {
    bag_membership: Vec<ChainedSet<u32>>,
}

impl OobIndex {
    pub fn build(bags: &[Vec<u32>]) -> Self {
        let bag_membership = bags
            .iter()
            .map(|bag| {
                let mut set = ChainedSet::new();
                for &idx in bag {
                    set.insert(idx);
                }
                set
            })
            .collect();
        Self { bag_membership }
    }

    /// Trees whose bag did *not* draw `sample_idx`.
    pub fn trees_without(&self, sample_idx: u32) -> Vec<usize> {
        self.bag_membership
            .iter()
            .enumerate()
            .filter(|(_, set)| !set.contains(&sample_idx))
            .map(|(t, _)| t)
            .collect()
    }

    /// Fraction of training samples whose OOB vote count cleared
    /// `min(1, ceil(0.15 * num_trees))` — a diagnostic accessor
    /// (SPEC_FULL.md §C.1), used only for logging.
    pub fn coverage(&self, num_samples: usize) -> f32 {
        if num_samples == 0 || self.bag_membership.is_empty() {
            return 0.0;
        }
        let min_votes = min_oob_votes_required(self.bag_membership.len());
        let covered = (0..num_samples as u32)
            .filter(|&i| self.trees_without(i).len() >= min_votes)
            .count();
        covered as f32 / num_samples as f32
    }
}

pub fn min_oob_votes_required(num_trees: usize) -> usize {
    ((num_trees as f32 * 0.15).ceil() as usize).max(1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConsensusResult {
    pub predicted_label: Option<u8>,
    pub consensus: f32,
    pub total_votes: u32,
}

/// Weighted-majority consensus over `tree_indices` (or all trees when
/// `None`). Vote weight for tree `t` is `weights[t]` when present, else
/// 1.0 (spec §4.10 "Consensus"). `predicted_label` is `None` only when no
/// polled tree produced an in-range prediction.
pub fn compute_consensus(
    trees: &[DecisionTree],
    features: &[u8],
    num_labels: u16,
    weights: Option<&[f32]>,
    tree_indices: Option<&[usize]>,
) -> ConsensusResult {
    let mut vote_weight = vec![0.0f32; num_labels.max(1) as usize];
    let mut total_weight = 0.0f32;
    let mut total_votes = 0u32;

    let indices: Vec<usize> = match tree_indices {
        Some(idx) => idx.to_vec(),
        None => (0..trees.len()).collect(),
    };

    for t in indices {
        let Some(tree) = trees.get(t) else { continue };
        let predicted = tree.predict(features);
        if (predicted as usize) >= vote_weight.len() {
            continue;
        }
        let weight = weights.and_then(|w| w.get(t)).copied().unwrap_or(1.0);
        vote_weight[predicted as usize] += weight;
        total_weight += weight;
        total_votes += 1;
    }

    if total_votes == 0 || total_weight <= 0.0 {
        return ConsensusResult::default();
    }

    let (label, &max_weight) = vote_weight
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, w)| (i as u8, w))
        .unwrap();

    ConsensusResult {
        predicted_label: Some(label),
        consensus: max_weight / total_weight,
        total_votes,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Metrics {
    pub accuracy: f32,
    pub precision: f32,
    pub recall: f32,
    pub f1: f32,
    pub f_beta_0_5: f32,
    pub f_beta_2: f32,
}

fn f_beta(precision: f32, recall: f32, beta: f32) -> f32 {
    let b2 = beta * beta;
    let denom = b2 * precision + recall;
    if denom <= 0.0 {
        0.0
    } else {
        (1.0 + b2) * precision * recall / denom
    }
}

/// Macro-averaged precision/recall/F1 across `num_labels` classes, plus
/// accuracy, over (predicted, actual) pairs that were not abstained.
pub fn compute_metrics(observations: &[(u8, u8)], num_labels: u16) -> Metrics {
    if observations.is_empty() {
        return Metrics::default();
    }
    let n = num_labels.max(1) as usize;
    let mut tp = vec![0u32; n];
    let mut fp = vec![0u32; n];
    let mut fn_ = vec![0u32; n];
    let mut correct = 0u32;
    for &(predicted, actual) in observations {
        if predicted == actual {
            correct += 1;
            if (actual as usize) < n {
                tp[actual as usize] += 1;
            }
        } else {
            if (actual as usize) < n {
                fn_[actual as usize] += 1;
            }
            if (predicted as usize) < n {
                fp[predicted as usize] += 1;
            }
        }
    }
    let mut precisions = Vec::with_capacity(n);
    let mut recalls = Vec::with_capacity(n);
    for c in 0..n {
        let p_denom = tp[c] + fp[c];
        let r_denom = tp[c] + fn_[c];
        if p_denom > 0 {
            precisions.push(tp[c] as f32 / p_denom as f32);
        }
        if r_denom > 0 {
            recalls.push(tp[c] as f32 / r_denom as f32);
        }
    }
    let precision = mean(&precisions);
    let recall = mean(&recalls);
    Metrics {
        accuracy: correct as f32 / observations.len() as f32,
        precision,
        recall,
        f1: f_beta(precision, recall, 1.0),
        f_beta_0_5: f_beta(precision, recall, 0.5),
        f_beta_2: f_beta(precision, recall, 2.0),
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f32>() / values.len() as f32
    }
}

/// Reduces a [`Metrics`] to the single scalar the grid search maximises,
/// per the configured `training_flag` bits (spec §6): a single set bit
/// selects that metric; multiple set bits average them with equal weight
/// ("an equal-weight average of selected metrics", spec §4.10); no bits
/// falls back to accuracy.
pub fn objective_score(metrics: &Metrics, flags: TrainingFlags) -> f32 {
    let mut selected = Vec::new();
    if flags.contains(TrainingFlags::ACCURACY) {
        selected.push(metrics.accuracy);
    }
    if flags.contains(TrainingFlags::PRECISION) {
        selected.push(metrics.precision);
    }
    if flags.contains(TrainingFlags::RECALL) {
        selected.push(metrics.recall);
    }
    if flags.contains(TrainingFlags::F1) {
        selected.push(metrics.f1);
    }
    if selected.is_empty() {
        metrics.accuracy
    } else {
        mean(&selected)
    }
}

/// One sample's consensus observation for threshold sweeping.
#[derive(Debug, Clone, Copy)]
pub struct Observation {
    pub predicted: u8,
    pub actual: u8,
    pub consensus: f32,
}

/// Sweeps every distinct observed consensus ratio as a candidate
/// abstention threshold, scoring only samples whose consensus clears it,
/// and returns the threshold/score pair that maximises the configured
/// objective (spec §4.10, §8 testable property: "any alternative
/// threshold yields <= that score").
pub fn sweep_threshold(observations: &[Observation], num_labels: u16, flags: TrainingFlags) -> (f32, f32) {
    if observations.is_empty() {
        return (0.0, 0.0);
    }
    let mut candidates: Vec<f32> = observations.iter().map(|o| o.consensus).collect();
    candidates.sort_by(|a, b| a.partial_cmp(b).unwrap());
    candidates.dedup_by(|a, b| (*a - *b).abs() < f32::EPSILON);

    let mut best_threshold = candidates[0];
    let mut best_score = f32::MIN;
    for &threshold in &candidates {
        let included: Vec<(u8, u8)> = observations
            .iter()
            .filter(|o| o.consensus >= threshold)
            .map(|o| (o.predicted, o.actual))
            .collect();
        if included.is_empty() {
            continue;
        }
        let metrics = compute_metrics(&included, num_labels);
        let score = objective_score(&metrics, flags);
        if score > best_score {
            best_score = score;
            best_threshold = threshold;
        }
    }
    (best_threshold, best_score.max(0.0))
}

/// OOB scoring (spec §4.10 "OOB"): skip samples below the minimum OOB
/// vote count, then sweep the consensus threshold over the rest.
pub fn oob_score(
    dataset: &Dataset,
    trees: &[DecisionTree],
    oob_index: &OobIndex,
    num_labels: u16,
    flags: TrainingFlags,
) -> (f32, f32) {
    let min_votes = min_oob_votes_required(trees.len());
    let observations: Vec<Observation> = dataset
        .samples
        .iter()
        .enumerate()
        .filter_map(|(i, sample): (usize, &Sample)| {
            let active = oob_index.trees_without(i as u32);
            if active.len() < min_votes {
                return None;
            }
            let result = compute_consensus(trees, &sample.features, num_labels, None, Some(&active));
            result.predicted_label.map(|p| Observation {
                predicted: p,
                actual: sample.label,
                consensus: result.consensus,
            })
        })
        .collect();
    sweep_threshold(&observations, num_labels, flags)
}

/// Collects one [`Observation`] per sample in `dataset` that produced an
/// in-range consensus prediction from `trees` (full forest, unweighted —
/// shared by hold-out scoring and per-fold k-fold evaluation).
fn collect_observations(dataset: &Dataset, trees: &[DecisionTree], num_labels: u16) -> Vec<Observation> {
    dataset
        .samples
        .iter()
        .filter_map(|sample| {
            let result = compute_consensus(trees, &sample.features, num_labels, None, None);
            result.predicted_label.map(|p| Observation {
                predicted: p,
                actual: sample.label,
                consensus: result.consensus,
            })
        })
        .collect()
}

/// Hold-out scoring (spec §4.10 "Hold-out"): same consensus sweep over a
/// reserved validation set, using the full forest for every sample.
pub fn holdout_score(validation: &Dataset, trees: &[DecisionTree], num_labels: u16, flags: TrainingFlags) -> (f32, f32) {
    let observations = collect_observations(validation, trees, num_labels);
    sweep_threshold(&observations, num_labels, flags)
}

/// K-fold scoring (spec §4.10 "K-fold"): partitions `train_indices` into
/// `k` contiguous folds after an RNG-driven shuffle, trains one forest per
/// fold holding that fold out, and pools every fold's held-out
/// observations before running a single consensus sweep over the combined
/// set (the original instead averages each fold's own score, but both
/// aggregate across folds before committing to a candidate's score rather
/// than reporting one fold's best).
pub fn kfold_score(
    dataset: &Dataset,
    train_indices: &[u32],
    params: &HyperParams,
    config: &ResolvedConfig,
    num_labels: u16,
    num_features: usize,
    base_rng: &DeterministicRng,
    k_folds: u16,
) -> (f32, f32) {
    let k = k_folds.max(2) as usize;
    let mut shuffled = train_indices.to_vec();
    let mut shuffle_rng = base_rng.derive(0xDEAD, 0);
    for i in (1..shuffled.len()).rev() {
        let j = shuffle_rng.bounded((i + 1) as u32) as usize;
        shuffled.swap(i, j);
    }

    let fold_size = (shuffled.len() + k - 1) / k.max(1);
    if fold_size == 0 {
        return (0.0, 0.0);
    }

    let mut pooled_observations: Vec<Observation> = Vec::new();
    for fold in 0..k {
        let start = fold * fold_size;
        if start >= shuffled.len() {
            break;
        }
        let end = (start + fold_size).min(shuffled.len());
        let held_out: Vec<u32> = shuffled[start..end].to_vec();
        let fold_train: Vec<u32> = shuffled[..start].iter().chain(shuffled[end..].iter()).copied().collect();
        if fold_train.is_empty() || held_out.is_empty() {
            continue;
        }

        let fold_rng = base_rng.derive(0xFEED, fold as u64);
        let mut seen_bag_hashes: ChainedSet<u64> = ChainedSet::new();
        let num_trees = config.config.num_trees as u64;
        let mut trees = Vec::with_capacity(num_trees as usize);
        for tree_idx in 0..num_trees {
            let bag_local = crate::forest::build::draw_bag(
                &fold_rng,
                tree_idx,
                fold_train.len(),
                config.config.use_bootstrap,
                config.config.bootstrap_ratio,
                &mut seen_bag_hashes,
            );
            let mut bag_global: Vec<u32> = bag_local.iter().map(|&local| fold_train[local as usize]).collect();
            let mut build_rng = fold_rng.derive(tree_idx, 1);
            let tree = build_tree(dataset, &mut bag_global, params, config, num_labels, num_features, &mut build_rng);
            trees.push(tree);
        }

        let held_out_dataset = Dataset {
            samples: held_out.iter().map(|&i| dataset.samples[i as usize].clone()).collect(),
            num_features: dataset.num_features,
            quantization_bits: dataset.quantization_bits,
            num_labels: dataset.num_labels,
        };
        pooled_observations.extend(collect_observations(&held_out_dataset, &trees, num_labels));
    }
    sweep_threshold(&pooled_observations, num_labels, config.training_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeNode;

    fn stump(threshold: u8, left_label: u8, right_label: u8) -> DecisionTree {
        let mut t = DecisionTree::new();
        t.push(TreeNode::internal(0, threshold, 1));
        t.push(TreeNode::leaf(left_label));
        t.push(TreeNode::leaf(right_label));
        t
    }

    #[test]
    fn oob_index_excludes_trees_that_drew_the_sample() {
        let bags = vec![vec![0, 1, 2], vec![3, 4, 5]];
        let idx = OobIndex::build(&bags);
        assert_eq!(idx.trees_without(0), vec![1]);
        assert_eq!(idx.trees_without(3), vec![0]);
    }

    #[test]
    fn consensus_picks_majority_weighted_label() {
        let trees = vec![stump(0, 0, 1), stump(0, 0, 1), stump(0, 1, 1)];
        let result = compute_consensus(&trees, &[5], 2, None, None);
        assert_eq!(result.predicted_label, Some(1));
        assert!((result.consensus - 1.0).abs() < 1e-6);
    }

    #[test]
    fn weighted_consensus_lets_a_high_score_tree_override_majority() {
        let trees = vec![stump(0, 0, 1), stump(0, 0, 1), stump(0, 1, 1)];
        let weights = [0.1, 0.1, 10.0];
        let result = compute_consensus(&trees, &[5], 2, Some(&weights), None);
        assert_eq!(result.predicted_label, Some(1));
    }

    #[test]
    fn metrics_are_one_on_perfect_predictions() {
        let obs = [(0u8, 0u8), (1, 1), (0, 0)];
        let m = compute_metrics(&obs, 2);
        assert!((m.accuracy - 1.0).abs() < 1e-6);
        assert!((m.f1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sweep_threshold_never_beaten_by_an_unswept_alternative() {
        let obs = vec![
            Observation { predicted: 0, actual: 0, consensus: 0.9 },
            Observation { predicted: 1, actual: 1, consensus: 0.8 },
            Observation { predicted: 0, actual: 1, consensus: 0.51 },
        ];
        let flags = TrainingFlags(TrainingFlags::ACCURACY);
        let (threshold, score) = sweep_threshold(&obs, 2, flags);
        for t in [0.0, 0.5, 0.6, 0.7, 0.81, 0.91] {
            let included: Vec<(u8, u8)> = obs.iter().filter(|o| o.consensus >= t).map(|o| (o.predicted, o.actual)).collect();
            if included.is_empty() {
                continue;
            }
            let alt_score = objective_score(&compute_metrics(&included, 2), flags);
            assert!(alt_score <= score + 1e-6, "threshold {t} scored {alt_score} > swept {score} at {threshold}");
        }
    }
}
