//! Config — the JSON-driven trainer configuration (spec §6). Per spec §1,
//! the JSON parser's own contract is simply "produce a Config struct"; this
//! module *is* that struct plus the reconciliation rules spec §6 and §9
//! describe (split-ratio normalization, `unity_threshold` auto-computation,
//! `training_flag` class-imbalance auto-detection).

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Per-hyperparameter tri-state: use the built-in default, pin to a fixed
/// value, or fold a range into the grid-search cartesian product (spec §6,
/// §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldStatus {
    Disabled,
    EnabledOverwrite,
    EnabledStacked,
}

impl Default for FieldStatus {
    fn default() -> Self {
        FieldStatus::Disabled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperparamField {
    pub status: FieldStatus,
    pub value: u32,
    pub range: Option<(u32, u32)>,
}

impl Default for HyperparamField {
    fn default() -> Self {
        Self {
            status: FieldStatus::Disabled,
            value: 0,
            range: None,
        }
    }
}

impl HyperparamField {
    /// Candidate values this field contributes to the grid-search
    /// cartesian product: the trainer default when `disabled`, a single
    /// pinned value when `enabled-overwrite`, or every value in `range`
    /// (inclusive) when `enabled-stacked`.
    pub fn candidates(&self, default: u32) -> Vec<u32> {
        match self.status {
            FieldStatus::Disabled => vec![default],
            FieldStatus::EnabledOverwrite => vec![self.value],
            FieldStatus::EnabledStacked => match self.range {
                Some((lo, hi)) if lo <= hi => (lo..=hi).collect(),
                Some((lo, hi)) => vec![lo.min(hi)],
                None => vec![self.value],
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Gini,
    Entropy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingScore {
    OobScore,
    ValidScore,
    KFoldScore,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SplitRatio {
    pub train_ratio: f32,
    pub test_ratio: f32,
    pub valid_ratio: f32,
}

impl Default for SplitRatio {
    fn default() -> Self {
        Self {
            train_ratio: 0.7,
            test_ratio: 0.3,
            valid_ratio: 0.0,
        }
    }
}

impl SplitRatio {
    /// Normalizes so the three ratios sum to 1 (spec §6: "if sum != 1,
    /// normalise").
    pub fn normalized(&self) -> Self {
        let sum = self.train_ratio + self.test_ratio + self.valid_ratio;
        if sum <= 0.0 {
            return Self::default();
        }
        Self {
            train_ratio: self.train_ratio / sum,
            test_ratio: self.test_ratio / sum,
            valid_ratio: self.valid_ratio / sum,
        }
    }
}

/// `training_flag` bitmask of selected scoring objectives (spec §6). Kept
/// as a hand-rolled newtype over `u8` rather than pulling in a bitflags
/// crate the corpus never reaches for at this scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingFlags(pub u8);

impl TrainingFlags {
    pub const ACCURACY: u8 = 1;
    pub const PRECISION: u8 = 2;
    pub const RECALL: u8 = 4;
    pub const F1: u8 = 8;

    pub fn contains(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn with(&self, bit: u8) -> Self {
        TrainingFlags(self.0 | bit)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TrainingFlags {
    fn default() -> Self {
        TrainingFlags(Self::ACCURACY)
    }
}

/// Which `training_flag` status controls class-imbalance auto-detection:
/// `stacked` ORs the user bits with auto-detected bits; anything else
/// leaves the user's bits untouched (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrainingFlagMode {
    Disabled,
    EnabledOverwrite,
    EnabledStacked,
}

impl Default for TrainingFlagMode {
    fn default() -> Self {
        TrainingFlagMode::Disabled
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_trees: u16,
    pub random_seed: u32,
    pub min_split: HyperparamField,
    pub min_leaf: HyperparamField,
    pub max_depth: HyperparamField,
    pub use_bootstrap: bool,
    pub bootstrap_ratio: f32,
    /// `use_gini` and `criterion` both select the impurity function;
    /// `criterion` wins if present (spec §6: "use_gini (bool) or criterion
    /// in {gini, entropy}").
    pub use_gini: bool,
    pub criterion: Option<Criterion>,
    pub training_score: TrainingScore,
    pub k_folds: u16,
    pub split_ratio: SplitRatio,
    pub impurity_threshold: f32,
    /// Auto-computed as `1.25 / num_labels` when not overridden (spec §6);
    /// `None` here means "not overridden".
    pub unity_threshold: Option<f32>,
    pub training_flag: TrainingFlags,
    pub training_flag_mode: TrainingFlagMode,
    pub quantization_coefficient: Option<u8>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_trees: 20,
            random_seed: 42,
            min_split: HyperparamField::default(),
            min_leaf: HyperparamField::default(),
            max_depth: HyperparamField::default(),
            use_bootstrap: true,
            bootstrap_ratio: 0.632,
            use_gini: true,
            criterion: None,
            training_score: TrainingScore::OobScore,
            k_folds: 4,
            split_ratio: SplitRatio::default(),
            impurity_threshold: 0.01,
            unity_threshold: None,
            training_flag: TrainingFlags::default(),
            training_flag_mode: TrainingFlagMode::default(),
            quantization_coefficient: None,
        }
    }
}

/// Config after the reconciliation rules of spec §6/§9 have been applied
/// against a concrete dataset (needed for `num_labels`-dependent defaults).
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    pub split_ratio: SplitRatio,
    pub unity_threshold: f32,
    pub training_flag: TrainingFlags,
    pub quantization_bits: u8,
    pub use_gini: bool,
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn effective_criterion_is_gini(&self) -> bool {
        match self.criterion {
            Some(Criterion::Gini) => true,
            Some(Criterion::Entropy) => false,
            None => self.use_gini,
        }
    }

    /// Auto-detects class-imbalance bits from the ratio of the most to
    /// least frequent class (thresholds 1.5x adds PRECISION, 3x adds
    /// RECALL, 10x adds F1 — recovered from
    /// `examples/original_source/tools/drift_benchmark/src/random_forest_pc.cpp`,
    /// see SPEC_FULL.md §C.3).
    fn auto_detect_training_flags(class_counts: &[usize]) -> TrainingFlags {
        let max = class_counts.iter().copied().max().unwrap_or(1).max(1);
        let min = class_counts.iter().copied().filter(|&c| c > 0).min().unwrap_or(1).max(1);
        let ratio = max as f32 / min as f32;
        let mut flags = TrainingFlags(0);
        if ratio >= 1.5 {
            flags = flags.with(TrainingFlags::PRECISION);
        }
        if ratio >= 3.0 {
            flags = flags.with(TrainingFlags::RECALL);
        }
        if ratio >= 10.0 {
            flags = flags.with(TrainingFlags::F1);
        }
        flags
    }

    /// Reconciles split ratios, `unity_threshold`, `training_flag`, and the
    /// quantization bit-width against a dataset's metadata and class
    /// distribution (spec §6, §9).
    pub fn reconcile(&self, num_labels: u16, class_counts: &[usize], dataset_quant_bits: Option<u8>) -> Result<ResolvedConfig, ConfigError> {
        let normalized = self.split_ratio.normalized();
        let split_ratio = match self.training_score {
            TrainingScore::ValidScore if normalized.valid_ratio <= 0.0 => {
                // spec §6: "valid_score requires valid_ratio > 0 ... on
                // mismatch, choose dataset-size-based defaults".
                SplitRatio {
                    train_ratio: 0.6,
                    test_ratio: 0.2,
                    valid_ratio: 0.2,
                }
            }
            TrainingScore::OobScore | TrainingScore::KFoldScore if normalized.valid_ratio > 0.0 => SplitRatio {
                train_ratio: normalized.train_ratio + normalized.valid_ratio,
                test_ratio: normalized.test_ratio,
                valid_ratio: 0.0,
            },
            _ => normalized,
        };

        let unity_threshold = self.unity_threshold.unwrap_or_else(|| 1.25 / num_labels.max(1) as f32);

        let auto_flags = Self::auto_detect_training_flags(class_counts);
        let training_flag = match self.training_flag_mode {
            TrainingFlagMode::EnabledStacked => self.training_flag.with(auto_flags.0),
            TrainingFlagMode::EnabledOverwrite => self.training_flag,
            TrainingFlagMode::Disabled => self.training_flag,
        };

        let quantization_bits = match dataset_quant_bits.or(self.quantization_coefficient) {
            Some(b) => crate::dataset::validate_quantization_bits(b)?,
            None => return Err(ConfigError::MissingQuantizationBitWidth),
        };

        Ok(ResolvedConfig {
            config: self.clone(),
            split_ratio,
            unity_threshold,
            training_flag,
            quantization_bits,
            use_gini: self.effective_criterion_is_gini(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.num_trees, 20);
        assert_eq!(c.random_seed, 42);
        assert!((c.bootstrap_ratio - 0.632).abs() < 1e-6);
        assert!((c.impurity_threshold - 0.01).abs() < 1e-6);
    }

    #[test]
    fn hyperparam_field_candidates() {
        let disabled = HyperparamField::default();
        assert_eq!(disabled.candidates(5), vec![5]);

        let overwrite = HyperparamField {
            status: FieldStatus::EnabledOverwrite,
            value: 9,
            range: None,
        };
        assert_eq!(overwrite.candidates(5), vec![9]);

        let stacked = HyperparamField {
            status: FieldStatus::EnabledStacked,
            value: 0,
            range: Some((2, 5)),
        };
        assert_eq!(stacked.candidates(5), vec![2, 3, 4, 5]);
    }

    #[test]
    fn split_ratio_normalizes_to_one() {
        let r = SplitRatio {
            train_ratio: 1.0,
            test_ratio: 1.0,
            valid_ratio: 0.0,
        }
        .normalized();
        assert!((r.train_ratio + r.test_ratio + r.valid_ratio - 1.0).abs() < 1e-6);
        assert!((r.train_ratio - 0.5).abs() < 1e-6);
    }

    #[test]
    fn unity_threshold_auto_computes_from_num_labels() {
        let c = Config::default();
        let resolved = c.reconcile(4, &[10, 10, 10, 10], Some(2)).unwrap();
        assert!((resolved.unity_threshold - 1.25 / 4.0).abs() < 1e-6);
    }

    #[test]
    fn valid_score_with_zero_valid_ratio_gets_dataset_size_defaults() {
        let mut c = Config::default();
        c.training_score = TrainingScore::ValidScore;
        let resolved = c.reconcile(2, &[5, 5], Some(2)).unwrap();
        assert!(resolved.split_ratio.valid_ratio > 0.0);
    }

    #[test]
    fn oob_score_folds_stray_valid_ratio_into_train() {
        let mut c = Config::default();
        c.split_ratio.valid_ratio = 0.1;
        c.split_ratio.train_ratio = 0.6;
        c.split_ratio.test_ratio = 0.3;
        let resolved = c.reconcile(2, &[5, 5], Some(2)).unwrap();
        assert_eq!(resolved.split_ratio.valid_ratio, 0.0);
    }

    #[test]
    fn missing_quantization_bits_is_a_config_error() {
        let c = Config::default();
        assert!(matches!(
            c.reconcile(2, &[5, 5], None),
            Err(ConfigError::MissingQuantizationBitWidth)
        ));
    }

    #[test]
    fn class_imbalance_auto_detection_thresholds() {
        assert!(Config::auto_detect_training_flags(&[100, 100]).is_empty());
        assert!(Config::auto_detect_training_flags(&[150, 100]).contains(TrainingFlags::PRECISION));
        assert!(Config::auto_detect_training_flags(&[300, 100]).contains(TrainingFlags::RECALL));
        assert!(Config::auto_detect_training_flags(&[1000, 100]).contains(TrainingFlags::F1));
    }

    #[test]
    fn stacked_training_flag_mode_ors_with_user_bits() {
        let mut c = Config::default();
        c.training_flag = TrainingFlags(TrainingFlags::ACCURACY);
        c.training_flag_mode = TrainingFlagMode::EnabledStacked;
        let resolved = c.reconcile(2, &[300, 100], Some(2)).unwrap();
        assert!(resolved.training_flag.contains(TrainingFlags::ACCURACY));
        assert!(resolved.training_flag.contains(TrainingFlags::RECALL));
    }

    #[test]
    fn json_round_trip() {
        let c = Config::default();
        let json = c.to_json().unwrap();
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.num_trees, c.num_trees);
    }
}
