//! Forest trainer CLI (spec §6). Loads a dataset and a JSON config, runs
//! the hyperparameter grid search, and persists the winning forest plus
//! its augmented config JSON next to the input data.

use clap::Parser;
use edgeforest::config::Config;
use edgeforest::dataset::Dataset;
use edgeforest::forest::grid_search::GridSearchConfig;
use edgeforest::forest::{load_forest_from_path, ForestTrainer};
use edgeforest::logging;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Random Forest trainer with incremental drift adaptation (spec §6 CLI).
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Skip training and only validate an existing persisted forest at
    /// `--data`'s sibling `forest.bin`.
    #[arg(long = "skip_training")]
    skip_training: bool,

    /// Cap the number of training samples loaded from `--data` (0 = no
    /// cap).
    #[arg(long = "max-samples", default_value_t = 0)]
    max_samples: usize,

    /// Path to the training dataset CSV (spec §6: `label, feat_0, ...`).
    #[arg(long = "data")]
    data: PathBuf,
}

fn run(args: Args) -> Result<(), edgeforest::ForestError> {
    logging::ensure_init();

    let config_path = args.data.with_file_name("config.json");
    let config = match std::fs::read_to_string(&config_path) {
        Ok(text) => Config::from_json(&text)?,
        Err(_) => {
            info!(path = %config_path.display(), "no config file found, using defaults");
            Config::default()
        }
    };

    if args.skip_training {
        let forest_path = args.data.with_file_name("forest.bin");
        let forest = load_forest_from_path(&forest_path)?;
        info!(trees = forest.trees.len(), threshold = forest.consensus_threshold, "loaded persisted forest");
        return Ok(());
    }

    let mut dataset = Dataset::load_from_path(&args.data)?;
    if args.max_samples > 0 && dataset.samples.len() > args.max_samples {
        dataset.samples.truncate(args.max_samples);
    }
    info!(samples = dataset.len(), features = dataset.num_features, "dataset loaded");

    let num_labels = dataset
        .num_labels
        .unwrap_or_else(|| dataset.samples.iter().map(|s| s.label as u16).max().unwrap_or(0) + 1);
    let class_counts = {
        let mut counts = vec![0usize; num_labels as usize];
        for sample in &dataset.samples {
            if (sample.label as usize) < counts.len() {
                counts[sample.label as usize] += 1;
            }
        }
        counts
    };
    let quantization_bits = dataset.quantization_bits.or(config.quantization_coefficient);
    let resolved = config.reconcile(num_labels, &class_counts, quantization_bits)?;

    let trainer = ForestTrainer::new(dataset, resolved);
    let Some(forest) = trainer.train(GridSearchConfig::default()) else {
        error!("grid search produced no viable candidate");
        return Err(edgeforest::error::ResourceError::TreeNodeBudgetExceeded.into());
    };

    let forest_path = args.data.with_file_name("forest.bin");
    ForestTrainer::save_forest(&forest, &forest_path).map_err(|source| {
        edgeforest::error::ConfigError::Io {
            path: forest_path.display().to_string(),
            source,
        }
    })?;
    ForestTrainer::save_config(&config, forest.score, &config_path)?;

    info!(
        trees = forest.trees.len(),
        score = forest.score,
        path = %forest_path.display(),
        "forest persisted"
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(1)
        }
    }
}
