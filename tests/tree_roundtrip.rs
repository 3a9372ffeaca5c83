//! Cross-module tree persistence: a `DecisionTree` produced by
//! `forest::build` (not hand-assembled) round-trips through bytes, and a
//! `TrainedForest` persists alongside its augmented config JSON the way the
//! CLI (`src/bin/train.rs`) does (spec §6).

use edgeforest::config::Config;
use edgeforest::dataset::{Dataset, Sample};
use edgeforest::forest::build::{build_tree, HyperParams};
use edgeforest::forest::{TrainedConfig, TrainedForest};
use edgeforest::rng::DeterministicRng;
use edgeforest::tree::DecisionTree;

fn xor_dataset(n_per_class: usize) -> Dataset {
    let mut samples = Vec::new();
    for a in 0..2u8 {
        for b in 0..2u8 {
            let label = a ^ b;
            for _ in 0..n_per_class {
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

#[test]
fn a_trained_tree_round_trips_and_keeps_predicting_the_same_labels() {
    let dataset = xor_dataset(50);
    let config = Config::default().reconcile(2, &[200, 200], Some(2)).unwrap();
    let params = HyperParams {
        min_split: 2,
        min_leaf: 1,
        max_depth: 8,
    };
    let mut indices: Vec<u32> = (0..dataset.samples.len() as u32).collect();
    let mut rng = DeterministicRng::new(11).derive(0, 0);
    let tree = build_tree(&dataset, &mut indices, &params, &config, 2, 2, &mut rng);

    let bytes = tree.to_bytes();
    let loaded = DecisionTree::from_bytes(&bytes).unwrap();

    for a in 0..2u8 {
        for b in 0..2u8 {
            assert_eq!(tree.predict(&[a, b]), loaded.predict(&[a, b]));
        }
    }
}

#[test]
fn trained_forest_and_config_persist_to_the_layout_the_cli_expects() {
    let dir = std::env::temp_dir().join(format!("edgeforest-tree-roundtrip-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let forest_path = dir.join("forest.bin");
    let config_path = dir.join("config.json");

    let dataset = xor_dataset(40);
    let mut config = Config::default();
    config.num_trees = 4;
    let resolved = config.reconcile(2, &[160, 160], Some(2)).unwrap();
    let trainer = edgeforest::ForestTrainer::new(dataset, resolved);
    let forest = trainer
        .train(edgeforest::forest::grid_search::GridSearchConfig { repeats: 1 })
        .expect("xor data should always train a viable forest");

    edgeforest::forest::ForestTrainer::save_forest(&forest, &forest_path).unwrap();
    edgeforest::forest::ForestTrainer::save_config(&config, forest.score, &config_path).unwrap();

    let loaded_forest = edgeforest::forest::load_forest_from_path(&forest_path).unwrap();
    assert_eq!(loaded_forest.trees.len(), forest.trees.len());
    assert!((loaded_forest.consensus_threshold - forest.consensus_threshold).abs() < 1e-6);

    let persisted_json = std::fs::read_to_string(&config_path).unwrap();
    let trained: TrainedConfig = serde_json::from_str(&persisted_json).unwrap();
    assert!((trained.result_score - forest.score).abs() < 1e-6);
    assert_eq!(trained.config.num_trees, 4);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn forest_predict_matches_consensus_across_all_persisted_trees() {
    let dataset = xor_dataset(30);
    let mut config = Config::default();
    config.num_trees = 9;
    let resolved = config.reconcile(2, &[120, 120], Some(2)).unwrap();
    let trainer = edgeforest::ForestTrainer::new(dataset, resolved);
    let forest: TrainedForest = trainer
        .train(edgeforest::forest::grid_search::GridSearchConfig { repeats: 1 })
        .unwrap();

    let mut bytes = Vec::new();
    forest.save(&mut bytes).unwrap();
    let loaded = TrainedForest::load(bytes.as_slice()).unwrap();

    for a in 0..2u8 {
        for b in 0..2u8 {
            let before = forest.predict(&[a, b]).predicted_label;
            let after = loaded.predict(&[a, b]).predicted_label;
            assert_eq!(before, after);
        }
    }
}
