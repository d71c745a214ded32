//! Burn trainer on tiny fixtures: checkpoint monotonicity, resume and export.

mod common;

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, Optimizer};
use burn::tensor::Tensor;
use common::{factory, partition, vocabulary, write_png};
use cxr_core::training::CheckpointState;
use cxr_core::{BurnTrainer, BurnTrainerConfig, XrayClassifier, XrayClassifierConfig, load_exported};
use cxr_training::artifacts::{read_json, write_json};
use cxr_training::{
    ArtifactKind, GeneratorPair, IncrementalTrainer, RunLayout, TrainerStatus, TrainingError,
    TrainingHyperParams,
};
use std::path::Path;
use tempfile::TempDir;

type B = Autodiff<NdArray>;

const TRAIN: [(&str, &str); 6] = [
    ("t1.png", "Cardiomegaly"),
    ("t2.png", "Effusion"),
    ("t3.png", "No Finding"),
    ("t4.png", "Cardiomegaly|Effusion"),
    ("t5.png", "Cardiomegaly"),
    ("t6.png", "No Finding"),
];
const TEST: [(&str, &str); 3] = [("v1.png", "Effusion"), ("v2.png", "Cardiomegaly"), ("v3.png", "No Finding")];

fn write_fixtures(dir: &Path) {
    for (i, (name, _)) in TRAIN.iter().chain(TEST.iter()).enumerate() {
        write_png(dir, name, (i * 25) as u8);
    }
}

fn generators(dir: &Path) -> GeneratorPair {
    let rows = partition(&TRAIN, &TEST);
    factory().make_generators(&rows.train, &rows.test, dir, &vocabulary()).unwrap().unwrap()
}

fn trainer_config(layout: &RunLayout, num_classes: usize, epochs: usize) -> BurnTrainerConfig {
    BurnTrainerConfig::new(
        XrayClassifierConfig::new(num_classes).with_base_filters(4).with_hidden_units(8),
        TrainingHyperParams { seed: 7, epochs, learning_rate: 1e-3, patience: 2 },
        layout,
    )
}

/// Sigmoid outputs on an all-black image; identical weights give identical values.
fn zero_input_probs(model: &XrayClassifier<B>) -> Vec<f32> {
    let device = Default::default();
    model
        .valid()
        .forward_probs(Tensor::<NdArray, 4>::zeros([1, 1, 16, 16], &device))
        .into_data()
        .to_vec::<f32>()
        .unwrap()
}

fn new_trainer(
    config: BurnTrainerConfig,
) -> Result<BurnTrainer<B, impl Optimizer<XrayClassifier<B>, B> + Send + 'static>, TrainingError> {
    let optimizer = AdamConfig::new().init::<B, XrayClassifier<B>>();
    BurnTrainer::<B, _>::initialize(config, Default::default(), optimizer)
}

#[tokio::test]
async fn test_checkpoint_never_gets_worse() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    write_fixtures(&images);
    let layout = RunLayout::new(temp.path().to_path_buf());

    let mut trainer = new_trainer(trainer_config(&layout, 2, 3)).unwrap();
    assert!(trainer.best_val_loss().is_none());

    let first = trainer.fit_increment(generators(&images), 1).await.unwrap();
    assert!(!first.epochs.is_empty());
    assert!(first.epochs[0].checkpointed, "first epoch of a fresh run always checkpoints");
    assert!(first.epochs.iter().all(|e| e.val_loss.is_finite() && e.train_loss.is_finite()));
    let after_first: CheckpointState = read_json(&layout.checkpoint_state_path()).unwrap().unwrap();
    assert_eq!(Some(after_first.best_val_loss), trainer.best_val_loss());
    assert_eq!(after_first.num_classes, 2);

    let second = trainer.fit_increment(generators(&images), 2).await.unwrap();
    let after_second: CheckpointState = read_json(&layout.checkpoint_state_path()).unwrap().unwrap();
    assert!(after_second.best_val_loss <= after_first.best_val_loss);

    let mut best = after_first.best_val_loss;
    for epoch in &second.epochs {
        assert_eq!(epoch.checkpointed, epoch.val_loss < best);
        if epoch.checkpointed {
            best = epoch.val_loss;
        }
    }
    assert_eq!(best, after_second.best_val_loss);
    assert_eq!(trainer.status(), TrainerStatus::Idle);
    assert!(layout.checkpoint_stem().with_extension("bin").exists());
}

#[tokio::test]
async fn test_restart_resumes_from_checkpoint() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    write_fixtures(&images);
    let layout = RunLayout::new(temp.path().to_path_buf());

    let mut first = new_trainer(trainer_config(&layout, 2, 1)).unwrap();
    first.fit_increment(generators(&images), 1).await.unwrap();
    let saved = first.best_val_loss();
    drop(first);

    let resumed = new_trainer(trainer_config(&layout, 2, 1)).unwrap();
    assert!(saved.is_some());
    assert_eq!(resumed.best_val_loss(), saved);

    let mismatched = new_trainer(trainer_config(&layout, 5, 1));
    assert!(matches!(mismatched, Err(TrainingError::Checkpoint(_))));
}

#[tokio::test]
async fn test_mismatched_generators_are_rejected_without_losing_weights() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    write_fixtures(&images);
    let layout = RunLayout::new(temp.path().to_path_buf());

    let mut trainer = new_trainer(trainer_config(&layout, 3, 1)).unwrap();
    let err = trainer.fit_increment(generators(&images), 1).await.unwrap_err();
    assert!(matches!(err, TrainingError::Dataset(_)));
    assert!(trainer.model().is_some());
}

#[tokio::test]
async fn test_export_roundtrips_through_load_exported() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    write_fixtures(&images);
    let layout = RunLayout::new(temp.path().to_path_buf());

    let mut trainer = new_trainer(trainer_config(&layout, 2, 1)).unwrap();
    trainer.fit_increment(generators(&images), 1).await.unwrap();

    let artifacts = trainer.export(layout.export_stem()).await.unwrap();
    assert_eq!(trainer.status(), TrainerStatus::Exported);
    let kinds: Vec<_> = artifacts.iter().map(|a| a.kind.clone()).collect();
    assert_eq!(kinds, vec![ArtifactKind::Weights, ArtifactKind::Architecture]);
    assert!(artifacts.iter().all(|a| a.path.exists() && a.sha256.len() == 64));

    let device = Default::default();
    let model = load_exported::<NdArray>(layout.export_stem(), &device).unwrap();
    let probs = model.forward_probs(Tensor::<NdArray, 4>::zeros([3, 1, 16, 16], &device));
    assert_eq!(probs.dims(), [3, 2]);
}

#[tokio::test]
async fn test_resume_keeps_increment_that_did_not_checkpoint() {
    let temp = TempDir::new().unwrap();
    let images = temp.path().join("images");
    write_fixtures(&images);
    let layout = RunLayout::new(temp.path().to_path_buf());

    let mut first = new_trainer(trainer_config(&layout, 2, 1)).unwrap();
    first.fit_increment(generators(&images), 1).await.unwrap();
    drop(first);

    // no real loss reaches zero, so the next increment cannot checkpoint
    let mut state: CheckpointState = read_json(&layout.checkpoint_state_path()).unwrap().unwrap();
    state.best_val_loss = 0.0;
    write_json(&layout.checkpoint_state_path(), &state).unwrap();
    let best_record = layout.checkpoint_stem().with_extension("bin");
    let best_bytes = std::fs::read(&best_record).unwrap();

    let mut second = new_trainer(trainer_config(&layout, 2, 1)).unwrap();
    let history = second.fit_increment(generators(&images), 2).await.unwrap();
    assert!(history.epochs.iter().all(|e| !e.checkpointed));
    assert_eq!(std::fs::read(&best_record).unwrap(), best_bytes);
    let after_second = zero_input_probs(second.model().unwrap());
    drop(second);

    let resumed = new_trainer(trainer_config(&layout, 2, 1).with_resume(true)).unwrap();
    assert_eq!(resumed.resumed_batch(), Some(2));
    assert_eq!(resumed.best_val_loss(), Some(0.0));
    assert_eq!(zero_input_probs(resumed.model().unwrap()), after_second);

    let restarted = new_trainer(trainer_config(&layout, 2, 1)).unwrap();
    assert_eq!(restarted.resumed_batch(), None);
}
