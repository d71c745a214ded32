//! Weight initialisation follows `training.seed`.
//!
//! Kept in its own test binary: the backend RNG is process-global.

use burn::backend::{Autodiff, NdArray};
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::tensor::Tensor;
use cxr_core::{BurnTrainer, BurnTrainerConfig, XrayClassifier, XrayClassifierConfig};
use cxr_training::{RunLayout, TrainingHyperParams};
use tempfile::TempDir;

type B = Autodiff<NdArray>;

fn initial_probs(seed: u64) -> Vec<f32> {
    let temp = TempDir::new().unwrap();
    let layout = RunLayout::new(temp.path().to_path_buf());
    let config = BurnTrainerConfig::new(
        XrayClassifierConfig::new(2).with_base_filters(4).with_hidden_units(8),
        TrainingHyperParams { seed, epochs: 1, learning_rate: 1e-3, patience: 1 },
        &layout,
    );
    let optimizer = AdamConfig::new().init::<B, XrayClassifier<B>>();
    let trainer = BurnTrainer::<B, _>::initialize(config, Default::default(), optimizer).unwrap();

    let device = Default::default();
    trainer
        .model()
        .unwrap()
        .valid()
        .forward_probs(Tensor::<NdArray, 4>::ones([1, 1, 16, 16], &device))
        .into_data()
        .to_vec::<f32>()
        .unwrap()
}

#[test]
fn test_seed_fixes_initial_weights() {
    let first = initial_probs(7);
    let second = initial_probs(7);
    let other = initial_probs(8);

    assert_eq!(first, second);
    assert_ne!(first, other);
}
