//! Multi-label chest X-ray classifier.
//!
//! Architecture:
//! - 3 convolutional blocks (3x3 conv, ReLU, 2x2 max-pool), doubling filters each block
//! - Global average pooling
//! - Dropout, dense + ReLU, dropout
//! - Dense output with one logit per label (sigmoid for probabilities)

use burn::{
    config::Config,
    module::Module,
    nn::{
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    },
    record::{BinFileRecorder, FileRecorder, FullPrecisionSettings},
    tensor::{Tensor, activation::sigmoid, backend::Backend},
};
use cxr_training::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};

/// Recorder used for checkpoints and exports.
pub type WeightRecorder = BinFileRecorder<FullPrecisionSettings>;

/// Path of the weight record written for `stem`.
pub fn record_path<B: Backend>(stem: &Path) -> PathBuf {
    stem.with_extension(<WeightRecorder as FileRecorder<B>>::file_extension())
}

/// Path of the architecture description written next to an export.
pub fn architecture_path(stem: &Path) -> PathBuf {
    stem.with_extension("json")
}

#[derive(Config, Debug)]
pub struct XrayClassifierConfig {
    /// One output per feature label.
    pub num_classes: usize,

    #[config(default = "1")]
    pub in_channels: usize,

    #[config(default = "16")]
    pub base_filters: usize,

    #[config(default = "140")]
    pub hidden_units: usize,

    #[config(default = "0.3")]
    pub dropout: f64,
}

impl XrayClassifierConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> XrayClassifier<B> {
        let base = self.base_filters;
        XrayClassifier {
            block1: ConvBlock::new(self.in_channels, base, device),
            block2: ConvBlock::new(base, base * 2, device),
            block3: ConvBlock::new(base * 2, base * 4, device),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(self.dropout).init(),
            fc1: LinearConfig::new(base * 4, self.hidden_units).init(device),
            activation: Relu::new(),
            fc2: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    activation: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            activation: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.activation.forward(x);
        self.pool.forward(x)
    }
}

#[derive(Module, Debug)]
pub struct XrayClassifier<B: Backend> {
    block1: ConvBlock<B>,
    block2: ConvBlock<B>,
    block3: ConvBlock<B>,
    global_pool: AdaptiveAvgPool2d,
    dropout: Dropout,
    fc1: Linear<B>,
    activation: Relu,
    fc2: Linear<B>,
}

impl<B: Backend> XrayClassifier<B> {
    /// `[batch, channels, height, width]` → `[batch, num_classes]` logits.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.block1.forward(images);
        let x = self.block2.forward(x);
        let x = self.block3.forward(x);

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.dropout.forward(x);
        let x = self.fc1.forward(x);
        let x = self.activation.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Independent per-label probabilities.
    pub fn forward_probs(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward(images))
    }
}

/// Rebuilds an exported model from `<stem>.json` and its weight record.
pub fn load_exported<B: Backend>(stem: &Path, device: &B::Device) -> TrainingResult<XrayClassifier<B>> {
    let config = XrayClassifierConfig::load(architecture_path(stem)).map_err(|e| {
        TrainingError::Artifact(format!("failed to read {}: {e}", architecture_path(stem).display()))
    })?;
    config
        .init::<B>(device)
        .load_file(stem.to_path_buf(), &WeightRecorder::new(), device)
        .map_err(|e| TrainingError::Artifact(format!("failed to load weights for {}: {e:?}", stem.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type TestBackend = NdArray;

    #[test]
    fn test_forward_shape() {
        let device = Default::default();
        let model = XrayClassifierConfig::new(3).with_base_filters(4).with_hidden_units(8).init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 1, 16, 16], &device);
        assert_eq!(model.forward(images).dims(), [2, 3]);
    }

    #[test]
    fn test_probabilities_in_unit_interval() {
        let device = Default::default();
        let model = XrayClassifierConfig::new(2).with_base_filters(4).with_hidden_units(8).init::<TestBackend>(&device);

        let pixels: Vec<f32> = (0..256).map(|i| i as f32 / 255.0).collect();
        let images = Tensor::<TestBackend, 4>::from_data(TensorData::new(pixels, [1, 1, 16, 16]), &device);
        let probs: Vec<f32> = model.forward_probs(images).into_data().to_vec().unwrap();

        assert_eq!(probs.len(), 2);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_record_and_architecture_paths() {
        let stem = Path::new("/tmp/artifacts/final_model");
        assert_eq!(record_path::<TestBackend>(stem), PathBuf::from("/tmp/artifacts/final_model.bin"));
        assert_eq!(architecture_path(stem), PathBuf::from("/tmp/artifacts/final_model.json"));
    }
}
