//! Shared fixtures for cxr-core integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use cxr_core::generator::{AugmentationConfig, GeneratorSettings};
use cxr_core::{DatasetPartition, GeneratorFactory, LabelVocabulary, MetadataRecord};
use cxr_training::artifacts::make_artifact;
use cxr_training::{
    ArtifactKind, EpochMetrics, FitHistory, GeneratorPair, IncrementalTrainer, TrainerStatus,
    TrainingArtifact, TrainingError, TrainingResult,
};
use flate2::Compression;
use flate2::write::GzEncoder;
use image::{GrayImage, ImageFormat, Luma};
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// PNG bytes of a flat 16x16 grayscale image.
pub fn png_bytes(shade: u8) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    GrayImage::from_pixel(16, 16, Luma([shade])).write_to(&mut cursor, ImageFormat::Png).unwrap();
    cursor.into_inner()
}

/// Writes a flat 16x16 PNG to `dir/name`.
pub fn write_png(dir: &Path, name: &str, shade: u8) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, png_bytes(shade)).unwrap();
    path
}

/// A `.tar.gz` holding one PNG per name under `images/`, as the NIH archives do.
pub fn png_archive(names: &[&str]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    for (i, name) in names.iter().enumerate() {
        let data = png_bytes((i * 40 % 255) as u8);
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, format!("images/{name}"), data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn record(name: &str, labels: &str) -> MetadataRecord {
    MetadataRecord::new(name, labels, "No Finding")
}

pub fn vocabulary() -> LabelVocabulary {
    LabelVocabulary::new(vec![String::new(), "Cardiomegaly".to_string(), "Effusion".to_string()]).unwrap()
}

/// Encoded partition; `train` and `test` list `(image, labels)` rows.
pub fn partition(train: &[(&str, &str)], test: &[(&str, &str)]) -> DatasetPartition {
    let vocab = vocabulary();
    let mut train: Vec<_> = train.iter().map(|(n, l)| record(n, l)).collect();
    let mut test: Vec<_> = test.iter().map(|(n, l)| record(n, l)).collect();
    vocab.encode_records(&mut train);
    vocab.encode_records(&mut test);
    DatasetPartition { train, test }
}

pub fn settings() -> GeneratorSettings {
    GeneratorSettings {
        width: 16,
        height: 16,
        batch_size: 4,
        rescale: Some(1.0 / 255.0),
        augmentation: AugmentationConfig::disabled(),
        augment_validation: false,
        seed: 7,
    }
}

pub fn factory() -> GeneratorFactory {
    GeneratorFactory::new(settings())
}

/// What a scripted fit observed.
#[derive(Debug, Clone, PartialEq)]
pub struct FitCall {
    pub ordinal: usize,
    pub train_samples: usize,
    pub valid_samples: usize,
    pub num_classes: usize,
    /// The extraction directory still existed while fitting.
    pub image_dir_present: bool,
}

/// In-memory trainer that records every call and fails on request.
#[derive(Debug, Default)]
pub struct ScriptedTrainer {
    pub calls: Vec<FitCall>,
    pub exports: Vec<PathBuf>,
    pub fail_on: Option<usize>,
    status: Option<TrainerStatus>,
}

impl ScriptedTrainer {
    pub fn failing_on(ordinal: usize) -> Self {
        Self { fail_on: Some(ordinal), ..Self::default() }
    }

    pub fn ordinals(&self) -> Vec<usize> {
        self.calls.iter().map(|c| c.ordinal).collect()
    }
}

#[async_trait]
impl IncrementalTrainer for ScriptedTrainer {
    fn id(&self) -> &'static str {
        "scripted"
    }

    async fn fit_increment(&mut self, mut generators: GeneratorPair, batch_ordinal: usize) -> TrainingResult<FitHistory> {
        // Decoding one batch proves the images were still on disk.
        let batch = generators.train.next_batch()?;
        batch.validate()?;

        self.calls.push(FitCall {
            ordinal: batch_ordinal,
            train_samples: generators.train.sample_count(),
            valid_samples: generators.valid.sample_count(),
            num_classes: generators.num_classes(),
            image_dir_present: generators.image_dir().is_some_and(Path::exists),
        });

        if self.fail_on == Some(batch_ordinal) {
            self.status = Some(TrainerStatus::Failed("scripted".to_string()));
            return Err(TrainingError::Trainer(format!("scripted failure on batch {batch_ordinal}")));
        }

        let mut history = FitHistory::new(batch_ordinal);
        history.epochs.push(EpochMetrics {
            epoch: 1,
            train_loss: 0.7,
            train_accuracy: 0.5,
            val_loss: 1.0 / batch_ordinal as f64,
            val_accuracy: 0.5,
            improved: true,
            checkpointed: true,
        });
        self.status = Some(TrainerStatus::Idle);
        Ok(history)
    }

    async fn export(&mut self, stem: &Path) -> TrainingResult<Vec<TrainingArtifact>> {
        if let Some(parent) = stem.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let weights = stem.with_extension("bin");
        std::fs::write(&weights, b"weights")?;
        self.exports.push(stem.to_path_buf());
        self.status = Some(TrainerStatus::Exported);
        Ok(vec![make_artifact(ArtifactKind::Weights, weights)?])
    }

    fn status(&self) -> TrainerStatus {
        self.status.clone().unwrap_or(TrainerStatus::Idle)
    }
}

/// Files left in `dir`, recursively; an absent directory counts as empty.
pub fn leftover_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect()
}
