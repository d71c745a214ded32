use crate::error::{TrainingError, TrainingResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One mini-batch of single-channel images and their multi-hot label vectors.
///
/// `images` is laid out `[len, channels, height, width]` and `labels` `[len, num_classes]`,
/// both row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    pub images: Vec<f32>,
    pub labels: Vec<f32>,
    pub len: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub num_classes: usize,
}

impl ImageBatch {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.len == 0 {
            return Err(TrainingError::Dataset("batch is empty".to_string()));
        }
        let pixels = self.len * self.channels * self.height * self.width;
        if self.images.len() != pixels {
            return Err(TrainingError::Dataset(format!(
                "image buffer holds {} values, expected {pixels}",
                self.images.len()
            )));
        }
        if self.labels.len() != self.len * self.num_classes {
            return Err(TrainingError::Dataset(format!(
                "label buffer holds {} values, expected {}",
                self.labels.len(),
                self.len * self.num_classes
            )));
        }
        Ok(())
    }

    /// Label row for sample `index`.
    #[must_use]
    pub fn label_row(&self, index: usize) -> &[f32] {
        &self.labels[index * self.num_classes..(index + 1) * self.num_classes]
    }
}

/// An infinite, restartable stream of mini-batches.
pub trait BatchSource: Send {
    /// Produces the next batch, wrapping around to the start when the samples are exhausted.
    fn next_batch(&mut self) -> TrainingResult<ImageBatch>;

    /// Number of batches that cover every sample once.
    fn steps_per_epoch(&self) -> usize;

    /// Number of distinct samples behind the stream.
    fn sample_count(&self) -> usize;

    fn num_classes(&self) -> usize;
}

/// Shared claim on a batch's extraction directory.
///
/// The directory owner keeps one handle; every `GeneratorPair` built from the
/// directory holds a clone until it is dropped.
#[derive(Debug, Clone)]
pub struct DirLease(Arc<PathBuf>);

impl DirLease {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self(Arc::new(path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Number of live handles, including the owner's.
    #[must_use]
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// Train and validation streams for one batch, tied to the images on disk.
///
/// Consumed by value by the trainer so it cannot be reused once the batch ends.
pub struct GeneratorPair {
    pub train: Box<dyn BatchSource>,
    pub valid: Box<dyn BatchSource>,
    lease: Option<DirLease>,
}

impl GeneratorPair {
    pub fn new(
        train: Box<dyn BatchSource>,
        valid: Box<dyn BatchSource>,
        lease: Option<DirLease>,
    ) -> TrainingResult<Self> {
        if train.num_classes() != valid.num_classes() {
            return Err(TrainingError::Dataset(format!(
                "train stream has {} classes but validation stream has {}",
                train.num_classes(),
                valid.num_classes()
            )));
        }
        Ok(Self { train, valid, lease })
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.train.num_classes()
    }

    /// Directory backing the streams, if any.
    #[must_use]
    pub fn image_dir(&self) -> Option<&Path> {
        self.lease.as_ref().map(DirLease::path)
    }
}

impl std::fmt::Debug for GeneratorPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorPair")
            .field("train_samples", &self.train.sample_count())
            .field("valid_samples", &self.valid.sample_count())
            .field("num_classes", &self.num_classes())
            .field("image_dir", &self.image_dir())
            .finish()
    }
}
