//! Batch Generator Factory.
//!
//! Restricts each partition to the images present in the current extraction
//! directory and wraps the survivors in infinite augmented streams.

mod augment;
mod stream;

pub use augment::{AffineParams, AugmentationConfig, Augmenter, FillMode};
pub use stream::{ImageStream, Sample, StreamOptions};

use cxr_training::{DirLease, GeneratorPair};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::ImageConfig;
use crate::error::{CoreError, CoreResult};
use crate::metadata::{LabelVocabulary, MetadataRecord};

/// Stream settings shared by every batch of the run.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub width: u32,
    pub height: u32,
    pub batch_size: usize,
    pub rescale: Option<f32>,
    pub augmentation: AugmentationConfig,
    /// Apply `augmentation` to the validation stream too.
    pub augment_validation: bool,
    pub seed: u64,
}

impl GeneratorSettings {
    pub fn from_config(images: &ImageConfig, seed: u64) -> Self {
        Self {
            width: images.width,
            height: images.height,
            batch_size: images.batch_size,
            rescale: images.rescale,
            augmentation: images.augmentation.clone(),
            augment_validation: images.augment_validation,
            seed,
        }
    }
}

/// Files under `dir` keyed by file name. A missing directory yields an empty index.
pub fn index_images(dir: &Path) -> CoreResult<HashMap<String, PathBuf>> {
    let mut index = HashMap::new();
    if !dir.exists() {
        return Ok(index);
    }
    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(|e| CoreError::Generator(format!("failed to scan {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            index.insert(name.to_string(), entry.into_path());
        }
    }
    Ok(index)
}

/// Rows of `records` whose image is present in `index`, in table order.
pub fn filter_present(
    records: &[MetadataRecord],
    index: &HashMap<String, PathBuf>,
    vocabulary: &LabelVocabulary,
) -> Vec<Sample> {
    records
        .iter()
        .filter_map(|record| {
            index.get(&record.image_index).map(|path| Sample {
                path: path.clone(),
                labels: vocabulary.encode(&record.labels),
            })
        })
        .collect()
}

#[derive(Debug)]
pub struct GeneratorFactory {
    settings: GeneratorSettings,
    builds: AtomicU64,
}

impl GeneratorFactory {
    pub fn new(settings: GeneratorSettings) -> Self {
        Self { settings, builds: AtomicU64::new(0) }
    }

    pub fn settings(&self) -> &GeneratorSettings {
        &self.settings
    }

    /// Streams over the images currently in `image_dir`.
    ///
    /// Returns `None` when either partition has no image on disk.
    pub fn make_generators(
        &self,
        train: &[MetadataRecord],
        test: &[MetadataRecord],
        image_dir: &Path,
        vocabulary: &LabelVocabulary,
    ) -> CoreResult<Option<GeneratorPair>> {
        self.build(train, test, image_dir, vocabulary, None)
    }

    /// Like [`Self::make_generators`], with the pair holding `lease` until it is dropped.
    pub fn make_leased_generators(
        &self,
        train: &[MetadataRecord],
        test: &[MetadataRecord],
        lease: &DirLease,
        vocabulary: &LabelVocabulary,
    ) -> CoreResult<Option<GeneratorPair>> {
        self.build(train, test, lease.path(), vocabulary, Some(lease.clone()))
    }

    fn build(
        &self,
        train: &[MetadataRecord],
        test: &[MetadataRecord],
        image_dir: &Path,
        vocabulary: &LabelVocabulary,
        lease: Option<DirLease>,
    ) -> CoreResult<Option<GeneratorPair>> {
        let index = index_images(image_dir)?;
        let train_samples = filter_present(train, &index, vocabulary);
        let test_samples = filter_present(test, &index, vocabulary);

        info!(
            image_dir = %image_dir.display(),
            files = index.len(),
            train = train_samples.len(),
            valid = test_samples.len(),
            "filtered partitions to images on disk"
        );

        if train_samples.is_empty() || test_samples.is_empty() {
            return Ok(None);
        }

        let build = self.builds.fetch_add(1, Ordering::Relaxed);
        let seed = self.settings.seed.wrapping_add(build.wrapping_mul(2));
        let augmenter = Augmenter::new(self.settings.augmentation.clone());
        let options = |seed, augment: bool| StreamOptions {
            width: self.settings.width,
            height: self.settings.height,
            batch_size: self.settings.batch_size,
            rescale: self.settings.rescale,
            augmenter: augment.then(|| augmenter.clone()),
            seed,
        };

        let classes = vocabulary.feature_len();
        let train_stream = ImageStream::new(train_samples, classes, options(seed, true))?;
        let valid_options = options(seed.wrapping_add(1), self.settings.augment_validation);
        let valid_stream = ImageStream::new(test_samples, classes, valid_options)?;
        debug!(seed, classes, "generator pair built");

        Ok(Some(GeneratorPair::new(Box::new(train_stream), Box::new(valid_stream), lease)?))
    }
}
