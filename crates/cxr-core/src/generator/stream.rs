use cxr_training::{BatchSource, ImageBatch, TrainingError, TrainingResult};
use image::imageops::FilterType;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};

use super::augment::Augmenter;

/// One image on disk and its multi-hot label vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub path: PathBuf,
    pub labels: Vec<f32>,
}

/// Shape and preprocessing shared by a stream's batches.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub width: u32,
    pub height: u32,
    pub batch_size: usize,
    pub rescale: Option<f32>,
    pub augmenter: Option<Augmenter>,
    pub seed: u64,
}

/// Infinite, shuffled, lazily decoded stream over a fixed sample list.
///
/// Every pass over the samples uses a fresh permutation. The last batch of a pass
/// may be smaller than `batch_size`.
pub struct ImageStream {
    samples: Vec<Sample>,
    num_classes: usize,
    options: StreamOptions,
    order: Vec<usize>,
    cursor: usize,
    rng: ChaCha8Rng,
}

impl ImageStream {
    pub fn new(samples: Vec<Sample>, num_classes: usize, options: StreamOptions) -> TrainingResult<Self> {
        if samples.is_empty() {
            return Err(TrainingError::Dataset("image stream needs at least one sample".to_string()));
        }
        if options.batch_size == 0 || options.width == 0 || options.height == 0 {
            return Err(TrainingError::Dataset("image stream needs non-zero batch and image size".to_string()));
        }
        if let Some(bad) = samples.iter().find(|s| s.labels.len() != num_classes) {
            return Err(TrainingError::Dataset(format!(
                "{} has {} labels, expected {num_classes}",
                bad.path.display(),
                bad.labels.len()
            )));
        }

        let mut stream = Self {
            order: (0..samples.len()).collect(),
            samples,
            num_classes,
            cursor: 0,
            rng: ChaCha8Rng::seed_from_u64(options.seed),
            options,
        };
        stream.order.shuffle(&mut stream.rng);
        Ok(stream)
    }

    /// Restarts the stream with the initial permutation.
    pub fn reset(&mut self) {
        self.rng = ChaCha8Rng::seed_from_u64(self.options.seed);
        self.order = (0..self.samples.len()).collect();
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn load(&mut self, path: &Path) -> TrainingResult<Vec<f32>> {
        let (width, height) = (self.options.width, self.options.height);
        let image = image::open(path)
            .map_err(|e| TrainingError::Dataset(format!("failed to decode {}: {e}", path.display())))?
            .resize_exact(width, height, FilterType::Nearest)
            .to_luma8();

        let scale = self.options.rescale.unwrap_or(1.0);
        let pixels: Vec<f32> = image.pixels().map(|p| f32::from(p.0[0]) * scale).collect();

        Ok(match &self.options.augmenter {
            Some(augmenter) => augmenter.augment(&pixels, width as usize, height as usize, &mut self.rng),
            None => pixels,
        })
    }
}

impl BatchSource for ImageStream {
    fn next_batch(&mut self) -> TrainingResult<ImageBatch> {
        if self.cursor >= self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
        }

        let end = (self.cursor + self.options.batch_size).min(self.order.len());
        let picked: Vec<usize> = self.order[self.cursor..end].to_vec();
        self.cursor = end;

        let (width, height) = (self.options.width as usize, self.options.height as usize);
        let mut images = Vec::with_capacity(picked.len() * width * height);
        let mut labels = Vec::with_capacity(picked.len() * self.num_classes);
        for index in &picked {
            let path = self.samples[*index].path.clone();
            images.extend(self.load(&path)?);
            labels.extend_from_slice(&self.samples[*index].labels);
        }

        let batch = ImageBatch {
            images,
            labels,
            len: picked.len(),
            channels: 1,
            height,
            width,
            num_classes: self.num_classes,
        };
        batch.validate()?;
        Ok(batch)
    }

    fn steps_per_epoch(&self) -> usize {
        self.samples.len().div_ceil(self.options.batch_size)
    }

    fn sample_count(&self) -> usize {
        self.samples.len()
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}
