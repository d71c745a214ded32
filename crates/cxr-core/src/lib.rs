//! CXR Core - batched chest X-ray training over rotating remote archives.
//!
//! This crate provides:
//! - Run configuration (TOML)
//! - Storage utility: archive download, extraction and cleanup
//! - Metadata transformer: label vocabulary and stratified partitions
//! - Batch generator factory: augmented image streams over the files on disk
//! - The Burn classifier and its incremental trainer
//! - The batch orchestrator driving the rotation
//!
//! # Example
//!
//! ```rust,ignore
//! use cxr_core::{BatchOrchestrator, BatchPlan, CxrConfig, MetadataTransformer};
//!
//! let config = CxrConfig::load_from_file("cxr.toml".as_ref())?;
//! let (partitions, vocabulary) = MetadataTransformer::new(config.data.clone()).process()?;
//! let plan = BatchPlan::new(config.rotation.links.clone(), config.rotation.archives_per_batch)?;
//! let report = orchestrator.run(&partitions, &vocabulary, &plan).await?;
//! ```

pub mod config;
pub mod error;
pub mod generator;
pub mod metadata;
pub mod model;
pub mod rotation;
pub mod storage;
pub mod training;

pub use config::{
    ConfigError, CxrConfig, DataConfig, DownloadConfig, FailurePolicy, ImageConfig, PathsConfig,
    RotationConfig, TrainingConfig,
};
pub use error::{CoreError, CoreResult};
pub use generator::{GeneratorFactory, GeneratorSettings};
pub use metadata::{DatasetPartition, LabelVocabulary, MetadataRecord, MetadataTransformer};
pub use model::{XrayClassifier, XrayClassifierConfig, load_exported};
pub use rotation::{
    BatchGroup, BatchManifest, BatchOrchestrator, BatchOutcome, BatchPlan, BatchReport,
    RotationLedger, RotationOptions, RotationReport,
};
pub use storage::{Downloader, RetryPolicy, StorageError};
pub use training::{BurnTrainer, BurnTrainerConfig, CheckpointState, ResumeState};
