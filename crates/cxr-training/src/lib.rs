//! CXR Training
//!
//! Backend-agnostic training primitives for batch-rotation training:
//! - Hyper-parameters and run identifiers (`TrainingHyperParams`, `RunId`)
//! - Batch sources and generator pairs fed to a trainer
//! - Per-epoch fit history
//! - Export artifacts + manifests
//! - Progress events emitted by the rotation loop
//! - The `IncrementalTrainer` seam implemented by concrete backends

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod history;
pub mod job;
pub mod layout;
pub mod progress;
pub mod trainer;

pub use artifacts::{ArtifactKind, ExportManifest, TrainingArtifact, TrainingMetrics};
pub use dataset::{BatchSource, DirLease, GeneratorPair, ImageBatch};
pub use error::{TrainingError, TrainingResult};
pub use history::{EpochMetrics, FitHistory};
pub use job::{RunId, TrainingHyperParams};
pub use layout::RunLayout;
pub use progress::{LogProgressSink, MemoryProgressSink, ProgressSink, RotationEvent};
pub use trainer::{IncrementalTrainer, TrainerStatus};
