//! Error types for CXR Core.

use cxr_training::TrainingError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Errors raised by the rotation pipeline.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid or unreadable configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Metadata table could not be loaded or transformed.
    #[error("metadata error: {0}")]
    Metadata(String),

    /// Download, extraction or cleanup failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Batch generators could not be built.
    #[error("generator error: {0}")]
    Generator(String),

    /// Topology, fit, checkpoint or export failure.
    #[error(transparent)]
    Training(#[from] TrainingError),

    /// A batch failed; wraps the underlying cause with the batch ordinal.
    #[error("batch {ordinal} failed: {source}")]
    Batch {
        ordinal: usize,
        #[source]
        source: Box<CoreError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CoreError {
    /// Ordinal of the failing batch, if this error carries one.
    #[must_use]
    pub fn batch_ordinal(&self) -> Option<usize> {
        match self {
            Self::Batch { ordinal, .. } => Some(*ordinal),
            _ => None,
        }
    }
}

/// Result type for CXR Core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;
