//! Archive storage for one batch: download, extract and reclaim.

mod archive;
mod cleanup;
mod download;

pub use archive::{extract_archives, extract_tar_gz};
pub use cleanup::cleanup_paths;
pub use download::{Downloader, RetryPolicy, partial_path};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while moving archive bytes around.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("download of {url} exceeded {secs}s")]
    Timeout { url: String, secs: u64 },

    #[error("archive {path} is unreadable: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("storage task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path: path.into(), source }
    }

    /// Transport failures, timeouts, 5xx, 408 and 429 are worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request() || source.is_body()
            }
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Timeout { .. } => true,
            Self::Archive { .. } | Self::Io { .. } | Self::Task(_) => false,
        }
    }
}
