use crate::job::RunId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RotationEvent {
    RunStarted { run_id: RunId, total_batches: usize, resume_after: Option<usize> },
    BatchStarted { batch: usize, archives: usize },
    ArchiveDownloaded { batch: usize, path: PathBuf, bytes: u64 },
    BatchExtracted { batch: usize, files: usize },
    BatchSkipped { batch: usize, reason: String },
    BatchTrained { batch: usize, epochs: usize, best_val_loss: Option<f64> },
    BatchCleaned { batch: usize },
    BatchFailed { batch: usize, error: String },
    RunFinished { run_id: RunId, export_path: PathBuf },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: RotationEvent);
}

/// Forwards rotation events to `tracing`.
#[derive(Debug, Default)]
pub struct LogProgressSink;

impl ProgressSink for LogProgressSink {
    fn on_event(&self, event: RotationEvent) {
        match event {
            RotationEvent::RunStarted { run_id, total_batches, resume_after } => {
                tracing::info!(%run_id, total_batches, ?resume_after, "rotation started");
            }
            RotationEvent::BatchStarted { batch, archives } => {
                tracing::info!(batch, archives, "batch started");
            }
            RotationEvent::ArchiveDownloaded { batch, path, bytes } => {
                tracing::info!(batch, path = %path.display(), bytes, "archive downloaded");
            }
            RotationEvent::BatchExtracted { batch, files } => {
                tracing::info!(batch, files, "batch extracted");
            }
            RotationEvent::BatchSkipped { batch, reason } => {
                tracing::warn!(batch, %reason, "batch skipped");
            }
            RotationEvent::BatchTrained { batch, epochs, best_val_loss } => {
                tracing::info!(batch, epochs, ?best_val_loss, "batch trained");
            }
            RotationEvent::BatchCleaned { batch } => tracing::info!(batch, "batch cleaned up"),
            RotationEvent::BatchFailed { batch, error } => {
                tracing::error!(batch, %error, "batch failed");
            }
            RotationEvent::RunFinished { run_id, export_path } => {
                tracing::info!(%run_id, export_path = %export_path.display(), "rotation finished");
            }
        }
    }
}

/// Keeps every event in memory; useful for inspecting a run after the fact.
#[derive(Debug, Default)]
pub struct MemoryProgressSink {
    events: Mutex<Vec<RotationEvent>>,
}

impl MemoryProgressSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RotationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for MemoryProgressSink {
    fn on_event(&self, event: RotationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
