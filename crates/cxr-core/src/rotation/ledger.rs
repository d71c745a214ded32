use chrono::{DateTime, Utc};
use cxr_training::artifacts::{read_json, write_json};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::error::CoreResult;

/// Batch progress of a rotation run, persisted after every completed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationLedger {
    /// Fingerprint of the batch plan this progress belongs to.
    pub plan_fingerprint: String,
    /// Highest batch ordinal that finished (trained or skipped) with cleanup done.
    pub last_completed_batch: Option<usize>,
    /// Ordinals that failed under the skip policy.
    #[serde(default)]
    pub failed: Vec<usize>,
    pub updated_at: DateTime<Utc>,
}

impl RotationLedger {
    pub fn new(plan_fingerprint: impl Into<String>) -> Self {
        Self {
            plan_fingerprint: plan_fingerprint.into(),
            last_completed_batch: None,
            failed: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> CoreResult<Option<Self>> {
        Ok(read_json(path)?)
    }

    pub fn save(&mut self, path: &Path) -> CoreResult<()> {
        self.updated_at = Utc::now();
        write_json(path, self)?;
        Ok(())
    }

    /// Ledger to continue with, and the last batch to skip.
    ///
    /// A ledger from a different plan is discarded.
    pub fn resume_point(path: &Path, fingerprint: &str) -> CoreResult<(Self, Option<usize>)> {
        match Self::load(path)? {
            Some(ledger) if ledger.plan_fingerprint == fingerprint => {
                let resume_after = ledger.last_completed_batch;
                info!(path = %path.display(), ?resume_after, "resuming from progress ledger");
                Ok((ledger, resume_after))
            }
            Some(_) => {
                warn!(path = %path.display(), "progress ledger belongs to a different batch plan, starting over");
                Ok((Self::new(fingerprint), None))
            }
            None => Ok((Self::new(fingerprint), None)),
        }
    }

    pub fn record_completed(&mut self, ordinal: usize) {
        self.last_completed_batch = Some(self.last_completed_batch.map_or(ordinal, |last| last.max(ordinal)));
    }

    pub fn record_failed(&mut self, ordinal: usize) {
        if !self.failed.contains(&ordinal) {
            self.failed.push(ordinal);
        }
        self.record_completed(ordinal);
    }
}
