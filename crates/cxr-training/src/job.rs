use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one rotation run (one process invocation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Hyper-parameters shared by every fit increment of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingHyperParams {
    pub seed: u64,
    /// Upper bound on epochs per batch increment.
    pub epochs: usize,
    pub learning_rate: f64,
    /// Epochs without validation-loss improvement before an increment stops.
    pub patience: usize,
}

impl Default for TrainingHyperParams {
    fn default() -> Self {
        Self { seed: 42, epochs: 5, learning_rate: 1e-3, patience: 5 }
    }
}

impl TrainingHyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.patience == 0 {
            return Err(TrainingError::InvalidSpec("patience must be >= 1".to_string()));
        }
        Ok(())
    }
}
