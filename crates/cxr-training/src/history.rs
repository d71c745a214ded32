use serde::{Deserialize, Serialize};

/// Metrics for a single epoch of a fit increment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch within the increment.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// Validation loss beat the best seen so far in this increment.
    pub improved: bool,
    /// The weight snapshot was written to the rolling checkpoint.
    pub checkpointed: bool,
}

/// Per-epoch history returned by one fit increment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitHistory {
    pub batch_ordinal: usize,
    pub epochs: Vec<EpochMetrics>,
    pub stopped_early: bool,
    /// Best weights were restored after early stopping.
    pub restored_best: bool,
}

impl FitHistory {
    #[must_use]
    pub fn new(batch_ordinal: usize) -> Self {
        Self { batch_ordinal, ..Default::default() }
    }

    #[must_use]
    pub fn best_val_loss(&self) -> Option<f64> {
        self.epochs.iter().map(|e| e.val_loss).reduce(f64::min)
    }

    /// 1-based epoch with the lowest validation loss.
    #[must_use]
    pub fn best_epoch(&self) -> Option<usize> {
        self.epochs
            .iter()
            .min_by(|a, b| a.val_loss.total_cmp(&b.val_loss))
            .map(|e| e.epoch)
    }

    #[must_use]
    pub fn checkpoints_written(&self) -> usize {
        self.epochs.iter().filter(|e| e.checkpointed).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, val_loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: 1.0,
            train_accuracy: 0.5,
            val_loss,
            val_accuracy: 0.5,
            improved: false,
            checkpointed: false,
        }
    }

    #[test]
    fn test_best_epoch_and_loss() {
        let mut history = FitHistory::new(2);
        history.epochs = vec![epoch(1, 0.9), epoch(2, 0.4), epoch(3, 0.6)];

        assert_eq!(history.best_epoch(), Some(2));
        assert_eq!(history.best_val_loss(), Some(0.4));
    }

    #[test]
    fn test_empty_history() {
        let history = FitHistory::new(1);
        assert_eq!(history.best_epoch(), None);
        assert_eq!(history.best_val_loss(), None);
        assert_eq!(history.checkpoints_written(), 0);
    }
}
