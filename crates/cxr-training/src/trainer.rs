use crate::artifacts::TrainingArtifact;
use crate::dataset::GeneratorPair;
use crate::error::TrainingResult;
use crate::history::FitHistory;
use async_trait::async_trait;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainerStatus {
    Idle,
    Running { batch: usize },
    Exported,
    Failed(String),
}

/// Owns one model's weights for the lifetime of a rotation run.
#[async_trait]
pub trait IncrementalTrainer: Send {
    fn id(&self) -> &'static str;

    /// Trains on one batch's streams, checkpointing on validation-loss improvement.
    async fn fit_increment(
        &mut self,
        generators: GeneratorPair,
        batch_ordinal: usize,
    ) -> TrainingResult<FitHistory>;

    /// Serializes architecture and final weights under `stem`.
    async fn export(&mut self, stem: &Path) -> TrainingResult<Vec<TrainingArtifact>>;

    fn status(&self) -> TrainerStatus;
}
