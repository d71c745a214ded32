//! Batch Orchestrator: the rotation control loop.
//!
//! Every batch runs download, extract, generators, fit and cleanup in sequence.
//! Nothing from one batch survives into the next except the trainer's weights.

use chrono::Utc;
use cxr_training::artifacts::write_json;
use cxr_training::{
    ExportManifest, FitHistory, IncrementalTrainer, LogProgressSink, ProgressSink, RotationEvent,
    RunId, RunLayout, TrainingArtifact, TrainingMetrics,
};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::ledger::RotationLedger;
use super::manifest::BatchManifest;
use super::plan::{BatchGroup, BatchPlan};
use crate::config::{FailurePolicy, RotationConfig};
use crate::error::{CoreError, CoreResult};
use crate::generator::GeneratorFactory;
use crate::metadata::{DatasetPartition, LabelVocabulary};
use crate::storage::{Downloader, extract_archives};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOptions {
    pub failure_policy: FailurePolicy,
    /// Skip batches the progress ledger records as done for the same plan.
    pub resume: bool,
    /// Archives of one batch downloaded in parallel.
    pub download_concurrency: usize,
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self { failure_policy: FailurePolicy::FailFast, resume: false, download_concurrency: 1 }
    }
}

impl RotationOptions {
    pub fn from_config(rotation: &RotationConfig) -> Self {
        Self {
            failure_policy: rotation.failure_policy,
            resume: rotation.resume,
            download_concurrency: rotation.download.concurrency,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    Trained(FitHistory),
    /// Nothing on disk matched one of the partitions.
    Skipped { reason: String },
    /// Failed under the skip policy.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub ordinal: usize,
    pub outcome: BatchOutcome,
}

/// Summary of a finished rotation run.
#[derive(Debug, Clone, Serialize)]
pub struct RotationReport {
    pub run_id: RunId,
    pub resumed_after: Option<usize>,
    pub batches: Vec<BatchReport>,
    pub metrics: TrainingMetrics,
    pub artifacts: Vec<TrainingArtifact>,
    pub export_manifest_path: PathBuf,
}

impl RotationReport {
    pub fn histories(&self) -> impl Iterator<Item = &FitHistory> {
        self.batches.iter().filter_map(|b| match &b.outcome {
            BatchOutcome::Trained(history) => Some(history),
            _ => None,
        })
    }
}

/// Drives the batch rotation over one trainer.
pub struct BatchOrchestrator<T: IncrementalTrainer> {
    trainer: T,
    factory: GeneratorFactory,
    downloader: Downloader,
    layout: RunLayout,
    options: RotationOptions,
    sink: Arc<dyn ProgressSink>,
    run_id: RunId,
}

impl<T: IncrementalTrainer> BatchOrchestrator<T> {
    pub fn new(trainer: T, factory: GeneratorFactory, downloader: Downloader, layout: RunLayout) -> Self {
        Self {
            trainer,
            factory,
            downloader,
            layout,
            options: RotationOptions::default(),
            sink: Arc::new(LogProgressSink),
            run_id: RunId::new(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RotationOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn into_trainer(self) -> T {
        self.trainer
    }

    /// Runs every batch of `plan`, then exports the final model.
    ///
    /// Under `FailFast` the first failing batch aborts the run with a
    /// [`CoreError::Batch`] after its files were removed.
    pub async fn run(
        &mut self,
        partitions: &DatasetPartition,
        vocabulary: &LabelVocabulary,
        plan: &BatchPlan,
    ) -> CoreResult<RotationReport> {
        self.layout.ensure_dirs()?;

        let ledger_path = self.layout.ledger_path().to_path_buf();
        let (mut ledger, resume_after) = if self.options.resume {
            RotationLedger::resume_point(&ledger_path, &plan.fingerprint())?
        } else {
            (RotationLedger::new(plan.fingerprint()), None)
        };

        self.sink.on_event(RotationEvent::RunStarted {
            run_id: self.run_id.clone(),
            total_batches: plan.len(),
            resume_after,
        });

        let mut batches = Vec::with_capacity(plan.len());
        for group in plan.groups() {
            let ordinal = group.ordinal;
            if resume_after.is_some_and(|done| ordinal <= done) {
                debug!(batch = ordinal, "batch completed by an earlier run, skipping");
                continue;
            }

            let span = info_span!("batch", batch = ordinal);
            match self.run_batch(&group, partitions, vocabulary).instrument(span).await {
                Ok(outcome) => {
                    ledger.record_completed(ordinal);
                    ledger.save(&ledger_path)?;
                    batches.push(BatchReport { ordinal, outcome });
                }
                Err(e) => {
                    let err = CoreError::Batch { ordinal, source: Box::new(e) };
                    error!(batch = ordinal, error = %err, "batch failed");
                    self.sink.on_event(RotationEvent::BatchFailed { batch: ordinal, error: err.to_string() });

                    match self.options.failure_policy {
                        FailurePolicy::FailFast => return Err(err),
                        FailurePolicy::SkipBatch => {
                            ledger.record_failed(ordinal);
                            ledger.save(&ledger_path)?;
                            batches.push(BatchReport { ordinal, outcome: BatchOutcome::Failed { error: err.to_string() } });
                        }
                    }
                }
            }
        }

        let artifacts = self.trainer.export(self.layout.export_stem()).await?;
        let metrics = summarize(&batches);
        let manifest = ExportManifest {
            run_id: self.run_id.clone(),
            created_at: Utc::now(),
            labels: vocabulary.feature_labels().to_vec(),
            metrics: metrics.clone(),
            artifacts: artifacts.clone(),
        };
        let export_manifest_path = self.layout.export_manifest_path();
        write_json(&export_manifest_path, &manifest)?;

        info!(
            trained = metrics.batches_trained,
            skipped = metrics.batches_skipped,
            failed = metrics.batches_failed,
            best_val_loss = ?metrics.best_val_loss,
            "rotation complete"
        );
        self.sink.on_event(RotationEvent::RunFinished {
            run_id: self.run_id.clone(),
            export_path: export_manifest_path.clone(),
        });

        Ok(RotationReport {
            run_id: self.run_id.clone(),
            resumed_after: resume_after,
            batches,
            metrics,
            artifacts,
            export_manifest_path,
        })
    }

    /// One iteration; the batch's files are gone when this returns, whatever the outcome.
    async fn run_batch(
        &mut self,
        group: &BatchGroup,
        partitions: &DatasetPartition,
        vocabulary: &LabelVocabulary,
    ) -> CoreResult<BatchOutcome> {
        let ordinal = group.ordinal;
        self.sink.on_event(RotationEvent::BatchStarted { batch: ordinal, archives: group.links.len() });

        let manifest = BatchManifest::prepare(group, &self.layout)?;
        let processed = self.process_batch(&manifest, partitions, vocabulary).await;

        match (processed, manifest.cleanup()) {
            (Ok(outcome), Ok(())) => {
                self.sink.on_event(RotationEvent::BatchCleaned { batch: ordinal });
                Ok(outcome)
            }
            (Ok(_), Err(cleanup)) => Err(cleanup.into()),
            (Err(e), Ok(())) => {
                self.sink.on_event(RotationEvent::BatchCleaned { batch: ordinal });
                Err(e)
            }
            (Err(e), Err(cleanup)) => {
                warn!(batch = ordinal, error = %cleanup, "cleanup after failed batch also failed");
                Err(e)
            }
        }
    }

    async fn process_batch(
        &mut self,
        manifest: &BatchManifest,
        partitions: &DatasetPartition,
        vocabulary: &LabelVocabulary,
    ) -> CoreResult<BatchOutcome> {
        let ordinal = manifest.ordinal();

        let downloader = &self.downloader;
        let sink = &self.sink;
        let archives: Vec<PathBuf> = futures::stream::iter(manifest.downloads())
            .map(|(url, path)| async move {
                let bytes = downloader.download(url, path).await?;
                sink.on_event(RotationEvent::ArchiveDownloaded {
                    batch: ordinal,
                    path: path.to_path_buf(),
                    bytes,
                });
                Ok::<_, CoreError>(path.to_path_buf())
            })
            .buffered(self.options.download_concurrency.max(1))
            .try_collect()
            .await?;

        let dest = manifest.extract_dir().to_path_buf();
        let files = extract_archives(archives, dest, self.downloader.shows_progress()).await?;
        self.sink.on_event(RotationEvent::BatchExtracted { batch: ordinal, files });

        let Some(generators) =
            self.factory
                .make_leased_generators(&partitions.train, &partitions.test, manifest.lease(), vocabulary)?
        else {
            let reason = "no train or validation image present after extraction".to_string();
            self.sink.on_event(RotationEvent::BatchSkipped { batch: ordinal, reason: reason.clone() });
            return Ok(BatchOutcome::Skipped { reason });
        };

        debug!(batch = ordinal, ?generators, "fitting increment");
        let history = self.trainer.fit_increment(generators, ordinal).await?;
        self.sink.on_event(RotationEvent::BatchTrained {
            batch: ordinal,
            epochs: history.epochs.len(),
            best_val_loss: history.best_val_loss(),
        });
        Ok(BatchOutcome::Trained(history))
    }
}

fn summarize(batches: &[BatchReport]) -> TrainingMetrics {
    let mut metrics = TrainingMetrics::default();
    for batch in batches {
        match &batch.outcome {
            BatchOutcome::Trained(history) => {
                metrics.batches_trained += 1;
                metrics.epochs += history.epochs.len();
                if let Some(loss) = history.best_val_loss() {
                    metrics.best_val_loss = Some(metrics.best_val_loss.map_or(loss, |best| best.min(loss)));
                }
            }
            BatchOutcome::Skipped { .. } => metrics.batches_skipped += 1,
            BatchOutcome::Failed { .. } => metrics.batches_failed += 1,
        }
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxr_training::EpochMetrics;

    fn trained(ordinal: usize, losses: &[f64]) -> BatchReport {
        let mut history = FitHistory::new(ordinal);
        history.epochs = losses
            .iter()
            .enumerate()
            .map(|(i, &val_loss)| EpochMetrics {
                epoch: i + 1,
                train_loss: 1.0,
                train_accuracy: 0.5,
                val_loss,
                val_accuracy: 0.5,
                improved: false,
                checkpointed: false,
            })
            .collect();
        BatchReport { ordinal, outcome: BatchOutcome::Trained(history) }
    }

    #[test]
    fn test_summarize_counts_outcomes() {
        let batches = vec![
            trained(1, &[0.9, 0.7]),
            BatchReport { ordinal: 2, outcome: BatchOutcome::Skipped { reason: "empty".to_string() } },
            trained(3, &[0.8, 0.5, 0.6]),
            BatchReport { ordinal: 4, outcome: BatchOutcome::Failed { error: "boom".to_string() } },
        ];

        let metrics = summarize(&batches);
        assert_eq!(metrics.batches_trained, 2);
        assert_eq!(metrics.batches_skipped, 1);
        assert_eq!(metrics.batches_failed, 1);
        assert_eq!(metrics.epochs, 5);
        assert_eq!(metrics.best_val_loss, Some(0.5));
    }

    #[test]
    fn test_options_follow_rotation_config() {
        let mut config = RotationConfig::default();
        config.failure_policy = FailurePolicy::SkipBatch;
        config.resume = true;
        config.download.concurrency = 3;

        let options = RotationOptions::from_config(&config);
        assert_eq!(options.failure_policy, FailurePolicy::SkipBatch);
        assert!(options.resume);
        assert_eq!(options.download_concurrency, 3);
    }
}
