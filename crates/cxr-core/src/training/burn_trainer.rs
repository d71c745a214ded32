use async_trait::async_trait;
use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::loss::BinaryCrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::{
        ElementConversion, Int, Tensor, TensorData,
        backend::{AutodiffBackend, Backend},
    },
};
use chrono::{DateTime, Utc};
use cxr_training::artifacts::{make_artifact, read_json, write_json};
use cxr_training::{
    ArtifactKind, BatchSource, EpochMetrics, FitHistory, GeneratorPair, ImageBatch,
    IncrementalTrainer, RunLayout, TrainerStatus, TrainingArtifact, TrainingError, TrainingHyperParams,
    TrainingResult,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::model::{WeightRecorder, XrayClassifier, XrayClassifierConfig, architecture_path, record_path};

/// Sidecar written next to the rolling checkpoint.
///
/// `best_val_loss` is the validation loss of the weights currently on disk; a new
/// snapshot only replaces them when it is strictly better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub best_val_loss: f64,
    pub batch_ordinal: usize,
    pub epoch: usize,
    pub num_classes: usize,
    pub saved_at: DateTime<Utc>,
}

/// Sidecar of the resume snapshot: which increment the weights next to it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeState {
    pub batch_ordinal: usize,
    pub num_classes: usize,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BurnTrainerConfig {
    pub model: XrayClassifierConfig,
    pub hyperparams: TrainingHyperParams,
    /// Rolling checkpoint stem; the recorder appends its extension.
    pub checkpoint_stem: PathBuf,
    pub state_path: PathBuf,
    /// Weights after the most recent finished increment, rewritten after every fit.
    pub resume_stem: PathBuf,
    pub resume_state_path: PathBuf,
    /// Start from the resume snapshot instead of the best checkpoint when one exists.
    pub resume: bool,
}

impl BurnTrainerConfig {
    /// Paths taken from `layout`; `resume` is off.
    pub fn new(model: XrayClassifierConfig, hyperparams: TrainingHyperParams, layout: &RunLayout) -> Self {
        Self {
            model,
            hyperparams,
            checkpoint_stem: layout.checkpoint_stem().to_path_buf(),
            state_path: layout.checkpoint_state_path(),
            resume_stem: layout.resume_stem(),
            resume_state_path: layout.resume_state_path(),
            resume: false,
        }
    }

    #[must_use]
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }
}

/// Weights plus optimizer state; lives for the whole process.
struct ModelState<B: AutodiffBackend, O> {
    model: XrayClassifier<B>,
    optimizer: O,
}

/// Burn-backed trainer owning one classifier for the lifetime of a rotation run.
///
/// Fits run on Tokio's blocking pool. Only weights are checkpointed; the optimizer
/// state is rebuilt fresh when a process resumes from a checkpoint.
pub struct BurnTrainer<B: AutodiffBackend, O> {
    config: BurnTrainerConfig,
    device: B::Device,
    state: Option<ModelState<B, O>>,
    best_val_loss: Option<f64>,
    resumed_batch: Option<usize>,
    status: TrainerStatus,
}

impl<B, O> BurnTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<XrayClassifier<B>, B> + Send + 'static,
{
    /// Builds the network and loads checkpoint weights if a record exists.
    ///
    /// A missing checkpoint is the fresh-start path, not an error. With `resume` set,
    /// the snapshot of the last finished increment wins over the best checkpoint so
    /// increments that did not improve the validation loss are not lost.
    pub fn initialize(config: BurnTrainerConfig, device: B::Device, optimizer: O) -> TrainingResult<Self> {
        config.hyperparams.validate()?;
        if config.model.num_classes == 0 {
            return Err(TrainingError::InvalidSpec("model needs at least one output label".to_string()));
        }

        B::seed(config.hyperparams.seed);
        let mut model = config.model.init::<B>(&device);
        let mut best_val_loss = None;
        let mut resumed_batch = None;

        let record = record_path::<B>(&config.checkpoint_stem);
        if record.exists() {
            let state: Option<CheckpointState> = read_json(&config.state_path)?;
            if let Some(state) = &state {
                check_classes(&record, state.num_classes, config.model.num_classes)?;
            }
            best_val_loss = state.map(|s| s.best_val_loss);
        }

        let snapshot = record_path::<B>(&config.resume_stem);
        let resume_state: Option<ResumeState> =
            if config.resume && snapshot.exists() { read_json(&config.resume_state_path)? } else { None };

        if let Some(resume_state) = resume_state {
            check_classes(&snapshot, resume_state.num_classes, config.model.num_classes)?;
            model = load_weights(model, &config.resume_stem, &device)?;
            resumed_batch = Some(resume_state.batch_ordinal);
            info!(
                path = %snapshot.display(),
                batch = resume_state.batch_ordinal,
                ?best_val_loss,
                "resumed weights from last finished batch"
            );
        } else if record.exists() {
            model = load_weights(model, &config.checkpoint_stem, &device)?;
            info!(path = %record.display(), ?best_val_loss, "resumed weights from checkpoint");
        } else {
            debug!(path = %record.display(), "no checkpoint found, starting fresh");
        }

        Ok(Self {
            config,
            device,
            state: Some(ModelState { model, optimizer }),
            best_val_loss,
            resumed_batch,
            status: TrainerStatus::Idle,
        })
    }

    /// Batch whose snapshot the weights were resumed from, if any.
    pub fn resumed_batch(&self) -> Option<usize> {
        self.resumed_batch
    }

    /// Validation loss of the checkpoint currently on disk.
    pub fn best_val_loss(&self) -> Option<f64> {
        self.best_val_loss
    }

    /// Current weights, if no fit is in flight.
    pub fn model(&self) -> Option<&XrayClassifier<B>> {
        self.state.as_ref().map(|s| &s.model)
    }
}

#[async_trait]
impl<B, O> IncrementalTrainer for BurnTrainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<XrayClassifier<B>, B> + Send + 'static,
{
    fn id(&self) -> &'static str {
        "burn-xray"
    }

    async fn fit_increment(&mut self, generators: GeneratorPair, batch_ordinal: usize) -> TrainingResult<FitHistory> {
        if generators.num_classes() != self.config.model.num_classes {
            return Err(TrainingError::Dataset(format!(
                "generators yield {} labels, model has {}",
                generators.num_classes(),
                self.config.model.num_classes
            )));
        }

        let state = self
            .state
            .take()
            .ok_or_else(|| TrainingError::Trainer("model state was lost by an earlier fit".to_string()))?;
        self.status = TrainerStatus::Running { batch: batch_ordinal };

        let fit = FitContext {
            hyperparams: self.config.hyperparams.clone(),
            checkpoint_stem: self.config.checkpoint_stem.clone(),
            state_path: self.config.state_path.clone(),
            resume_stem: self.config.resume_stem.clone(),
            resume_state_path: self.config.resume_state_path.clone(),
            num_classes: self.config.model.num_classes,
            global_best: self.best_val_loss,
            batch_ordinal,
            device: self.device.clone(),
        };

        let outcome = tokio::task::spawn_blocking(move || fit.run(state, generators))
            .await
            .map_err(|e| {
                self.status = TrainerStatus::Failed(e.to_string());
                TrainingError::Trainer(format!("fit task for batch {batch_ordinal} aborted: {e}"))
            })?;

        self.state = Some(outcome.state);
        self.best_val_loss = outcome.global_best;

        match outcome.result {
            Ok(history) => {
                self.status = TrainerStatus::Idle;
                Ok(history)
            }
            Err(e) => {
                self.status = TrainerStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn export(&mut self, stem: &Path) -> TrainingResult<Vec<TrainingArtifact>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| TrainingError::Trainer("no model to export".to_string()))?;

        if let Some(parent) = stem.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        state
            .model
            .clone()
            .save_file(stem.to_path_buf(), &WeightRecorder::new())
            .map_err(|e| TrainingError::Artifact(format!("failed to write weights for {}: {e:?}", stem.display())))?;
        self.config.model.save(architecture_path(stem))?;

        let artifacts = vec![
            make_artifact(ArtifactKind::Weights, record_path::<B>(stem))?,
            make_artifact(ArtifactKind::Architecture, architecture_path(stem))?,
        ];
        self.status = TrainerStatus::Exported;
        info!(stem = %stem.display(), "final model exported");
        Ok(artifacts)
    }

    fn status(&self) -> TrainerStatus {
        self.status.clone()
    }
}

struct FitContext<B: AutodiffBackend> {
    hyperparams: TrainingHyperParams,
    checkpoint_stem: PathBuf,
    state_path: PathBuf,
    resume_stem: PathBuf,
    resume_state_path: PathBuf,
    num_classes: usize,
    global_best: Option<f64>,
    batch_ordinal: usize,
    device: B::Device,
}

struct FitOutcome<B: AutodiffBackend, O> {
    state: ModelState<B, O>,
    global_best: Option<f64>,
    result: TrainingResult<FitHistory>,
}

#[derive(Default)]
struct Running {
    loss: f64,
    correct: f64,
    labels: f64,
    samples: usize,
}

impl Running {
    fn add(&mut self, loss: f64, correct: i64, batch: &ImageBatch) {
        self.loss += loss * batch.len as f64;
        self.correct += correct as f64;
        self.labels += (batch.len * batch.num_classes) as f64;
        self.samples += batch.len;
    }

    fn loss(&self) -> f64 {
        self.loss / self.samples.max(1) as f64
    }

    fn accuracy(&self) -> f64 {
        if self.labels == 0.0 { 0.0 } else { self.correct / self.labels }
    }
}

impl<B: AutodiffBackend> FitContext<B> {
    fn run<O>(mut self, mut state: ModelState<B, O>, mut generators: GeneratorPair) -> FitOutcome<B, O>
    where
        O: Optimizer<XrayClassifier<B>, B>,
    {
        let result = self.fit(&mut state, &mut generators);
        // Streams and the directory lease are released only after the fit returns.
        drop(generators);
        FitOutcome { state, global_best: self.global_best, result }
    }

    fn fit<O>(&mut self, state: &mut ModelState<B, O>, generators: &mut GeneratorPair) -> TrainingResult<FitHistory>
    where
        O: Optimizer<XrayClassifier<B>, B>,
    {
        let hp = self.hyperparams.clone();
        let mut history = FitHistory::new(self.batch_ordinal);
        let mut best_in_fit: Option<f64> = None;
        let mut best_weights: Option<XrayClassifier<B>> = None;
        let mut wait = 0;

        for epoch in 1..=hp.epochs {
            let train = self.train_epoch(state, generators.train.as_mut(), epoch)?;
            let valid = self.validate(&state.model, generators.valid.as_mut(), epoch)?;
            let val_loss = valid.loss();

            let improved = best_in_fit.is_none_or(|best| val_loss < best);
            if improved {
                best_in_fit = Some(val_loss);
                best_weights = Some(state.model.clone());
                wait = 0;
            } else {
                wait += 1;
            }

            let checkpointed = self.global_best.is_none_or(|best| val_loss < best);
            if checkpointed {
                self.save_checkpoint(&state.model, val_loss, epoch)?;
                self.global_best = Some(val_loss);
            }

            info!(
                batch = self.batch_ordinal,
                epoch,
                train_loss = train.loss(),
                train_accuracy = train.accuracy(),
                val_loss,
                val_accuracy = valid.accuracy(),
                improved,
                checkpointed,
                "epoch finished"
            );
            history.epochs.push(EpochMetrics {
                epoch,
                train_loss: train.loss(),
                train_accuracy: train.accuracy(),
                val_loss,
                val_accuracy: valid.accuracy(),
                improved,
                checkpointed,
            });

            if wait >= hp.patience && epoch < hp.epochs {
                history.stopped_early = true;
                break;
            }
        }

        if history.stopped_early {
            if let Some(best) = best_weights {
                state.model = best;
                history.restored_best = true;
                info!(batch = self.batch_ordinal, best_epoch = ?history.best_epoch(), "early stop, best weights restored");
            }
        }

        self.save_resume_snapshot(&state.model)?;
        Ok(history)
    }

    fn tensors(&self, batch: &ImageBatch) -> (Tensor<B, 4>, Tensor<B, 2, Int>) {
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(batch.images.clone(), [batch.len, batch.channels, batch.height, batch.width]),
            &self.device,
        );
        let targets: Vec<i64> = batch.labels.iter().map(|v| i64::from(*v >= 0.5)).collect();
        let targets =
            Tensor::<B, 2, Int>::from_data(TensorData::new(targets, [batch.len, batch.num_classes]), &self.device);
        (images, targets)
    }

    fn next_batch(&self, source: &mut dyn BatchSource) -> TrainingResult<ImageBatch> {
        let batch = source.next_batch()?;
        if batch.num_classes != self.num_classes {
            return Err(TrainingError::Dataset(format!(
                "batch has {} labels, model has {}",
                batch.num_classes, self.num_classes
            )));
        }
        Ok(batch)
    }

    fn train_epoch<O>(
        &self,
        state: &mut ModelState<B, O>,
        source: &mut dyn BatchSource,
        epoch: usize,
    ) -> TrainingResult<Running>
    where
        O: Optimizer<XrayClassifier<B>, B>,
    {
        let loss_fn = BinaryCrossEntropyLossConfig::new().with_logits(true).init(&self.device);
        let mut running = Running::default();

        for step in 1..=source.steps_per_epoch() {
            let batch = self.next_batch(source)?;
            let (images, targets) = self.tensors(&batch);

            let logits = state.model.forward(images);
            let loss = loss_fn.forward(logits.clone(), targets.clone());
            let loss_value: f64 = loss.clone().into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(TrainingError::NonFiniteLoss { epoch, step });
            }
            let correct: i64 = logits.greater_elem(0.0).int().equal(targets).int().sum().into_scalar().elem();
            running.add(loss_value, correct, &batch);

            let grads = GradientsParams::from_grads(loss.backward(), &state.model);
            state.model = state.optimizer.step(self.hyperparams.learning_rate, state.model.clone(), grads);
        }
        Ok(running)
    }

    fn validate(
        &self,
        model: &XrayClassifier<B>,
        source: &mut dyn BatchSource,
        epoch: usize,
    ) -> TrainingResult<Running> {
        let model = model.valid();
        let loss_fn = BinaryCrossEntropyLossConfig::new().with_logits(true).init(&self.device);
        let mut running = Running::default();

        for step in 1..=source.steps_per_epoch() {
            let batch = self.next_batch(source)?;
            let (images, targets) = self.tensors(&batch);
            let (images, targets) = (images.inner(), targets.inner());

            let logits = model.forward(images);
            let loss_value: f64 = loss_fn.forward(logits.clone(), targets.clone()).into_scalar().elem();
            if !loss_value.is_finite() {
                return Err(TrainingError::NonFiniteLoss { epoch, step });
            }
            let correct: i64 = logits.greater_elem(0.0).int().equal(targets).int().sum().into_scalar().elem();
            running.add(loss_value, correct, &batch);
        }
        Ok(running)
    }

    fn save_checkpoint(&self, model: &XrayClassifier<B>, val_loss: f64, epoch: usize) -> TrainingResult<()> {
        let stem = &self.checkpoint_stem;
        write_weights(model, stem)?;

        let state = CheckpointState {
            best_val_loss: val_loss,
            batch_ordinal: self.batch_ordinal,
            epoch,
            num_classes: self.num_classes,
            saved_at: Utc::now(),
        };
        if let Err(e) = write_json(&self.state_path, &state) {
            warn!(path = %self.state_path.display(), error = %e, "checkpoint written but state sidecar failed");
            return Err(e);
        }
        info!(
            batch = self.batch_ordinal,
            epoch,
            val_loss,
            path = %record_path::<B>(stem).display(),
            "checkpoint improved"
        );
        Ok(())
    }

    fn save_resume_snapshot(&self, model: &XrayClassifier<B>) -> TrainingResult<()> {
        write_weights(model, &self.resume_stem)?;
        let state = ResumeState {
            batch_ordinal: self.batch_ordinal,
            num_classes: self.num_classes,
            saved_at: Utc::now(),
        };
        write_json(&self.resume_state_path, &state)?;
        debug!(batch = self.batch_ordinal, path = %self.resume_stem.display(), "resume snapshot written");
        Ok(())
    }
}

/// Writes weights to a side file, then renames it over `stem`'s record so a crash
/// mid-write leaves the previous snapshot intact.
fn write_weights<B: Backend>(model: &XrayClassifier<B>, stem: &Path) -> TrainingResult<()> {
    if let Some(parent) = stem.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let name = stem.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let partial = stem.with_file_name(format!("{name}-partial"));
    model
        .clone()
        .save_file(partial.clone(), &WeightRecorder::new())
        .map_err(|e| TrainingError::Checkpoint(format!("failed to write {}: {e:?}", partial.display())))?;
    std::fs::rename(record_path::<B>(&partial), record_path::<B>(stem))
        .map_err(|e| TrainingError::Checkpoint(format!("failed to replace {}: {e}", stem.display())))?;
    Ok(())
}

fn load_weights<B: Backend>(
    model: XrayClassifier<B>,
    stem: &Path,
    device: &B::Device,
) -> TrainingResult<XrayClassifier<B>> {
    model.load_file(stem.to_path_buf(), &WeightRecorder::new(), device).map_err(|e| {
        TrainingError::Checkpoint(format!("failed to load {}: {e:?}", record_path::<B>(stem).display()))
    })
}

fn check_classes(record: &Path, saved: usize, expected: usize) -> TrainingResult<()> {
    if saved == expected {
        return Ok(());
    }
    Err(TrainingError::Checkpoint(format!(
        "checkpoint {} was trained for {saved} labels, vocabulary has {expected}",
        record.display()
    )))
}
