//! `cxr run`: metadata → partitions → batch rotation → export.

use anyhow::{Context, Result};
use burn::backend::{Autodiff, NdArray};
use burn::optim::AdamConfig;
use colored::Colorize;
use cxr_core::generator::GeneratorSettings;
use cxr_core::{
    BatchOrchestrator, BatchOutcome, BatchPlan, BurnTrainer, BurnTrainerConfig, Downloader,
    FailurePolicy, GeneratorFactory, MetadataTransformer, RotationOptions, RotationReport,
    XrayClassifier, XrayClassifierConfig,
};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::info;

type Backend = Autodiff<NdArray>;

#[derive(Debug)]
pub struct RunArgs {
    pub config: PathBuf,
    pub metadata: Option<PathBuf>,
    pub resume: bool,
    pub policy: Option<FailurePolicy>,
    pub json: bool,
}

pub async fn execute(args: RunArgs) -> Result<()> {
    let mut config = super::load_config(&args.config)?;
    if let Some(metadata) = args.metadata {
        config.data.metadata_path = metadata;
    }
    if args.resume {
        config.rotation.resume = true;
    }
    if let Some(policy) = args.policy {
        config.rotation.failure_policy = policy;
    }

    let (partitions, vocabulary) = MetadataTransformer::new(config.data.clone())
        .process()
        .context("failed to prepare the metadata table")?;
    let plan = BatchPlan::new(config.rotation.links.clone(), config.rotation.archives_per_batch)?;
    let layout = config.paths.layout();

    let model = XrayClassifierConfig::new(vocabulary.feature_len())
        .with_base_filters(config.training.base_filters)
        .with_hidden_units(config.training.hidden_units)
        .with_dropout(config.training.dropout);
    let trainer_config = BurnTrainerConfig::new(model, config.training.hyperparams(), &layout)
        .with_resume(config.rotation.resume);
    let optimizer = AdamConfig::new().init::<Backend, XrayClassifier<Backend>>();
    let trainer = BurnTrainer::<Backend, _>::initialize(trainer_config, Default::default(), optimizer)
        .context("failed to initialize the model")?;

    let download = &config.rotation.download;
    let downloader = Downloader::new(download.timeout(), download.retry_policy())
        .with_progress(download.show_progress && std::io::stderr().is_terminal());
    let factory = GeneratorFactory::new(GeneratorSettings::from_config(&config.images, config.training.seed));

    info!(
        batches = plan.len(),
        labels = vocabulary.feature_len(),
        train = partitions.train.len(),
        test = partitions.test.len(),
        policy = ?config.rotation.failure_policy,
        "starting rotation"
    );

    let mut orchestrator = BatchOrchestrator::new(trainer, factory, downloader, layout)
        .with_options(RotationOptions::from_config(&config.rotation));
    let report = orchestrator.run(&partitions, &vocabulary, &plan).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &RotationReport) {
    println!();
    println!("{}", format!("Rotation {}", report.run_id).bold().cyan());
    if let Some(done) = report.resumed_after {
        println!("  {}", format!("resumed after batch {done}").dimmed());
    }
    println!();

    for batch in &report.batches {
        match &batch.outcome {
            BatchOutcome::Trained(history) => {
                let loss = history.best_val_loss().map_or_else(|| "-".to_string(), |l| format!("{l:.4}"));
                println!(
                    "  {} batch {:>3}  epochs {:>2}  best val loss {}{}",
                    "✓".green(),
                    batch.ordinal,
                    history.epochs.len(),
                    loss,
                    if history.stopped_early { "  (stopped early)" } else { "" }
                );
            }
            BatchOutcome::Skipped { reason } => {
                println!("  {} batch {:>3}  skipped: {}", "-".yellow(), batch.ordinal, reason);
            }
            BatchOutcome::Failed { error } => {
                println!("  {} batch {:>3}  failed: {}", "✗".red(), batch.ordinal, error);
            }
        }
    }

    let metrics = &report.metrics;
    println!();
    println!(
        "  trained {}  skipped {}  failed {}",
        metrics.batches_trained, metrics.batches_skipped, metrics.batches_failed
    );
    println!("  export manifest: {}", report.export_manifest_path.display());
    println!();
}
