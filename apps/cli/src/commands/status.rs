//! `cxr status`: checkpoint sidecar, resume snapshot, progress ledger and last export.

use anyhow::Result;
use colored::Colorize;
use cxr_core::{CheckpointState, ResumeState, RotationLedger};
use cxr_training::ExportManifest;
use cxr_training::artifacts::read_json;
use serde_json::json;
use std::path::Path;

pub fn execute(config_path: &Path, json_output: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let layout = config.paths.layout();

    let checkpoint: Option<CheckpointState> = read_json(&layout.checkpoint_state_path())?;
    let resume: Option<ResumeState> = read_json(&layout.resume_state_path())?;
    let ledger = RotationLedger::load(layout.ledger_path())?;
    let export: Option<ExportManifest> = read_json(&layout.export_manifest_path())?;

    if json_output {
        let out = json!({ "checkpoint": checkpoint, "resume": resume, "ledger": ledger, "export": export });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Run status".bold().cyan());
    println!("  {}", format!("work dir {}", layout.root().display()).dimmed());
    println!();

    match &checkpoint {
        Some(state) => println!(
            "  checkpoint  val loss {:.4} (batch {}, epoch {}, {})",
            state.best_val_loss,
            state.batch_ordinal,
            state.epoch,
            state.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        None => println!("  checkpoint  {}", "none".dimmed()),
    }
    if let Some(resume) = &resume {
        println!("  latest      weights after batch {}", resume.batch_ordinal);
    }

    match &ledger {
        Some(ledger) => {
            let done = ledger.last_completed_batch.map_or_else(|| "none".to_string(), |b| b.to_string());
            println!("  progress    last completed batch {done}");
            if !ledger.failed.is_empty() {
                println!("              {}", format!("failed batches {:?}", ledger.failed).yellow());
            }
        }
        None => println!("  progress    {}", "no ledger".dimmed()),
    }

    match &export {
        Some(manifest) => println!(
            "  export      run {} with {} labels, {} artifacts",
            manifest.run_id,
            manifest.labels.len(),
            manifest.artifacts.len()
        ),
        None => println!("  export      {}", "none".dimmed()),
    }
    println!();
    Ok(())
}
