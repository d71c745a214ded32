//! `cxr plan`: show how the archive links are grouped into batches.

use anyhow::Result;
use colored::Colorize;
use cxr_core::BatchPlan;
use serde_json::json;
use std::path::Path;

pub fn execute(config_path: &Path, json_output: bool) -> Result<()> {
    let config = super::load_config(config_path)?;
    let plan = BatchPlan::new(config.rotation.links.clone(), config.rotation.archives_per_batch)?;
    let layout = config.paths.layout();

    if json_output {
        let batches: Vec<_> = plan
            .groups()
            .into_iter()
            .map(|group| {
                let archives: Vec<_> = group
                    .links
                    .iter()
                    .map(|link| json!({ "url": link.url, "path": layout.archive_path(link.index) }))
                    .collect();
                json!({ "ordinal": group.ordinal, "archives": archives })
            })
            .collect();
        let out = json!({
            "fingerprint": plan.fingerprint(),
            "archives_per_batch": plan.group_size(),
            "batches": batches,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!("Batch plan: {} archives in {} batches", plan.links().len(), plan.len()).bold().cyan()
    );
    println!("  {}", format!("fingerprint {}", plan.fingerprint()).dimmed());
    println!();

    for group in plan.groups() {
        println!("  {}", format!("batch {}", group.ordinal).bold());
        for link in &group.links {
            let path = layout.archive_path(link.index);
            let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            println!("    {:<18} {}", name, link.url.dimmed());
        }
    }
    println!();
    Ok(())
}
