//! `cxr labels`: frequency-ranked vocabulary of a metadata table.

use anyhow::{Context, Result};
use colored::Colorize;
use cxr_core::LabelVocabulary;
use cxr_core::metadata::load_metadata;
use serde_json::json;
use std::collections::HashMap;
use std::path::Path;

pub fn execute(metadata: &Path, no_finding: &str, json_output: bool) -> Result<()> {
    let records = load_metadata(metadata, no_finding)
        .with_context(|| format!("failed to load metadata {}", metadata.display()))?;
    let vocabulary = LabelVocabulary::from_records(&records);

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in &records {
        if record.labels.is_empty() {
            *counts.entry("").or_default() += 1;
        }
        for label in &record.labels {
            *counts.entry(label.as_str()).or_default() += 1;
        }
    }

    if json_output {
        let labels: Vec<_> = vocabulary
            .labels()
            .iter()
            .enumerate()
            .map(|(index, label)| {
                json!({
                    "index": index,
                    "label": label,
                    "images": counts.get(label.as_str()).copied().unwrap_or(0),
                })
            })
            .collect();
        let out = json!({ "rows": records.len(), "feature_len": vocabulary.feature_len(), "labels": labels });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "{}",
        format!("{} labels over {} images", vocabulary.feature_len(), records.len()).bold().cyan()
    );
    println!();
    println!("  {:<5} {:<24} {}", "Index", "Label", "Images");
    println!("  {}", "─".repeat(40));
    for (index, label) in vocabulary.labels().iter().enumerate() {
        let count = counts.get(label.as_str()).copied().unwrap_or(0);
        let shown = if label.is_empty() { format!("({no_finding})").dimmed().to_string() } else { label.clone() };
        println!("  {:<5} {:<24} {}", index, shown, count);
    }
    println!();
    Ok(())
}
