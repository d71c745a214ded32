use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::config::ConfigError;
use crate::error::{CoreError, CoreResult};

/// The two columns of the NIH `Data_Entry` table the pipeline reads.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Image Index")]
    image_index: String,
    #[serde(rename = "Finding Labels")]
    finding_labels: String,
}

/// One image of the metadata table.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    /// Image file name, matched against extracted files by name only.
    pub image_index: String,
    /// Raw pipe-delimited label string; empty when the image has no finding.
    pub finding_labels: String,
    /// `finding_labels` split on `|`, without empty entries.
    pub labels: Vec<String>,
    /// Multi-hot vector over the vocabulary's feature labels; empty until encoded.
    pub disease_vec: Vec<f32>,
}

impl MetadataRecord {
    /// Builds a record, rewriting `no_finding` to the empty label string.
    pub fn new(image_index: impl Into<String>, finding_labels: &str, no_finding: &str) -> Self {
        let raw = finding_labels.trim();
        let finding_labels = if raw == no_finding { String::new() } else { raw.to_string() };
        let labels = finding_labels
            .split('|')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        Self { image_index: image_index.into(), finding_labels, labels, disease_vec: Vec::new() }
    }

    /// Stratification key: the first `prefix_len` characters of the raw label string.
    pub fn stratum(&self, prefix_len: usize) -> String {
        self.finding_labels.chars().take(prefix_len).collect()
    }
}

/// Loads the metadata CSV. Columns other than `Image Index` and `Finding Labels` are ignored.
pub fn load_metadata(path: &Path, no_finding: &str) -> CoreResult<Vec<MetadataRecord>> {
    if !path.is_file() {
        return Err(ConfigError::NotFound(path.display().to_string()).into());
    }

    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path)?;
    let mut records = Vec::new();
    for (line, row) in reader.deserialize::<RawRow>().enumerate() {
        let row = row?;
        if row.image_index.is_empty() {
            return Err(CoreError::Metadata(format!(
                "{}: row {} has an empty image index",
                path.display(),
                line + 2
            )));
        }
        records.push(MetadataRecord::new(row.image_index, &row.finding_labels, no_finding));
    }

    info!(path = %path.display(), rows = records.len(), "metadata loaded");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_no_finding_becomes_empty() {
        let record = MetadataRecord::new("00000001_000.png", "No Finding", "No Finding");
        assert_eq!(record.finding_labels, "");
        assert!(record.labels.is_empty());
        assert_eq!(record.stratum(4), "");
    }

    #[test]
    fn test_labels_split_on_pipe() {
        let record = MetadataRecord::new("a.png", "Cardiomegaly|Effusion", "No Finding");
        assert_eq!(record.labels, vec!["Cardiomegaly", "Effusion"]);
        assert_eq!(record.stratum(4), "Card");
    }

    #[test]
    fn test_load_metadata_reads_needed_columns() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Data_Entry.csv");
        std::fs::write(
            &path,
            "Image Index,Finding Labels,Follow-up #,Patient ID\n\
             00000001_000.png,Cardiomegaly,0,1\n\
             00000001_001.png,Cardiomegaly|Emphysema,1,1\n\
             00000002_000.png,No Finding,0,2\n",
        )
        .unwrap();

        let records = load_metadata(&path, "No Finding").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].labels, vec!["Cardiomegaly", "Emphysema"]);
        assert!(records[2].labels.is_empty());
    }

    #[test]
    fn test_missing_metadata_is_config_error() {
        let temp = TempDir::new().unwrap();
        let err = load_metadata(&temp.path().join("none.csv"), "No Finding").unwrap_err();
        assert!(matches!(err, CoreError::Config(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_missing_column_is_csv_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.csv");
        std::fs::write(&path, "Image Index,Patient ID\na.png,1\n").unwrap();

        assert!(matches!(load_metadata(&path, "No Finding"), Err(CoreError::Csv(_))));
    }
}
