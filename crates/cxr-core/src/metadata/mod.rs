//! Metadata Transformer: label table → vocabulary and stratified partitions.

mod record;
mod split;
mod vocabulary;

pub use record::{MetadataRecord, load_metadata};
pub use split::{DatasetPartition, NO_FINDING_WEIGHT, sample_weight, stratified_split, weighted_sample};
pub use vocabulary::LabelVocabulary;

use tracing::info;

use crate::config::DataConfig;
use crate::error::{CoreError, CoreResult};

/// Startup pipeline over the metadata table. Runs once per process.
#[derive(Debug, Clone)]
pub struct MetadataTransformer {
    config: DataConfig,
}

impl MetadataTransformer {
    pub fn new(config: DataConfig) -> Self {
        Self { config }
    }

    /// Load, rank labels, optionally down-sample, encode, then split.
    ///
    /// The vocabulary is ranked over the full table, before sampling.
    pub fn process(&self) -> CoreResult<(DatasetPartition, LabelVocabulary)> {
        let records = load_metadata(&self.config.metadata_path, &self.config.no_finding_label)?;
        self.process_records(records)
    }

    pub fn process_records(
        &self,
        records: Vec<MetadataRecord>,
    ) -> CoreResult<(DatasetPartition, LabelVocabulary)> {
        if records.is_empty() {
            return Err(CoreError::Metadata(format!(
                "{} contains no rows",
                self.config.metadata_path.display()
            )));
        }

        let vocabulary = LabelVocabulary::from_records(&records);
        info!(
            labels = vocabulary.feature_len(),
            vocabulary = ?vocabulary.feature_labels(),
            "label vocabulary ranked"
        );

        let total = records.len();
        let mut records = match self.config.sample_size {
            0 => records,
            n => weighted_sample(records, n, self.config.split_seed),
        };
        vocabulary.encode_records(&mut records);

        let partition = stratified_split(
            records,
            self.config.test_fraction,
            self.config.split_seed,
            self.config.stratify_prefix,
        );
        info!(
            rows = total,
            train = partition.train.len(),
            test = partition.test.len(),
            "metadata partitioned"
        );
        Ok((partition, vocabulary))
    }
}
