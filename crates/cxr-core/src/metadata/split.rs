//! Down-sampling and stratified train/test partitioning of the metadata table.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;

use super::MetadataRecord;

/// Weight floor for rows without any finding.
pub const NO_FINDING_WEIGHT: f64 = 0.04;

/// Train and test subsets, built once at startup and only ever filtered afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetPartition {
    pub train: Vec<MetadataRecord>,
    pub test: Vec<MetadataRecord>,
}

impl DatasetPartition {
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty() && self.test.is_empty()
    }
}

/// Sampling weight of one row: its number of findings plus a small floor.
pub fn sample_weight(record: &MetadataRecord) -> f64 {
    record.labels.len() as f64 + NO_FINDING_WEIGHT
}

/// Draws `n` rows without replacement, favouring rows with more findings.
///
/// Uses weighted reservoir keys (`ln(u) / w`). The selected rows keep their table order.
/// Returns every row when `n` is at least the table size.
pub fn weighted_sample(records: Vec<MetadataRecord>, n: usize, seed: u64) -> Vec<MetadataRecord> {
    if n >= records.len() {
        return records;
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut keyed: Vec<(f64, usize)> = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            // u in (0, 1] so ln(u) is finite
            let u: f64 = 1.0 - rng.r#gen::<f64>();
            (u.ln() / sample_weight(record), i)
        })
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut chosen: Vec<usize> = keyed.into_iter().take(n).map(|(_, i)| i).collect();
    chosen.sort_unstable();

    let mut slots: Vec<Option<MetadataRecord>> = records.into_iter().map(Some).collect();
    chosen.into_iter().filter_map(|i| slots[i].take()).collect()
}

/// Splits rows so each stratum (label-string prefix) keeps its share in both halves.
///
/// Every stratum contributes `round(len * test_fraction)` rows to the test side. The
/// outcome is fully determined by `seed`.
pub fn stratified_split(
    records: Vec<MetadataRecord>,
    test_fraction: f64,
    seed: u64,
    prefix_len: usize,
) -> DatasetPartition {
    let mut strata: BTreeMap<String, Vec<MetadataRecord>> = BTreeMap::new();
    for record in records {
        strata.entry(record.stratum(prefix_len)).or_default().push(record);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut partition = DatasetPartition::default();

    for (_, mut rows) in strata {
        rows.shuffle(&mut rng);
        let test_len = ((rows.len() as f64) * test_fraction).round() as usize;
        let train = rows.split_off(test_len.min(rows.len()));
        partition.test.extend(rows);
        partition.train.extend(train);
    }

    partition.train.shuffle(&mut rng);
    partition.test.shuffle(&mut rng);
    partition
}
