use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::MetadataRecord;
use crate::error::{CoreError, CoreResult};

/// Ordered, frequency-ranked label set with the empty label at index 0.
///
/// Feature columns are every label except the empty one, in vocabulary order.
/// That order fixes the class indices of every generator for the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelVocabulary {
    labels: Vec<String>,
}

impl LabelVocabulary {
    /// Wraps an explicit label list. The first entry must be the empty label.
    pub fn new(labels: Vec<String>) -> CoreResult<Self> {
        match labels.first() {
            Some(first) if first.is_empty() => {}
            _ => {
                return Err(CoreError::Metadata(
                    "label vocabulary must start with the empty label".to_string(),
                ));
            }
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = labels.iter().find(|l| !seen.insert(l.as_str())) {
            return Err(CoreError::Metadata(format!("duplicate label in vocabulary: {dup:?}")));
        }
        Ok(Self { labels })
    }

    /// Ranks labels by descending frequency; ties keep first-seen order.
    pub fn from_records(records: &[MetadataRecord]) -> Self {
        let mut counts: HashMap<&str, (usize, usize)> = HashMap::new();
        let mut next_seen = 0;

        for label in records.iter().flat_map(|r| r.labels.iter()) {
            let entry = counts.entry(label.as_str()).or_insert_with(|| {
                next_seen += 1;
                (0, next_seen)
            });
            entry.0 += 1;
        }

        // (label, (count, first_seen))
        let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));

        let mut labels = Vec::with_capacity(ranked.len() + 1);
        labels.push(String::new());
        labels.extend(ranked.into_iter().map(|(label, _)| label.to_string()));
        Self { labels }
    }

    /// Every label, empty label first.
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Output columns of the model, in order.
    pub fn feature_labels(&self) -> &[String] {
        &self.labels[1..]
    }

    /// `|V| - 1`.
    pub fn feature_len(&self) -> usize {
        self.labels.len() - 1
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Never true; the empty label is always present.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Feature column of `label`, if it is a known non-empty label.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        if label.is_empty() {
            return None;
        }
        self.feature_labels().iter().position(|l| l == label)
    }

    /// Multi-hot vector of length `feature_len()`. Unknown labels are ignored.
    pub fn encode<S: AsRef<str>>(&self, labels: &[S]) -> Vec<f32> {
        let mut vec = vec![0.0; self.feature_len()];
        for label in labels {
            if let Some(i) = self.index_of(label.as_ref()) {
                vec[i] = 1.0;
            }
        }
        vec
    }

    /// Fills `disease_vec` on every record.
    pub fn encode_records(&self, records: &mut [MetadataRecord]) {
        for record in records {
            record.disease_vec = self.encode(&record.labels);
        }
    }
}
