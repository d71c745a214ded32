use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{CoreError, CoreResult};

/// One archive link and its 0-based position in the full link list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveLink {
    pub index: usize,
    pub url: String,
}

/// Archives fetched together before one training increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchGroup {
    /// 1-based batch number.
    pub ordinal: usize,
    pub links: Vec<ArchiveLink>,
}

/// Ordered archive links cut into consecutive groups of `group_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    links: Vec<String>,
    group_size: usize,
}

impl BatchPlan {
    pub fn new(links: Vec<String>, group_size: usize) -> CoreResult<Self> {
        if group_size == 0 {
            return Err(CoreError::Config(crate::config::ConfigError::InvalidValue(
                "archives per batch must be >= 1".to_string(),
            )));
        }
        Ok(Self { links, group_size })
    }

    pub fn links(&self) -> &[String] {
        &self.links
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn len(&self) -> usize {
        self.links.len().div_ceil(self.group_size)
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Groups in rotation order. The last group may be short.
    pub fn groups(&self) -> Vec<BatchGroup> {
        self.links
            .chunks(self.group_size)
            .enumerate()
            .map(|(i, chunk)| BatchGroup {
                ordinal: i + 1,
                links: chunk
                    .iter()
                    .enumerate()
                    .map(|(j, url)| ArchiveLink { index: i * self.group_size + j, url: url.clone() })
                    .collect(),
            })
            .collect()
    }

    /// SHA-256 over the group size and every link; identifies the plan across restarts.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.group_size.to_le_bytes());
        for link in &self.links {
            hasher.update(link.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}
