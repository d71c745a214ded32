//! Run configuration.
//!
//! One TOML file drives a rotation run. Every section is optional; missing
//! keys fall back to the defaults of the NIH ChestX-ray14 setup.

use cxr_training::{RunLayout, TrainingHyperParams};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::generator::AugmentationConfig;
use crate::storage::RetryPolicy;

/// The twelve `images_NN.tar.gz` archives of the NIH ChestX-ray14 release.
pub const NIH_ARCHIVE_LINKS: [&str; 12] = [
    "https://nihcc.box.com/shared/static/vfk49d74nhbxq3nqjg0900w5nvkorp5c.gz",
    "https://nihcc.box.com/shared/static/i28rlmbvmfjbl8p2n3ril0pptcmcu9d1.gz",
    "https://nihcc.box.com/shared/static/f1t00wrtdk94satdfb9olcolqx20z2jp.gz",
    "https://nihcc.box.com/shared/static/0aowwzs5lhjrceb3qp67ahp0rd1l1etg.gz",
    "https://nihcc.box.com/shared/static/v5e3goj22zr6h8tzualxfsqlqaygfbsn.gz",
    "https://nihcc.box.com/shared/static/asi7ikud9jwnkrnkj99jnpfkjdes7l6l.gz",
    "https://nihcc.box.com/shared/static/jn1b4mw4n6lnh74ovmcjb8y48h8xj07n.gz",
    "https://nihcc.box.com/shared/static/tvpxmn7qyrgl0w8wfh9kqfjskv6nmm1j.gz",
    "https://nihcc.box.com/shared/static/upyy3ml7qdumlgk2rfcvlb9k6gvqq2pj.gz",
    "https://nihcc.box.com/shared/static/l6nilvfa9cg3s28tqv1qc1olm3gnz54p.gz",
    "https://nihcc.box.com/shared/static/hhq8fkdgvcari67vfhs7ppg2w6ni4jze.gz",
    "https://nihcc.box.com/shared/static/ioqwiy20ihqwyr8pf4c24eazhh281pbu.gz",
];

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// What the orchestrator does when one batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole run on the first failing batch.
    #[default]
    FailFast,
    /// Log the failure, clean up, and continue with the next batch.
    SkipBatch,
}

impl std::str::FromStr for FailurePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "skip_batch" | "skip" => Ok(Self::SkipBatch),
            other => Err(ConfigError::InvalidValue(format!("unknown failure policy: {other}"))),
        }
    }
}

/// Metadata table and partitioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub metadata_path: PathBuf,
    /// Weighted down-sampling of the table before splitting; `0` keeps every row.
    pub sample_size: usize,
    pub test_fraction: f64,
    pub split_seed: u64,
    /// Number of leading characters of the raw label string used as the stratum key.
    pub stratify_prefix: usize,
    /// Raw label value meaning "no finding"; rewritten to the empty label.
    pub no_finding_label: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("dataset").join("Data_Entry_2017_v2020.csv"),
            sample_size: 40_000,
            test_fraction: 0.25,
            split_seed: 42,
            stratify_prefix: 4,
            no_finding_label: "No Finding".to_string(),
        }
    }
}

/// Image streams fed to the trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
    pub batch_size: usize,
    /// Multiplier applied to raw 0..=255 intensities.
    pub rescale: Option<f32>,
    /// Apply the random augmentation to the validation stream as well.
    pub augment_validation: bool,
    pub augmentation: AugmentationConfig,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: 128,
            height: 128,
            batch_size: 32,
            rescale: None,
            augment_validation: true,
            augmentation: AugmentationConfig::default(),
        }
    }
}

/// Per-increment fit settings and network width.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub patience: usize,
    pub learning_rate: f64,
    pub seed: u64,
    pub base_filters: usize,
    pub hidden_units: usize,
    pub dropout: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            patience: 5,
            learning_rate: 1e-3,
            seed: 42,
            base_filters: 16,
            hidden_units: 140,
            dropout: 0.3,
        }
    }
}

impl TrainingConfig {
    #[must_use]
    pub fn hyperparams(&self) -> TrainingHyperParams {
        TrainingHyperParams {
            seed: self.seed,
            epochs: self.epochs,
            learning_rate: self.learning_rate,
            patience: self.patience,
        }
    }
}

/// Archive download behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Upper bound on one archive download, in seconds.
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Archives of one batch fetched in parallel.
    pub concurrency: usize,
    pub show_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3600,
            max_retries: 2,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            concurrency: 2,
            show_progress: true,
        }
    }
}

impl DownloadConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            2.0,
        )
    }
}

/// Batch rotation over the archive links.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub links: Vec<String>,
    /// Archives fetched together before one training increment.
    pub archives_per_batch: usize,
    pub failure_policy: FailurePolicy,
    /// Skip batches recorded as completed by a previous run with the same plan.
    pub resume: bool,
    pub download: DownloadConfig,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            links: NIH_ARCHIVE_LINKS.iter().map(|s| (*s).to_string()).collect(),
            archives_per_batch: 1,
            failure_policy: FailurePolicy::FailFast,
            resume: false,
            download: DownloadConfig::default(),
        }
    }
}

/// Filesystem locations. Unset entries default to paths under `work_dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub work_dir: PathBuf,
    pub download_dir: Option<PathBuf>,
    pub extract_dir: Option<PathBuf>,
    /// Checkpoint stem; the weight record and `.state.json` sidecar live next to it.
    pub checkpoint: Option<PathBuf>,
    /// Final export stem.
    pub export: Option<PathBuf>,
    pub ledger: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            download_dir: None,
            extract_dir: Some(PathBuf::from("nih_images")),
            checkpoint: None,
            export: None,
            ledger: None,
        }
    }
}

impl PathsConfig {
    /// Resolves the run layout; relative overrides are taken relative to `work_dir`.
    #[must_use]
    pub fn layout(&self) -> RunLayout {
        let resolve = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.work_dir.join(p)
            }
        };

        let mut layout = RunLayout::new(self.work_dir.clone());
        if let Some(dir) = &self.download_dir {
            layout = layout.with_download_dir(resolve(dir));
        }
        if let Some(dir) = &self.extract_dir {
            layout = layout.with_extract_dir(resolve(dir));
        }
        if let Some(stem) = &self.checkpoint {
            layout = layout.with_checkpoint_stem(resolve(stem));
        }
        if let Some(stem) = &self.export {
            layout = layout.with_export_stem(resolve(stem));
        }
        if let Some(path) = &self.ledger {
            layout = layout.with_ledger_path(resolve(path));
        }
        layout
    }
}

/// Root configuration for a rotation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CxrConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
    #[serde(default)]
    pub paths: PathsConfig,
}

impl CxrConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ConfigError::ReadError(format!("Failed to create directory: {}", e))
                })?;
            }
        }

        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |msg: &str| Err(ConfigError::InvalidValue(msg.to_string()));

        if !(self.data.test_fraction > 0.0 && self.data.test_fraction < 1.0) {
            return invalid("data.test_fraction must be in (0, 1)");
        }
        if self.data.stratify_prefix == 0 {
            return invalid("data.stratify_prefix must be >= 1");
        }
        if self.images.width == 0 || self.images.height == 0 {
            return invalid("images.width and images.height must be >= 1");
        }
        if self.images.batch_size == 0 {
            return invalid("images.batch_size must be >= 1");
        }
        if self.images.rescale.is_some_and(|r| !r.is_finite() || r <= 0.0) {
            return invalid("images.rescale must be a positive number");
        }
        self.images.augmentation.validate()?;
        self.training
            .hyperparams()
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        if self.training.base_filters == 0 || self.training.hidden_units == 0 {
            return invalid("training.base_filters and training.hidden_units must be >= 1");
        }
        if !(0.0..1.0).contains(&self.training.dropout) {
            return invalid("training.dropout must be in [0, 1)");
        }
        if self.rotation.links.is_empty() {
            return invalid("rotation.links must not be empty");
        }
        if self.rotation.links.iter().any(|l| l.trim().is_empty()) {
            return invalid("rotation.links must not contain empty entries");
        }
        if self.rotation.archives_per_batch == 0 {
            return invalid("rotation.archives_per_batch must be >= 1");
        }
        if self.rotation.download.concurrency == 0 {
            return invalid("rotation.download.concurrency must be >= 1");
        }
        if self.rotation.download.timeout_secs == 0 {
            return invalid("rotation.download.timeout_secs must be >= 1");
        }
        self.paths
            .layout()
            .check_disjoint()
            .map_err(|e| ConfigError::InvalidValue(format!("paths: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = CxrConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rotation.links.len(), 12);
        assert_eq!(config.images.width, 128);
        assert_eq!(config.rotation.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml = r#"
            [rotation]
            archives_per_batch = 3
            failure_policy = "skip_batch"

            [training]
            epochs = 2
        "#;
        let config: CxrConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.rotation.archives_per_batch, 3);
        assert_eq!(config.rotation.failure_policy, FailurePolicy::SkipBatch);
        assert_eq!(config.rotation.links.len(), 12);
        assert_eq!(config.training.epochs, 2);
        assert_eq!(config.training.patience, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = CxrConfig::load_from_file(&temp.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_save_and_load_roundtrip_preserves_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cxr.toml");

        let mut config = CxrConfig::default();
        config.rotation.links = vec!["http://localhost/a.tar.gz".to_string()];
        config.data.sample_size = 0;
        config.save_to_file(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("sample_size = 0"));

        let loaded = CxrConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.rotation.links, config.rotation.links);
        assert_eq!(loaded.data.sample_size, 0);
    }

    #[test]
    fn test_sample_size_zero_disables_down_sampling_from_toml() {
        let config: CxrConfig = toml::from_str("[data]\nsample_size = 0\n").unwrap();
        assert_eq!(config.data.sample_size, 0);
        assert!(config.validate().is_ok());

        let config: CxrConfig = toml::from_str("[data]\ntest_fraction = 0.2\n").unwrap();
        assert_eq!(config.data.sample_size, 40_000);
    }

    #[test]
    fn test_validate_rejects_extract_dir_over_work_dir() {
        let temp = TempDir::new().unwrap();
        let mut config = CxrConfig::default();
        config.paths.work_dir = temp.path().to_path_buf();
        assert!(config.validate().is_ok());

        config.paths.extract_dir = Some(PathBuf::from("."));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(ref msg) if msg.contains("work directory")));

        config.paths.extract_dir = Some(PathBuf::from("checkpoints"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = CxrConfig::default();
        config.data.test_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = CxrConfig::default();
        config.rotation.links.clear();
        assert!(config.validate().is_err());

        let mut config = CxrConfig::default();
        config.rotation.archives_per_batch = 0;
        assert!(config.validate().is_err());

        let mut config = CxrConfig::default();
        config.training.learning_rate = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("fail-fast".parse::<FailurePolicy>().unwrap(), FailurePolicy::FailFast);
        assert_eq!("skip".parse::<FailurePolicy>().unwrap(), FailurePolicy::SkipBatch);
        assert!("retry-forever".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn test_layout_resolves_relative_overrides() {
        let paths = PathsConfig {
            work_dir: PathBuf::from("/data/run"),
            checkpoint: Some(PathBuf::from("ckpt/model")),
            ..Default::default()
        };
        let layout = paths.layout();
        assert_eq!(layout.extract_dir(), Path::new("/data/run/nih_images"));
        assert_eq!(layout.checkpoint_stem(), Path::new("/data/run/ckpt/model"));
    }
}
