//! Subcommand implementations.

pub mod init;
pub mod labels;
pub mod plan;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use cxr_core::CxrConfig;
use std::path::Path;

pub(crate) fn load_config(path: &Path) -> Result<CxrConfig> {
    CxrConfig::load_from_file(path).with_context(|| format!("failed to load configuration {}", path.display()))
}
