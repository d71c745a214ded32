//! `cxr init-config`: write a default configuration file.

use anyhow::{Result, bail};
use colored::Colorize;
use cxr_core::CxrConfig;
use std::path::Path;

pub fn execute(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    CxrConfig::default().save_to_file(path)?;
    println!("{} {}", "Configuration written to".green(), path.display());
    Ok(())
}
