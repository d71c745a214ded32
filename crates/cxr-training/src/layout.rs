use crate::error::{TrainingError, TrainingResult};
use std::path::{Component, Path, PathBuf};

/// Filesystem layout for one rotation run.
///
/// Default layout is rooted at a work directory:
/// `downloads/`, `extracted/`, `checkpoints/best_model.*`, `artifacts/final_model.*`
/// and `rotation_progress.json`.
#[derive(Debug, Clone)]
pub struct RunLayout {
    root: PathBuf,
    download_dir: PathBuf,
    extract_dir: PathBuf,
    checkpoint_stem: PathBuf,
    export_stem: PathBuf,
    ledger_path: PathBuf,
}

impl RunLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            download_dir: root.join("downloads"),
            extract_dir: root.join("extracted"),
            checkpoint_stem: root.join("checkpoints").join("best_model"),
            export_stem: root.join("artifacts").join("final_model"),
            ledger_path: root.join("rotation_progress.json"),
            root,
        }
    }

    #[must_use]
    pub fn with_download_dir(mut self, dir: PathBuf) -> Self {
        self.download_dir = dir;
        self
    }

    #[must_use]
    pub fn with_extract_dir(mut self, dir: PathBuf) -> Self {
        self.extract_dir = dir;
        self
    }

    #[must_use]
    pub fn with_checkpoint_stem(mut self, stem: PathBuf) -> Self {
        self.checkpoint_stem = stem;
        self
    }

    #[must_use]
    pub fn with_export_stem(mut self, stem: PathBuf) -> Self {
        self.export_stem = stem;
        self
    }

    #[must_use]
    pub fn with_ledger_path(mut self, path: PathBuf) -> Self {
        self.ledger_path = path;
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Shared extraction directory, recreated for every batch.
    #[must_use]
    pub fn extract_dir(&self) -> &Path {
        &self.extract_dir
    }

    /// Local archive path for the link at `link_index` (0-based) of the full link list.
    #[must_use]
    pub fn archive_path(&self, link_index: usize) -> PathBuf {
        self.download_dir.join(format!("images_{:02}.tar.gz", link_index + 1))
    }

    /// Rolling checkpoint stem; backends append their own record extension.
    #[must_use]
    pub fn checkpoint_stem(&self) -> &Path {
        &self.checkpoint_stem
    }

    #[must_use]
    pub fn checkpoint_state_path(&self) -> PathBuf {
        self.checkpoint_stem.with_extension("state.json")
    }

    /// Weights as of the last finished increment, used to resume a run.
    #[must_use]
    pub fn resume_stem(&self) -> PathBuf {
        let name = self.checkpoint_stem.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        self.checkpoint_stem.with_file_name(format!("{name}_latest"))
    }

    #[must_use]
    pub fn resume_state_path(&self) -> PathBuf {
        self.resume_stem().with_extension("state.json")
    }

    #[must_use]
    pub fn export_stem(&self) -> &Path {
        &self.export_stem
    }

    #[must_use]
    pub fn export_manifest_path(&self) -> PathBuf {
        self.export_stem
            .parent()
            .map_or_else(|| PathBuf::from("export_manifest.json"), |p| p.join("export_manifest.json"))
    }

    #[must_use]
    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    /// Rejects layouts where wiping the extraction directory would take other run
    /// files with it.
    ///
    /// The extraction directory may not contain the work directory, may not overlap
    /// the download directory, and may not hold checkpoints, exports or the ledger.
    pub fn check_disjoint(&self) -> TrainingResult<()> {
        let extract = normalize(&self.extract_dir)?;
        let overlap = |what: &str, path: &Path| {
            Err(TrainingError::InvalidSpec(format!(
                "extraction directory {} is wiped every batch and would remove {what} at {}",
                self.extract_dir.display(),
                path.display()
            )))
        };

        if normalize(&self.root)?.starts_with(&extract) {
            return overlap("the work directory", &self.root);
        }
        let download = normalize(&self.download_dir)?;
        if download.starts_with(&extract) || extract.starts_with(&download) {
            return overlap("the download directory", &self.download_dir);
        }

        let files = [
            ("the checkpoint", self.checkpoint_stem.clone()),
            ("the checkpoint state", self.checkpoint_state_path()),
            ("the resume snapshot", self.resume_stem()),
            ("the final export", self.export_stem.clone()),
            ("the export manifest", self.export_manifest_path()),
            ("the progress ledger", self.ledger_path.clone()),
        ];
        for (what, path) in &files {
            if normalize(path)?.starts_with(&extract) {
                return overlap(what, path);
            }
        }
        Ok(())
    }

    /// Creates the long-lived directories. The extraction directory is managed per batch.
    pub fn ensure_dirs(&self) -> TrainingResult<()> {
        self.check_disjoint()?;
        std::fs::create_dir_all(&self.download_dir)?;
        for path in [&self.checkpoint_stem, &self.export_stem, &self.ledger_path] {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        Ok(())
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
fn normalize(path: &Path) -> TrainingResult<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}
