use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::{debug, warn};

use super::StorageError;

/// Unpacks a gzip-compressed tar archive into `dest`, returning the number of regular files.
///
/// Entries that would land outside `dest` are skipped. `progress` ticks once per
/// unpacked entry.
pub fn extract_tar_gz(archive_path: &Path, dest: &Path, progress: &ProgressBar) -> Result<usize, StorageError> {
    std::fs::create_dir_all(dest).map_err(|e| StorageError::io(dest, e))?;

    let file = File::open(archive_path).map_err(|e| StorageError::io(archive_path, e))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let archive_err =
        |e: std::io::Error| StorageError::Archive { path: archive_path.to_path_buf(), message: e.to_string() };

    let mut files = 0;
    for entry in archive.entries().map_err(archive_err)? {
        let mut entry = entry.map_err(archive_err)?;
        let is_file = entry.header().entry_type().is_file();
        let unpacked = entry.unpack_in(dest).map_err(archive_err)?;
        if !unpacked {
            let path = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
            warn!(archive = %archive_path.display(), entry = %path, "skipped entry outside extraction dir");
            continue;
        }
        progress.inc(1);
        if is_file {
            files += 1;
        }
    }

    debug!(archive = %archive_path.display(), dest = %dest.display(), files, "archive extracted");
    Ok(files)
}

/// Extracts every archive into `dest` on the blocking pool.
pub async fn extract_archives(
    archives: Vec<PathBuf>,
    dest: PathBuf,
    show_progress: bool,
) -> Result<usize, StorageError> {
    tokio::task::spawn_blocking(move || {
        let mut total = 0;
        for archive in &archives {
            let progress = extraction_bar(archive, show_progress);
            let extracted = extract_tar_gz(archive, &dest, &progress);
            progress.finish_and_clear();
            total += extracted?;
        }
        Ok(total)
    })
    .await
    .map_err(|e| StorageError::Task(e.to_string()))?
}

/// Entry counter for one archive; the gzip stream has no known length up front.
fn extraction_bar(archive: &Path, show_progress: bool) -> ProgressBar {
    if !show_progress {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed_precise}] {pos} entries")
    {
        bar.set_style(style);
    }
    if let Some(name) = archive.file_name() {
        bar.set_message(format!("extracting {}", name.to_string_lossy()));
    }
    bar
}
