use std::path::PathBuf;
use tracing::{debug, warn};

use super::StorageError;

/// Removes every path (files or directory trees), tolerating ones that are already gone.
///
/// All paths are attempted even if one fails; the first failure is returned.
pub fn cleanup_paths(paths: &[PathBuf]) -> Result<(), StorageError> {
    let mut first_error = None;

    for path in paths {
        let result = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
            Ok(_) => std::fs::remove_file(path),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => debug!(path = %path.display(), "removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cleanup failed");
                if first_error.is_none() {
                    first_error = Some(StorageError::io(path.clone(), e));
                }
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_removes_files_and_trees() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("images_01.tar.gz");
        let dir = temp.path().join("nih_images");
        std::fs::write(&file, b"x").unwrap();
        std::fs::create_dir_all(dir.join("images")).unwrap();
        std::fs::write(dir.join("images").join("a.png"), b"x").unwrap();

        cleanup_paths(&[file.clone(), dir.clone()]).unwrap();

        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_missing_paths_are_ok() {
        let temp = TempDir::new().unwrap();
        let result = cleanup_paths(&[temp.path().join("never-downloaded.tar.gz")]);
        assert!(result.is_ok());
    }
}
