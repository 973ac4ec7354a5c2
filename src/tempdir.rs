//! Scoped temporary directories
//!
//! A unit owns one base directory, created on first use, and hands out
//! numbered subdirectories (`000`, `001`, ...) inside it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::TempDirConfig;
use crate::error::{Result, UnitError};

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Create a fresh base directory under the configured root
pub fn create_base(config: &TempDirConfig) -> Result<PathBuf> {
    let root = config.root.clone().unwrap_or_else(std::env::temp_dir);
    let dir = tempfile::Builder::new()
        .prefix(&config.prefix)
        .tempdir_in(&root)
        .map_err(|source| UnitError::TempDir {
            path: root.clone(),
            source,
        })?;
    let path = dir.keep();
    debug!(path = %path.display(), "created temp dir");
    Ok(path)
}

/// Whether a previously created base directory is still there
pub fn base_exists(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(UnitError::TempDir {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Create `<base>/<seq:03>`
pub fn create_subdir(base: &Path, seq: u32) -> Result<PathBuf> {
    let path = base.join(format!("{seq:03}"));
    fs::create_dir(&path).map_err(|source| UnitError::TempDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// Remove `path` recursively, retrying until `timeout` has passed
///
/// A path that is already gone counts as removed. On timeout the last error
/// seen is returned.
pub fn remove_all(path: &Path, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match fs::remove_dir_all(path) {
            Ok(()) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => break,
            Err(source) if Instant::now() >= deadline => {
                return Err(UnitError::RemoveTimeout {
                    path: path.to_path_buf(),
                    source,
                });
            }
            Err(_) => thread::sleep(RETRY_INTERVAL),
        }
    }
    debug!(path = %path.display(), "removed temp dir");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_in(root: &Path) -> TempDirConfig {
        TempDirConfig {
            root: Some(root.to_path_buf()),
            prefix: "tdtest-".to_string(),
            removal_timeout_ms: 100,
        }
    }

    #[test]
    fn test_base_and_numbered_subdirs() {
        let scratch = tempfile::tempdir().unwrap();
        let base = create_base(&config_in(scratch.path())).unwrap();

        assert!(base.starts_with(scratch.path()));
        assert!(base
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("tdtest-"));

        let first = create_subdir(&base, 0).unwrap();
        let second = create_subdir(&base, 1).unwrap();
        assert_eq!(first, base.join("000"));
        assert_eq!(second, base.join("001"));
        assert!(first.is_dir() && second.is_dir());

        // Same sequence number twice is an error
        assert!(matches!(
            create_subdir(&base, 1),
            Err(UnitError::TempDir { .. })
        ));
    }

    #[test]
    fn test_remove_all_and_exists() {
        let scratch = tempfile::tempdir().unwrap();
        let base = create_base(&config_in(scratch.path())).unwrap();
        create_subdir(&base, 0).unwrap();
        fs::write(base.join("000").join("file.txt"), b"data").unwrap();

        assert!(base_exists(&base).unwrap());
        remove_all(&base, Duration::from_millis(100)).unwrap();
        assert!(!base_exists(&base).unwrap());

        // Already gone is fine
        remove_all(&base, Duration::from_millis(100)).unwrap();
    }

    #[test]
    fn test_remove_all_times_out_with_last_error() {
        let scratch = tempfile::tempdir().unwrap();
        let file = scratch.path().join("plain-file");
        fs::write(&file, b"not a directory").unwrap();

        let timeout = Duration::from_millis(50);
        let started = Instant::now();
        let err = remove_all(&file, timeout).unwrap_err();

        assert!(started.elapsed() >= timeout);
        assert!(matches!(err, UnitError::RemoveTimeout { ref path, .. } if path == &file));
        assert!(err.to_string().starts_with("TempDir cleanup: "));
        assert!(file.exists());
    }
}
