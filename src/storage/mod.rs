use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;

const CROP_TEMP_PREFIX: &str = "crop_";
const CROP_TEMP_SUFFIX: &str = ".png";
const APP_TEMP_SUBDIR: &str = "itt-qwen";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Default, Clone)]
pub struct PruneReport {
    pub removed_files: usize,
}

/// Owns the transient crop files produced for model requests.
///
/// Files are tracked from allocation until [`TempImageStore::cleanup`];
/// deletion is best-effort and failures are only logged.
#[derive(Debug)]
pub struct TempImageStore {
    temp_dir: PathBuf,
    tracked: Vec<PathBuf>,
}

impl TempImageStore {
    pub fn with_dir(temp_dir: PathBuf) -> Self {
        Self {
            temp_dir,
            tracked: Vec::new(),
        }
    }

    pub fn with_default_dir() -> StorageResult<Self> {
        let temp_dir = default_runtime_temp_dir();
        fs::create_dir_all(&temp_dir)?;
        Ok(Self::with_dir(temp_dir))
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.tracked
    }

    /// Creates a fresh, uniquely named crop file and returns its open handle.
    pub fn allocate(&self) -> StorageResult<(fs::File, PathBuf)> {
        fs::create_dir_all(&self.temp_dir)?;
        let file = tempfile::Builder::new()
            .prefix(CROP_TEMP_PREFIX)
            .suffix(CROP_TEMP_SUFFIX)
            .tempfile_in(&self.temp_dir)?;
        let (file, path) = file.keep().map_err(|err| StorageError::Io(err.error))?;
        Ok((file, path))
    }

    pub fn track(&mut self, path: PathBuf) {
        tracing::debug!(path = %path.display(), "tracking temporary image");
        self.tracked.push(path);
    }

    /// Deletes every tracked file. Returns how many were actually removed.
    pub fn cleanup(&mut self) -> usize {
        let mut removed = 0;
        for path in self.tracked.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        ?err,
                        "failed to remove temporary image"
                    );
                }
            }
        }
        removed
    }

    /// Removes crop files left behind by earlier runs.
    pub fn prune_stale_temp_files(&self, max_age_hours: u64) -> StorageResult<PruneReport> {
        let now = SystemTime::now();
        let mut report = PruneReport::default();
        let max_age = Duration::from_secs(max_age_hours.saturating_mul(60 * 60));

        if !self.temp_dir.exists() {
            return Ok(report);
        }

        for entry in fs::read_dir(&self.temp_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            if path
                .file_name()
                .and_then(|name| name.to_str())
                .is_none_or(|name| !name.starts_with(CROP_TEMP_PREFIX))
            {
                continue;
            }

            if self.tracked.contains(&path) {
                continue;
            }

            let modified = fs::metadata(&path)?.modified()?;
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);

            if age > max_age {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        report.removed_files += 1;
                    }
                    Err(err) => {
                        tracing::warn!(
                            path = %path.display(),
                            ?err,
                            "failed to remove stale temporary image"
                        );
                    }
                }
            }
        }

        Ok(report)
    }
}

impl Drop for TempImageStore {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn default_runtime_temp_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_TEMP_SUBDIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_creates_unique_png_paths_in_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempImageStore::with_dir(dir.path().join("crops"));

        let (_, first) = store.allocate().unwrap();
        let (_, second) = store.allocate().unwrap();

        assert_ne!(first, second);
        for path in [&first, &second] {
            assert!(path.starts_with(dir.path().join("crops")));
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("crop_"));
            assert!(name.ends_with(".png"));
            assert!(path.exists());
        }
    }

    #[test]
    fn cleanup_removes_tracked_files_and_tolerates_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = TempImageStore::with_dir(dir.path().to_path_buf());

        let (_, kept) = store.allocate().unwrap();
        let (_, vanished) = store.allocate().unwrap();
        store.track(kept.clone());
        store.track(vanished.clone());
        fs::remove_file(&vanished).unwrap();

        assert_eq!(store.cleanup(), 1);
        assert!(!kept.exists());
        assert!(store.tracked().is_empty());
        assert_eq!(store.cleanup(), 0);
    }

    #[test]
    fn drop_cleans_up_tracked_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut store = TempImageStore::with_dir(dir.path().to_path_buf());
            let (_, path) = store.allocate().unwrap();
            store.track(path.clone());
            path
        };
        assert!(!path.exists());
    }

    #[test]
    fn prune_only_touches_old_crop_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempImageStore::with_dir(dir.path().to_path_buf());
        let (_, crop) = store.allocate().unwrap();
        let unrelated = dir.path().join("notes.txt");
        fs::write(&unrelated, "keep me").unwrap();

        let report = store.prune_stale_temp_files(1).unwrap();
        assert_eq!(report.removed_files, 0);
        assert!(crop.exists());

        let report = store.prune_stale_temp_files(0).unwrap();
        // mtime resolution can make a just-written file look zero seconds old
        assert!(report.removed_files <= 1);
        assert!(unrelated.exists());
    }

    #[test]
    fn prune_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = TempImageStore::with_dir(dir.path().join("absent"));
        let report = store.prune_stale_temp_files(24).unwrap();
        assert_eq!(report.removed_files, 0);
    }
}
