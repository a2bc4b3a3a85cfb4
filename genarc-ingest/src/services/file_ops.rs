//! Filesystem primitives shared by the pipeline and reconciliation
//!
//! Renames and deletions go through [`FileOps`] so a reconciliation pass can
//! be previewed: in dry-run mode the intended change is logged and nothing on
//! disk is touched.

use chrono::{DateTime, Utc};
use std::fs::FileTimes;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

/// Dry-run capable rename and delete
#[derive(Debug, Clone, Copy)]
pub struct FileOps {
    dry_run: bool,
}

impl FileOps {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Rename within `dir`. Same-name renames are no-ops and return false.
    pub async fn rename(&self, dir: &Path, old_name: &str, new_name: &str) -> std::io::Result<bool> {
        if old_name == new_name {
            return Ok(false);
        }
        if self.dry_run {
            info!(from = old_name, to = new_name, "rename (dry run)");
            return Ok(true);
        }
        tokio::fs::rename(dir.join(old_name), dir.join(new_name)).await?;
        info!(from = old_name, to = new_name, "Renamed");
        Ok(true)
    }

    pub async fn delete(&self, dir: &Path, name: &str) -> std::io::Result<()> {
        if self.dry_run {
            info!(file = name, "delete (dry run)");
            return Ok(());
        }
        tokio::fs::remove_file(dir.join(name)).await?;
        info!(file = name, "Deleted");
        Ok(())
    }
}

/// Set a file's access and modification times
pub async fn set_file_times(path: &Path, time: DateTime<Utc>) -> std::io::Result<()> {
    let path: PathBuf = path.to_path_buf();
    let stamp: SystemTime = time.into();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.set_times(FileTimes::new().set_accessed(stamp).set_modified(stamp))
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("Timestamp task panicked: {}", e)))?
}

/// Earlier of a file's modification and creation times
pub async fn file_created_at(path: &Path) -> Option<DateTime<Utc>> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    let modified = meta.modified().ok();
    let created = meta.created().ok();
    let earliest = match (modified, created) {
        (Some(m), Some(c)) => Some(m.min(c)),
        (m, c) => m.or(c),
    }?;
    Some(earliest.into())
}

/// Remove a partial download, ignoring a file that never appeared
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dry_run_leaves_files() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.png"), b"x").unwrap();
        let ops = FileOps::new(true);

        assert!(ops.rename(temp.path(), "a.png", "b.png").await.unwrap());
        ops.delete(temp.path(), "a.png").await.unwrap();

        assert!(temp.path().join("a.png").exists());
        assert!(!temp.path().join("b.png").exists());
    }

    #[tokio::test]
    async fn test_commit_renames_and_deletes() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("a.png"), b"x").unwrap();
        std::fs::write(temp.path().join("c.json"), b"{}").unwrap();
        let ops = FileOps::new(false);

        assert!(ops.rename(temp.path(), "a.png", "b.png").await.unwrap());
        assert!(!ops.rename(temp.path(), "b.png", "b.png").await.unwrap());
        ops.delete(temp.path(), "c.json").await.unwrap();

        assert!(temp.path().join("b.png").exists());
        assert!(!temp.path().join("c.json").exists());
    }

    #[tokio::test]
    async fn test_set_file_times() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a.json");
        std::fs::write(&path, b"{}").unwrap();
        let when = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();

        set_file_times(&path, when).await.unwrap();

        let modified: DateTime<Utc> = std::fs::metadata(&path).unwrap().modified().unwrap().into();
        assert_eq!(modified, when);
    }

    #[tokio::test]
    async fn test_remove_if_exists_tolerates_missing() {
        let temp = TempDir::new().unwrap();
        remove_if_exists(&temp.path().join("nope")).await.unwrap();
    }
}
