//! Durable writer - atomic whole-file replacement.
//!
//! A write goes to a sibling temp file, is synced, renamed over the target and
//! the parent directory entry is synced. Readers see the old file or the new
//! one, never a truncated mix.

use crate::errors::{Error, Result};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

const TEMP_SUFFIX: &str = ".tmp";

/// Atomically replaces `path` with `bytes`. Runs on the blocking pool.
#[instrument(skip(bytes), fields(len = bytes.len()))]
pub async fn write(path: PathBuf, bytes: Vec<u8>) -> Result<()> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || stage(&path, &bytes)?.commit())
        .await
        .map_err(|e| Error::WriteFailed {
            path: target,
            source: std::io::Error::other(e.to_string()),
        })?
}

/// A fully written and synced temp file that has not replaced its target yet.
#[derive(Debug)]
pub struct StagedWrite {
    temp: NamedTempFile,
    target: PathBuf,
}

/// First phase: write `bytes` to a synced temp file next to `path`.
pub fn stage(path: &Path, bytes: &[u8]) -> Result<StagedWrite> {
    let failed = |source| Error::WriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let dir = parent_dir(path);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut temp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(TEMP_SUFFIX)
        .tempfile_in(dir)
        .map_err(failed)?;

    temp.write_all(bytes).map_err(failed)?;
    temp.as_file().sync_all().map_err(failed)?;

    Ok(StagedWrite {
        temp,
        target: path.to_path_buf(),
    })
}

impl StagedWrite {
    /// Second phase: rename over the target and sync the directory entry.
    ///
    /// A failed rename removes the temp file and leaves the target untouched.
    /// Once the rename has happened the new content is what readers of the file
    /// see, so a failed directory sync is logged and the write still counts as
    /// committed.
    pub fn commit(self) -> Result<()> {
        self.commit_with(sync_dir)
    }

    fn commit_with<S>(self, sync: S) -> Result<()>
    where
        S: FnOnce(&Path) -> std::io::Result<()>,
    {
        let target = self.target;
        self.temp
            .persist(&target)
            .map_err(|e| Error::WriteFailed {
                path: target.clone(),
                source: e.error,
            })?;

        if let Err(e) = sync(parent_dir(&target)) {
            warn!(
                "Replaced {} but could not sync its directory: {}",
                target.display(),
                e
            );
        }

        debug!("Committed {}", target.display());
        Ok(())
    }

    /// Leaves the temp file on disk without renaming it, as a crash between
    /// the two phases would.
    #[cfg(test)]
    pub(crate) fn abandon(self) -> PathBuf {
        match self.temp.into_temp_path().keep() {
            Ok(path) => path,
            Err(e) => e.path.to_path_buf(),
        }
    }
}

/// Removes temp files left behind by an interrupted write.
pub fn sweep_orphans(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) && entry.file_type()?.is_file() {
            warn!("Removing orphaned temp file {}", entry.path().display());
            std::fs::remove_file(entry.path())?;
            removed += 1;
        }
    }

    Ok(removed)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

// Directory handles cannot be synced on this platform; the rename is already durable.
#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::test_utils::init_test_tracing;

    #[tokio::test]
    async fn test_write_replaces_file() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("economy.json");

        write(path.clone(), b"{\"a\": 1}".to_vec()).await.unwrap();
        write(path.clone(), b"{\"a\": 2}".to_vec()).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"{\"a\": 2}");
        assert_eq!(sweep_orphans(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_crash_before_rename_keeps_old_content() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("economy.json");
        std::fs::write(&path, b"{\"old\": true}").unwrap();

        let staged = stage(&path, b"{\"new\": true, \"padding\": \"....\"}").unwrap();
        let orphan = staged.abandon();

        assert!(orphan.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"old\": true}");

        // Recovery removes the orphan and leaves the target alone.
        assert_eq!(sweep_orphans(dir.path()).unwrap(), 1);
        assert!(!orphan.exists());
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"old\": true}");
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("economy.json");

        let err = write(path, b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, Error::WriteFailed { .. }));
    }

    #[test]
    fn test_directory_sync_failure_after_rename_still_commits() {
        init_test_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("economy.json");
        std::fs::write(&path, b"{\"old\": true}").unwrap();

        let staged = stage(&path, b"{\"new\": true}").unwrap();
        staged
            .commit_with(|_| Err(std::io::Error::other("fsync refused")))
            .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"{\"new\": true}");
        assert_eq!(sweep_orphans(dir.path()).unwrap(), 0);
    }

    #[test]
    fn test_sweep_ignores_regular_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("xp.json"), b"{}").unwrap();
        std::fs::write(dir.path().join("notes.tmp"), b"keep").unwrap();

        assert_eq!(sweep_orphans(dir.path()).unwrap(), 0);
        assert!(dir.path().join("notes.tmp").exists());
    }
}
