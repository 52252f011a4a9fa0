//! File placement for promotion
//!
//! Files are copied, never renamed across volumes, into their live names. A
//! previous live file is first renamed to `{name}.bak`. Everything done is
//! recorded in a [`FileRollback`] so the caller can undo it if the store
//! commit fails, or finish it once the commit succeeds.

use crate::error::EngineResult;
use crate::paths::backup_path;
use async_trait::async_trait;
use pubflow_types::{ContentItem, ContentRelatedFile};
use std::io;
use std::path::{Path, PathBuf};

/// Releases preview licenses held against a live file about to be replaced
#[async_trait]
pub trait PreviewLicenseReclaimer: Send + Sync {
    async fn reclaim(&self, item: &ContentItem, previous: &ContentRelatedFile) -> EngineResult<()>;
}

/// Reclaimer for deployments without a preview license service
#[derive(Debug, Default)]
pub struct NoopLicenseReclaimer;

#[async_trait]
impl PreviewLicenseReclaimer for NoopLicenseReclaimer {
    async fn reclaim(&self, _item: &ContentItem, _previous: &ContentRelatedFile) -> EngineResult<()> {
        Ok(())
    }
}

/// A live file moved aside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub live: PathBuf,
    pub backup: PathBuf,
}

/// Record of file changes made by one promotion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileRollback {
    /// Live files renamed to `.bak`, in order
    pub backups: Vec<Backup>,
    /// Live names that had no previous file
    pub placed: Vec<PathBuf>,
    /// Removed once the promotion is committed
    pub deferred_deletions: Vec<PathBuf>,
}

impl FileRollback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `source` to `live`, backing up whatever was there
    pub async fn place(&mut self, source: &Path, live: &Path) -> io::Result<()> {
        if let Some(parent) = live.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        if tokio::fs::try_exists(live).await? {
            let backup = backup_path(live);
            remove_if_present(&backup).await?;
            tokio::fs::rename(live, &backup).await?;
            self.backups.push(Backup {
                live: live.to_path_buf(),
                backup: backup.clone(),
            });
            self.deferred_deletions.push(backup);
        } else {
            self.placed.push(live.to_path_buf());
        }

        tokio::fs::copy(source, live).await?;
        self.deferred_deletions.push(source.to_path_buf());
        Ok(())
    }

    /// Undo every placement: restore backups and remove new files.
    /// Returns the number of steps that failed.
    pub async fn rollback(self) -> usize {
        let mut failures = 0;

        for live in self.placed.iter().rev() {
            if let Err(e) = remove_if_present(live).await {
                tracing::error!(path = %live.display(), error = %e, "Rollback could not remove file");
                failures += 1;
            }
        }
        for Backup { live, backup } in self.backups.iter().rev() {
            if let Err(e) = tokio::fs::rename(backup, live).await {
                tracing::error!(
                    backup = %backup.display(),
                    live = %live.display(),
                    error = %e,
                    "Rollback could not restore backup"
                );
                failures += 1;
            }
        }

        failures
    }

    /// Delete staged sources and backups once the commit is durable.
    /// Files already gone are ignored.
    pub async fn finish(self) -> usize {
        let mut failures = 0;
        for path in &self.deferred_deletions {
            if let Err(e) = remove_if_present(path).await {
                tracing::warn!(path = %path.display(), error = %e, "Deferred delete failed");
                failures += 1;
            }
        }
        failures
    }
}

pub(crate) async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Remove a working directory, tolerating one that is already gone
pub(crate) async fn remove_dir_if_present(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), error = %e, "Could not remove working directory");
        }
        _ => {}
    }
}
