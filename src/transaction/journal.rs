//! Staging, promotion, and rollback of destination files.
//!
//! The journal remembers every filesystem change a transaction makes so it
//! can undo them in reverse order. Dropping an unfinished journal rolls it
//! back, which also covers unwinding out of a commit.

use super::report::ReportedError;
use crate::durable;
use crate::error::{Result, SyncError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Fault-injection points in the commit sequence.
///
/// Returning an error aborts the commit at that point and triggers a full
/// rollback.
pub trait CommitHook: Send + Sync {
    /// Called before the `index`-th staged entry is promoted.
    fn before_promote(&self, _index: usize, _destination: &Path) -> io::Result<()> {
        Ok(())
    }

    /// Called after all promotions, before the registry is saved.
    fn before_registry_save(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Hook that never interferes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl CommitHook for NoopHook {}

#[derive(Debug)]
enum Staged {
    /// Content synced to `temp`, waiting to be renamed onto `destination`.
    Write { destination: PathBuf, temp: PathBuf },
    /// `destination` will be moved aside.
    Remove { destination: PathBuf },
}

impl Staged {
    fn destination(&self) -> &Path {
        match self {
            Self::Write { destination, .. } | Self::Remove { destination } => destination,
        }
    }
}

#[derive(Debug)]
struct Promoted {
    destination: PathBuf,
    /// Pre-commit content; `None` when the destination did not exist.
    backup: Option<PathBuf>,
}

pub(crate) struct Journal<'h> {
    hook: &'h dyn CommitHook,
    staged: Vec<Staged>,
    promoted: Vec<Promoted>,
    created_dirs: Vec<PathBuf>,
    finished: bool,
}

fn exists_no_follow(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })
}

impl<'h> Journal<'h> {
    pub fn new(hook: &'h dyn CommitHook) -> Self {
        Self {
            hook,
            staged: Vec::new(),
            promoted: Vec::new(),
            created_dirs: Vec::new(),
            finished: false,
        }
    }

    /// Write `bytes` to a synced temp file beside `destination`.
    pub fn stage_write(&mut self, destination: &Path, bytes: &[u8]) -> Result<()> {
        let staging_err = |source| SyncError::StagingIo {
            path: destination.to_path_buf(),
            source,
        };
        let parent = parent_dir(destination).map_err(staging_err)?;
        let created = durable::create_dirs_tracked(parent).map_err(staging_err)?;
        self.created_dirs.extend(created);
        let temp = durable::stage_sibling(destination, bytes).map_err(staging_err)?;
        debug!(
            destination = %destination.display(),
            temp = %temp.display(),
            bytes = bytes.len(),
            "journal: staged"
        );
        self.staged.push(Staged::Write {
            destination: destination.to_path_buf(),
            temp,
        });
        Ok(())
    }

    /// Schedule `destination` for removal.
    pub fn stage_remove(&mut self, destination: &Path) {
        self.staged.push(Staged::Remove {
            destination: destination.to_path_buf(),
        });
    }

    /// Promote every staged entry in order.
    ///
    /// # Errors
    ///
    /// [`SyncError::CommitPartialFailure`] naming the entry that failed and
    /// how many were promoted before it. Already promoted entries stay
    /// recorded so [`Journal::rollback`] can restore them.
    pub fn promote_all(&mut self) -> Result<()> {
        for index in 0..self.staged.len() {
            let destination = self.staged[index].destination().to_path_buf();
            let partial = |source| SyncError::CommitPartialFailure {
                path: destination.clone(),
                promoted: index,
                source,
            };
            self.hook
                .before_promote(index, &destination)
                .map_err(partial)?;
            let temp = match &self.staged[index] {
                Staged::Write { temp, .. } => Some(temp.clone()),
                Staged::Remove { .. } => None,
            };
            match temp {
                Some(temp) => self.promote_write(&temp, &destination),
                None => self.promote_remove(&destination),
            }
            .map_err(partial)?;
        }
        info!(promoted = self.promoted.len(), "journal: all entries promoted");
        Ok(())
    }

    fn promote_write(&mut self, temp: &Path, destination: &Path) -> io::Result<()> {
        let backup = if exists_no_follow(destination) {
            Some(durable::backup_copy(destination)?)
        } else {
            None
        };
        if let Err(e) = std::fs::rename(temp, destination) {
            if let Some(backup) = &backup {
                let _ = std::fs::remove_file(backup);
            }
            return Err(e);
        }
        self.promoted.push(Promoted {
            destination: destination.to_path_buf(),
            backup,
        });
        debug!(destination = %destination.display(), "journal: promoted");
        durable::fsync_dir(parent_dir(destination)?)
    }

    fn promote_remove(&mut self, destination: &Path) -> io::Result<()> {
        let backup = durable::hidden_sibling(destination, "bak")?;
        std::fs::rename(destination, &backup)?;
        self.promoted.push(Promoted {
            destination: destination.to_path_buf(),
            backup: Some(backup),
        });
        debug!(destination = %destination.display(), "journal: removed");
        durable::fsync_dir(parent_dir(destination)?)
    }

    /// Discard backups and mark the journal complete.
    pub fn finish(mut self) {
        for promoted in &self.promoted {
            if let Some(backup) = &promoted.backup
                && let Err(e) = std::fs::remove_file(backup)
            {
                warn!(backup = %backup.display(), error = %e, "journal: cannot discard backup");
            }
        }
        self.finished = true;
    }

    /// Undo every promotion in reverse, then remove temps and created dirs.
    pub fn rollback(&mut self) -> Vec<ReportedError> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut errors = Vec::new();
        let mut record = |path: &Path, e: io::Error| {
            error!(path = %path.display(), error = %e, "journal: rollback step failed");
            errors.push(ReportedError::from(&SyncError::io(path, e)));
        };

        for promoted in self.promoted.drain(..).rev() {
            let result = match &promoted.backup {
                Some(backup) => std::fs::rename(backup, &promoted.destination),
                None => std::fs::remove_file(&promoted.destination),
            };
            match result {
                Ok(()) => {
                    if let Ok(parent) = parent_dir(&promoted.destination) {
                        let _ = durable::fsync_dir(parent);
                    }
                    debug!(destination = %promoted.destination.display(), "journal: restored");
                }
                Err(e) => record(&promoted.destination, e),
            }
        }

        for staged in self.staged.drain(..) {
            if let Staged::Write { temp, .. } = staged {
                match std::fs::remove_file(&temp) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => record(&temp, e),
                }
            }
        }

        for dir in self.created_dirs.drain(..).rev() {
            // A directory that still has content was not ours alone.
            let _ = std::fs::remove_dir(&dir);
        }

        if errors.is_empty() {
            info!("journal: rolled back");
        }
        errors
    }
}

impl Drop for Journal<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("journal: dropped before completion, rolling back");
            let _ = self.rollback();
        }
    }
}
