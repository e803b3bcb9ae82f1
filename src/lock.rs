//! Exclusive, crash-safe registry lock.
//!
//! An advisory `flock` on `<registry>.lock` serialises transactions for one
//! scope. The holder records `{pid, acquired_at_secs, token}` in
//! `<registry>.lock.owner.json`. A contender that finds the lock held reads
//! that record and reclaims the lock when the owning process is gone or the
//! lock is older than [`LockConfig::stale_after`].
//!
//! The kernel drops an `flock` when its holder dies, so a crashed holder
//! never blocks anyone. Stale reclaim only matters for a holder that is
//! alive but stuck.

use crate::config::LockConfig;
use crate::error::{Result, SyncError};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Owner metadata stored next to the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub acquired_at_secs: u64,
    /// Random per-acquisition id; tells two holders in one process apart.
    #[serde(default)]
    pub token: String,
}

/// Held registry lock. Released on drop.
#[derive(Debug)]
pub struct RegistryLockGuard {
    file: File,
    path: PathBuf,
    owner_path: PathBuf,
    owner: LockOwner,
}

impl RegistryLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Owner record written when this guard acquired the lock.
    pub fn owner(&self) -> &LockOwner {
        &self.owner
    }
}

impl Drop for RegistryLockGuard {
    fn drop(&mut self) {
        // A reclaimer may have replaced the record; only remove our own.
        if read_owner(&self.owner_path).as_ref() == Some(&self.owner) {
            let _ = std::fs::remove_file(&self.owner_path);
        } else {
            debug!(path = %self.path.display(), "lock: owner record replaced, leaving it");
        }
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "lock: release failed");
        } else {
            debug!(path = %self.path.display(), "lock: released");
        }
    }
}

/// Entry point for acquiring the registry lock.
pub struct RegistryLock;

impl RegistryLock {
    /// Acquire the lock at `path`, waiting up to `config.timeout_ms`.
    ///
    /// # Errors
    ///
    /// [`SyncError::LockTimeout`] when the deadline passes, [`SyncError::Io`]
    /// when the lock file cannot be created.
    pub fn acquire(path: &Path, config: &LockConfig) -> Result<RegistryLockGuard> {
        let owner_path = owner_path_for(path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
        }

        let start = Instant::now();
        let deadline = start + config.timeout();
        let mut delay = config.poll_interval();
        let mut reported = false;

        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(path)
                .map_err(|e| SyncError::io(path, e))?;

            if file.try_lock_exclusive().is_ok() {
                if !still_linked(&file, path) {
                    // Reclaimed under us; retry against the new file.
                    continue;
                }
                let owner = write_owner(&owner_path).map_err(|e| SyncError::io(&owner_path, e))?;
                info!(
                    path = %path.display(),
                    waited_ms = start.elapsed().as_millis() as u64,
                    "lock: acquired"
                );
                return Ok(RegistryLockGuard {
                    file,
                    path: path.to_path_buf(),
                    owner_path,
                    owner,
                });
            }
            drop(file);

            if reclaim_if_stale(path, &owner_path, config.stale_after()) {
                continue;
            }

            let now = Instant::now();
            if now >= deadline {
                let waited_ms = start.elapsed().as_millis() as u64;
                warn!(path = %path.display(), waited_ms, "lock: timed out");
                return Err(SyncError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms,
                });
            }
            if !reported {
                info!(path = %path.display(), "lock: held by another transaction, waiting");
                reported = true;
            }
            std::thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(config.poll_interval() * 16);
        }
    }

    /// Current owner record, if the lock is held and the record is readable.
    pub fn owner(path: &Path) -> Option<LockOwner> {
        read_owner(&owner_path_for(path))
    }
}

fn owner_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".owner.json");
    path.with_file_name(name)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn write_owner(owner_path: &Path) -> std::io::Result<LockOwner> {
    let owner = LockOwner {
        pid: std::process::id(),
        acquired_at_secs: now_secs(),
        token: uuid::Uuid::new_v4().simple().to_string(),
    };
    let json = serde_json::to_vec(&owner).map_err(std::io::Error::other)?;
    crate::durable::write_atomic(owner_path, &json)?;
    Ok(owner)
}

fn read_owner(owner_path: &Path) -> Option<LockOwner> {
    let bytes = std::fs::read(owner_path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Remove a lock whose owner is gone or too old. Returns true if reclaimed.
fn reclaim_if_stale(path: &Path, owner_path: &Path, stale_after: Duration) -> bool {
    // No owner record yet means the holder is between lock and write.
    let Some(owner) = read_owner(owner_path) else {
        return false;
    };
    let age_secs = now_secs().saturating_sub(owner.acquired_at_secs);
    let dead = !pid_alive(owner.pid);
    let expired = !stale_after.is_zero() && age_secs >= stale_after.as_secs();
    if !dead && !expired {
        return false;
    }
    warn!(
        path = %path.display(),
        pid = owner.pid,
        age_secs,
        owner_alive = !dead,
        "lock: reclaiming stale lock"
    );
    let _ = std::fs::remove_file(owner_path);
    let _ = std::fs::remove_file(path);
    true
}

/// True when `file` is still the inode at `path`.
#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn quick() -> LockConfig {
        LockConfig {
            timeout_ms: 150,
            poll_interval_ms: 10,
            stale_after_secs: 300,
        }
    }

    #[test]
    fn acquire_writes_owner_and_drop_clears_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json.lock");
        {
            let guard = RegistryLock::acquire(&path, &quick()).expect("acquire");
            assert_eq!(guard.path(), path);
            let owner = RegistryLock::owner(&path).expect("owner");
            assert_eq!(owner.pid, std::process::id());
        }
        assert!(RegistryLock::owner(&path).is_none());
        let _again = RegistryLock::acquire(&path, &quick()).expect("reacquire");
    }

    #[test]
    fn second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json.lock");
        let _held = RegistryLock::acquire(&path, &quick()).expect("acquire");

        let start = Instant::now();
        let err = RegistryLock::acquire(&path, &quick()).expect_err("contended");
        assert!(matches!(err, SyncError::LockTimeout { .. }));
        assert!(err.is_retryable());
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[test]
    fn expired_owner_is_reclaimed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json.lock");
        let held = RegistryLock::acquire(&path, &quick()).expect("acquire");

        // Backdate the owner record past the stale threshold.
        let old = LockOwner {
            pid: std::process::id(),
            acquired_at_secs: now_secs() - 1_000,
            token: "old".into(),
        };
        std::fs::write(owner_path_for(&path), serde_json::to_vec(&old).expect("json"))
            .expect("write owner");

        let reclaimed = RegistryLock::acquire(&path, &quick()).expect("reclaim");
        assert_eq!(
            RegistryLock::owner(&path).expect("owner").pid,
            std::process::id()
        );
        drop(held);
        assert_eq!(RegistryLock::owner(&path).as_ref(), Some(reclaimed.owner()));
        drop(reclaimed);
        assert!(RegistryLock::owner(&path).is_none());
    }

    #[test]
    fn drop_leaves_a_replaced_owner_record() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.json.lock");
        let guard = RegistryLock::acquire(&path, &quick()).expect("acquire");

        let other = LockOwner {
            pid: guard.owner().pid.wrapping_add(1),
            acquired_at_secs: now_secs(),
            token: "someone-else".into(),
        };
        std::fs::write(owner_path_for(&path), serde_json::to_vec(&other).expect("json"))
            .expect("write owner");

        drop(guard);
        assert_eq!(RegistryLock::owner(&path), Some(other));
    }

    #[cfg(unix)]
    #[test]
    fn dead_pid_is_not_alive() {
        assert!(pid_alive(std::process::id()));
        assert!(!pid_alive(0));
        // Highest pid_t is never allocated in practice.
        assert!(!pid_alive(i32::MAX as u32));
    }
}
