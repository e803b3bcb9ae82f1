//! Durable file writes.
//!
//! Everything artisync persists goes through the same discipline: write to a
//! uniquely named temp file in the destination's own directory, `fsync` it,
//! `rename` it over the destination, then `fsync` the directory so the new
//! entry survives a crash. Temp files never leave the destination's volume,
//! so the rename is always atomic.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Marker embedded in every temp and backup file name artisync creates.
pub const MARKER: &str = "artisync";

fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| MARKER.to_owned())
}

fn parent_of(path: &Path) -> io::Result<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })
}

/// Hidden sibling of `dest` tagged with `tag` and a random id, e.g.
/// `.SKILL.md.artisync-<uuid>.tmp`.
pub fn hidden_sibling(dest: &Path, tag: &str) -> io::Result<PathBuf> {
    let parent = parent_of(dest)?;
    let name = format!(
        ".{}.{MARKER}-{}.{tag}",
        file_name_lossy(dest),
        uuid::Uuid::new_v4().simple()
    );
    Ok(parent.join(name))
}

/// First of `<dest><suffix>`, `<dest><suffix>-1`, ... that does not exist.
pub fn unique_sibling(dest: &Path, suffix: &str) -> io::Result<PathBuf> {
    let parent = parent_of(dest)?;
    let base = format!("{}{suffix}", file_name_lossy(dest));
    let first = parent.join(&base);
    if !exists_no_follow(&first) {
        return Ok(first);
    }
    for n in 1..10_000u32 {
        let candidate = parent.join(format!("{base}-{n}"));
        if !exists_no_follow(&candidate) {
            return Ok(candidate);
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {}", first.display()),
    ))
}

fn exists_no_follow(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Create a new file exclusively, refusing to follow a symlink at `path`.
fn create_exclusive(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NOFOLLOW);
    }
    options.open(path)
}

/// Write `bytes` to a fresh temp file next to `dest` and sync it.
///
/// The destination itself is not touched. On failure the partial temp file
/// is removed before the error is returned.
pub fn stage_sibling(dest: &Path, bytes: &[u8]) -> io::Result<PathBuf> {
    let tmp = hidden_sibling(dest, "tmp")?;
    let result = create_exclusive(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(e) = result {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(tmp)
}

/// Copy `src` to a fresh hidden sibling and sync the copy.
pub fn backup_copy(src: &Path) -> io::Result<PathBuf> {
    let backup = hidden_sibling(src, "bak")?;
    let result = (|| {
        let mut from = File::open(src)?;
        let mut to = create_exclusive(&backup)?;
        io::copy(&mut from, &mut to)?;
        to.sync_all()
    })();
    if let Err(e) = result {
        let _ = std::fs::remove_file(&backup);
        return Err(e);
    }
    Ok(backup)
}

/// Flush a directory entry table to storage.
#[cfg(unix)]
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// Directory handles cannot be synced on this platform.
#[cfg(not(unix))]
pub fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Rename `from` onto `to` and sync the containing directory.
///
/// Once the rename has happened the new content is visible and cannot be
/// taken back, so a failed directory sync is logged rather than returned.
pub fn promote(from: &Path, to: &Path) -> io::Result<()> {
    replace_then_sync(from, to, fsync_dir)
}

fn replace_then_sync(
    from: &Path,
    to: &Path,
    sync_dir: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    let parent = parent_of(to)?;
    std::fs::rename(from, to)?;
    if let Err(e) = sync_dir(parent) {
        warn!(
            path = %to.display(),
            error = %e,
            "durable: replaced but directory sync failed"
        );
    }
    Ok(())
}

/// Replace `dest` with `bytes` atomically.
///
/// `Err` means `dest` still holds its previous content; `Ok` means the new
/// content is in place, even if the directory entry was not yet flushed.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    write_atomic_with(dest, bytes, fsync_dir)
}

fn write_atomic_with(
    dest: &Path,
    bytes: &[u8],
    sync_dir: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    let parent = parent_of(dest)?;
    std::fs::create_dir_all(parent)?;
    let tmp = stage_sibling(dest, bytes)?;
    if let Err(e) = replace_then_sync(&tmp, dest, sync_dir) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Create `dir` and any missing ancestors, returning the directories that
/// were actually created, outermost first.
pub fn create_dirs_tracked(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut cursor = Some(dir);
    while let Some(path) = cursor {
        if exists_no_follow(path) {
            break;
        }
        missing.push(path.to_path_buf());
        cursor = path.parent();
    }
    missing.reverse();
    let mut created = Vec::with_capacity(missing.len());
    for path in missing {
        match std::fs::create_dir(&path) {
            Ok(()) => created.push(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => {
                for dir in created.iter().rev() {
                    let _ = std::fs::remove_dir(dir);
                }
                return Err(e);
            }
        }
    }
    Ok(created)
}
