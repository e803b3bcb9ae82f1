//! Filesystem queries used while resolving a candidate path.
//!
//! Resolution only ever reads metadata. Keeping the queries behind
//! [`Resolver`] lets the containment rules be tested against an in-memory
//! tree, without real symlinks or a case-insensitive volume.

use std::io;
use std::path::{Path, PathBuf};

/// What a directory entry is, without following a trailing symlink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

/// Read-only filesystem operations needed by [`crate::ApprovedRoot`].
pub trait Resolver: Send + Sync {
    /// Kind of the entry at `path`. A trailing symlink is reported as
    /// [`EntryKind::Symlink`], not followed.
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind>;

    /// Raw target of the symlink at `path`.
    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    /// Fully resolved absolute form of an existing path.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// [`Resolver`] backed by the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsResolver;

impl Resolver for FsResolver {
    fn entry_kind(&self, path: &Path) -> io::Result<EntryKind> {
        let file_type = std::fs::symlink_metadata(path)?.file_type();
        Ok(if file_type.is_symlink() {
            EntryKind::Symlink
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        })
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        std::fs::read_link(path)
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        path.canonicalize()
    }
}

/// True when an error just means "nothing exists here yet".
pub(crate) fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
