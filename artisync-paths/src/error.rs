//! Error types for the artisync-paths crate.
//!
//! Every variant is raised before any write happens, so callers can treat
//! all of them as "reject the offending destination".

use std::path::PathBuf;

/// Reasons a candidate destination is refused.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// The candidate path was empty.
    #[error("path is empty")]
    EmptyPath,

    /// The candidate contained a `..` segment.
    #[error("path contains directory traversal: {0}")]
    TraversalAttempt(PathBuf),

    /// An absolute path was supplied where a root-relative one is required.
    #[error("absolute path rejected, expected a path relative to the approved root: {0}")]
    AbsolutePathRejected(PathBuf),

    /// A symlink on the way from root to leaf resolves outside the root.
    #[error("symlink {link} escapes the approved root (resolves to {resolved})")]
    RootEscapeViaSymlink {
        /// The symlink that was followed.
        link: PathBuf,
        /// Where the symlink resolved to.
        resolved: PathBuf,
    },

    /// The fully resolved path is not under the approved root.
    #[error("path {resolved} is outside the approved root {root}")]
    OutsideRoot {
        /// The resolved candidate.
        resolved: PathBuf,
        /// The resolved approved root.
        root: PathBuf,
    },

    /// Too many symlinks were followed while resolving.
    #[error("too many levels of symbolic links at {0}")]
    SymlinkLoop(PathBuf),

    /// The approved root itself was not absolute.
    #[error("approved root must be absolute: {0}")]
    RootNotAbsolute(PathBuf),

    /// The approved root could not be resolved.
    #[error("approved root {path} cannot be resolved: {source}")]
    RootUnavailable {
        /// Declared root path.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// A metadata query failed for a reason other than the entry being absent.
    #[error("cannot inspect {path}: {source}")]
    Io {
        /// Path being inspected.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for artisync-paths results.
pub type Result<T> = std::result::Result<T, PathError>;
