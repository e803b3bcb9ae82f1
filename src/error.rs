//! Error types for artisync.
//!
//! Variants map onto a small set of [`ErrorKind`]s so callers can decide
//! between retrying, reinitialising the registry, or reporting a rejected
//! destination without matching every variant.

use artisync_paths::PathError;
use serde::Serialize;
use std::path::PathBuf;

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A destination or batch was rejected before any I/O.
    Validation,
    /// A local edit blocked the batch in strict mode.
    Conflict,
    /// Disk or permission failure while staging or committing.
    IoFailure,
    /// Another transaction holds the registry lock.
    LockContention,
    /// The registry file exists but cannot be parsed.
    RegistryCorrupt,
    /// Something that was looked up does not exist.
    NotFound,
    /// Configuration could not be read, parsed, or written.
    Config,
}

/// Top-level error type for synchronisation.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A destination failed containment validation.
    #[error("validation failed: {0}")]
    Validation(#[from] PathError),

    /// Two operations in one batch target the same path or nest.
    #[error("overlapping destinations: {first} and {second}")]
    OverlappingDestinations { first: PathBuf, second: PathBuf },

    /// Two operations in one batch claim the same upstream source path.
    #[error("source path {0} appears more than once in the batch")]
    DuplicateSourcePath(String),

    /// A staged-only artifact was aimed at an active location.
    #[error("{kind} artifact must be written under an .imported. staging path, got {path}")]
    StagedOnlyViolation { kind: String, path: PathBuf },

    /// The destination is tracked by a different integration.
    #[error("{path} is owned by integration {owner}, not {requested}")]
    OwnershipConflict {
        path: PathBuf,
        owner: String,
        requested: String,
    },

    /// Strict mode refused to skip conflicting operations.
    #[error("{count} conflicting operation(s) in strict mode, first at {first}")]
    ConflictDetected { count: usize, first: PathBuf },

    /// A local file could not be fingerprinted.
    #[error("cannot fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O failure with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Writing or syncing a staged temporary file failed.
    #[error("staging failed for {path}: {source}")]
    StagingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A promotion failed after earlier promotions in the same batch succeeded.
    #[error("commit failed at {path} after {promoted} promotion(s): {source}")]
    CommitPartialFailure {
        path: PathBuf,
        promoted: usize,
        #[source]
        source: std::io::Error,
    },

    /// The registry lock was not obtained before the deadline.
    #[error("timed out after {waited_ms} ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    /// The registry file is unreadable as a registry.
    #[error("registry {path} is corrupt: {reason}")]
    RegistryCorrupt { path: PathBuf, reason: String },

    /// No registry file exists yet.
    #[error("registry not found at {0}")]
    RegistryNotFound(PathBuf),

    /// The named integration is not registered.
    #[error("integration not found: {0}")]
    IntegrationNotFound(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

impl SyncError {
    /// Attach a path to a bare I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// The path most closely associated with the error, if any.
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::OverlappingDestinations { first, .. } => Some(first.as_path()),
            Self::StagedOnlyViolation { path, .. }
            | Self::OwnershipConflict { path, .. }
            | Self::Fingerprint { path, .. }
            | Self::Io { path, .. }
            | Self::StagingIo { path, .. }
            | Self::CommitPartialFailure { path, .. }
            | Self::LockTimeout { path, .. }
            | Self::RegistryCorrupt { path, .. } => Some(path.as_path()),
            Self::ConflictDetected { first, .. } => Some(first.as_path()),
            Self::RegistryNotFound(path) => Some(path.as_path()),
            Self::Validation(_)
            | Self::DuplicateSourcePath(_)
            | Self::IntegrationNotFound(_)
            | Self::Config(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_)
            | Self::OverlappingDestinations { .. }
            | Self::DuplicateSourcePath(_)
            | Self::StagedOnlyViolation { .. }
            | Self::OwnershipConflict { .. } => ErrorKind::Validation,
            Self::ConflictDetected { .. } => ErrorKind::Conflict,
            Self::Fingerprint { .. }
            | Self::Io { .. }
            | Self::StagingIo { .. }
            | Self::CommitPartialFailure { .. } => ErrorKind::IoFailure,
            Self::LockTimeout { .. } => ErrorKind::LockContention,
            Self::RegistryCorrupt { .. } => ErrorKind::RegistryCorrupt,
            Self::RegistryNotFound(_) | Self::IntegrationNotFound(_) => ErrorKind::NotFound,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Only lock contention is worth retrying unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::LockContention
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, SyncError>;
