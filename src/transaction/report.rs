//! Plan and apply reports.

use crate::artifact::ArtifactKind;
use crate::classify::Verdict;
use crate::error::{ErrorKind, SyncError};
use serde::Serialize;
use std::path::PathBuf;

use super::TransactionState;

/// What the transaction will do, or did, for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Write new content to the destination.
    Write,
    /// Copy an untracked destination to `<dest>.bak.<timestamp>`, then
    /// write over it.
    OverwriteWithBackup,
    /// Write the content at the new destination and remove the old one.
    Rename,
    /// Destination already holds the proposed content; record it only.
    Adopt,
    /// Nothing to do.
    Noop,
    /// Upstream deleted an artifact that is already gone locally; forget it.
    Forget,
    /// Remove the destination.
    Delete,
    /// Remove the destination, keeping a timestamped backup beside it.
    SoftDelete,
    /// Upstream deleted the artifact but the delete policy keeps it.
    KeepDeleted,
    /// Leave the destination alone and emit a diff artifact.
    SkipConflict,
}

impl Action {
    /// Whether the action changes a destination file.
    pub fn mutates_destination(self) -> bool {
        matches!(
            self,
            Self::Write | Self::OverwriteWithBackup | Self::Rename | Self::Delete | Self::SoftDelete
        )
    }
}

/// Why an operation was skipped as a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// The local file differs from the last imported content.
    LocalEdit,
    /// An untracked file with different content is in the way.
    UntrackedDestinationExists,
    /// The file at a rename's old location was edited since the last import.
    RenameLocalEdit,
    /// A rename's new location holds another tracked artifact.
    RenameDestinationTracked,
}

/// Planned outcome for one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub source_path: String,
    /// Resolved absolute destination.
    pub destination: PathBuf,
    pub kind: ArtifactKind,
    pub verdict: Verdict,
    pub action: Action,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictReason>,
    /// Old location of a rename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_destination: Option<PathBuf>,
}

/// Result of planning a batch without applying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanReport {
    pub integration_id: String,
    pub revision: String,
    pub entries: Vec<PlanEntry>,
}

impl PlanReport {
    /// Destinations that applying would change.
    pub fn would_write(&self) -> Vec<&PathBuf> {
        self.entries
            .iter()
            .filter(|e| e.action.mutates_destination())
            .map(|e| &e.destination)
            .collect()
    }

    /// Destinations that would be skipped as conflicts.
    pub fn would_conflict(&self) -> Vec<&PathBuf> {
        self.entries
            .iter()
            .filter(|e| e.action == Action::SkipConflict)
            .map(|e| &e.destination)
            .collect()
    }

    pub fn verdict_for(&self, source_path: &str) -> Option<Verdict> {
        self.entries
            .iter()
            .find(|e| e.source_path == source_path)
            .map(|e| e.verdict)
    }

    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(|e| e.action == Action::SkipConflict)
    }
}

/// A committed change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedEntry {
    pub source_path: String,
    pub destination: PathBuf,
    pub action: Action,
    /// Old location of a rename.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_destination: Option<PathBuf>,
    /// Timestamped copy of the content this entry replaced or removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

/// A conflicting operation that was left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedConflict {
    pub source_path: String,
    pub destination: PathBuf,
    pub reason: ConflictReason,
    /// Diff artifact written beside the destination.
    pub diff_artifact: Option<PathBuf>,
}

/// An error recorded while staging, committing, or rolling back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportedError {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub message: String,
}

impl From<&SyncError> for ReportedError {
    fn from(err: &SyncError) -> Self {
        Self {
            kind: err.kind(),
            path: err.path().map(|p| p.to_path_buf()),
            message: err.to_string(),
        }
    }
}

/// Result of applying a batch.
///
/// `state` is [`TransactionState::Committed`] or
/// [`TransactionState::RolledBack`]; in the latter case `applied` is empty
/// and `errors` explains why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub integration_id: String,
    pub revision: String,
    pub state: TransactionState,
    pub applied: Vec<AppliedEntry>,
    pub skipped_conflicts: Vec<SkippedConflict>,
    pub unchanged: Vec<PathBuf>,
    /// Deletions kept because of the delete policy.
    pub kept: Vec<PathBuf>,
    pub errors: Vec<ReportedError>,
    /// Whether the registry file was rewritten.
    pub registry_saved: bool,
}

impl ApplyReport {
    pub fn is_committed(&self) -> bool {
        self.state == TransactionState::Committed
    }

    /// Number of destination files written or removed.
    pub fn files_changed(&self) -> usize {
        self.applied
            .iter()
            .filter(|a| a.action.mutates_destination())
            .count()
    }
}
