//! Operations and batches.

use crate::artifact::ArtifactKind;
use crate::error::{Result, SyncError};
use crate::fingerprint::{Fingerprint, fingerprint};
use artisync_paths::compare::canonical_component;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

/// One proposed change to a root-relative destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Create {
        destination: PathBuf,
        content: Vec<u8>,
    },
    Update {
        destination: PathBuf,
        content: Vec<u8>,
        /// Fingerprint the caller believes is on disk; overrides the
        /// registry baseline when present.
        expected_prior: Option<Fingerprint>,
    },
    Delete {
        destination: PathBuf,
        expected_prior: Option<Fingerprint>,
    },
    /// Upstream moved an artifact: the record tracked under
    /// `previous_source` moves to this item's source path and the file at
    /// `from` is replaced by `content` at `destination`.
    Rename {
        previous_source: String,
        from: PathBuf,
        destination: PathBuf,
        content: Vec<u8>,
    },
}

impl Operation {
    pub fn destination(&self) -> &Path {
        match self {
            Self::Create { destination, .. }
            | Self::Update { destination, .. }
            | Self::Delete { destination, .. }
            | Self::Rename { destination, .. } => destination,
        }
    }

    /// Previous source path and destination of a rename.
    pub fn renamed_from(&self) -> Option<(&str, &Path)> {
        match self {
            Self::Rename {
                previous_source,
                from,
                ..
            } => Some((previous_source, from)),
            _ => None,
        }
    }

    /// Proposed content, `None` for deletes.
    pub fn content(&self) -> Option<&[u8]> {
        match self {
            Self::Create { content, .. }
            | Self::Update { content, .. }
            | Self::Rename { content, .. } => Some(content),
            Self::Delete { .. } => None,
        }
    }

    pub fn expected_prior(&self) -> Option<&Fingerprint> {
        match self {
            Self::Create { .. } | Self::Rename { .. } => None,
            Self::Update { expected_prior, .. } | Self::Delete { expected_prior, .. } => {
                expected_prior.as_ref()
            }
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete { .. })
    }

    /// Fingerprint of the proposed content.
    pub fn proposed_fingerprint(&self) -> Option<Fingerprint> {
        self.content().map(fingerprint)
    }
}

/// An operation together with the artifact it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Artifact path in the upstream tree; the registry key.
    pub source_path: String,
    pub kind: ArtifactKind,
    pub operation: Operation,
}

/// Ordered operations applied as one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub integration_id: String,
    /// Upstream revision the content comes from.
    pub revision: String,
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn builder(integration_id: impl Into<String>, revision: impl Into<String>) -> BatchBuilder {
        BatchBuilder {
            integration_id: integration_id.into(),
            revision: revision.into(),
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reject source paths claimed by more than one item.
    ///
    /// The registry keys records by source path, so a second claim would
    /// silently replace the first record.
    pub fn check_sources(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for item in &self.items {
            let previous = item.operation.renamed_from().map(|(source, _)| source);
            for source in std::iter::once(item.source_path.as_str()).chain(previous) {
                if !seen.insert(source) {
                    return Err(SyncError::DuplicateSourcePath(source.to_owned()));
                }
            }
        }
        Ok(())
    }

    /// Every path the batch will touch: each destination, plus the old
    /// location of a rename unless it names the same entry.
    pub fn touched_paths(&self, fold_case: bool) -> Vec<&Path> {
        let mut paths = Vec::with_capacity(self.items.len());
        for item in &self.items {
            let destination = item.operation.destination();
            paths.push(destination);
            if let Some((_, from)) = item.operation.renamed_from()
                && canonical_key(from, fold_case) != canonical_key(destination, fold_case)
            {
                paths.push(from);
            }
        }
        paths
    }

    /// Reject duplicate or nested destinations.
    pub fn check_overlaps(&self, fold_case: bool) -> Result<()> {
        let paths = self.touched_paths(fold_case);
        match find_overlap(&paths, fold_case) {
            Some((a, b)) => Err(SyncError::OverlappingDestinations {
                first: paths[a].to_path_buf(),
                second: paths[b].to_path_buf(),
            }),
            None => Ok(()),
        }
    }
}

/// Builds a [`Batch`], rejecting overlapping destinations.
#[derive(Debug, Clone)]
pub struct BatchBuilder {
    integration_id: String,
    revision: String,
    items: Vec<BatchItem>,
}

impl BatchBuilder {
    pub fn push(mut self, item: BatchItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn create(
        self,
        source_path: impl Into<String>,
        kind: ArtifactKind,
        destination: impl Into<PathBuf>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.push(BatchItem {
            source_path: source_path.into(),
            kind,
            operation: Operation::Create {
                destination: destination.into(),
                content: content.into(),
            },
        })
    }

    pub fn update(
        self,
        source_path: impl Into<String>,
        kind: ArtifactKind,
        destination: impl Into<PathBuf>,
        content: impl Into<Vec<u8>>,
        expected_prior: Option<Fingerprint>,
    ) -> Self {
        self.push(BatchItem {
            source_path: source_path.into(),
            kind,
            operation: Operation::Update {
                destination: destination.into(),
                content: content.into(),
                expected_prior,
            },
        })
    }

    pub fn delete(
        self,
        source_path: impl Into<String>,
        kind: ArtifactKind,
        destination: impl Into<PathBuf>,
        expected_prior: Option<Fingerprint>,
    ) -> Self {
        self.push(BatchItem {
            source_path: source_path.into(),
            kind,
            operation: Operation::Delete {
                destination: destination.into(),
                expected_prior,
            },
        })
    }

    /// Move the artifact tracked as `previous_source` (written at `from`)
    /// to `source_path` at `destination`.
    pub fn rename(
        self,
        previous_source: impl Into<String>,
        source_path: impl Into<String>,
        kind: ArtifactKind,
        from: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        content: impl Into<Vec<u8>>,
    ) -> Self {
        self.push(BatchItem {
            source_path: source_path.into(),
            kind,
            operation: Operation::Rename {
                previous_source: previous_source.into(),
                from: from.into(),
                destination: destination.into(),
                content: content.into(),
            },
        })
    }

    /// Finish the batch.
    ///
    /// # Errors
    ///
    /// [`SyncError::DuplicateSourcePath`] if a source path is claimed twice;
    /// [`SyncError::OverlappingDestinations`] if two destinations are equal
    /// or one is an ancestor of the other.
    pub fn build(self) -> Result<Batch> {
        let batch = Batch {
            integration_id: self.integration_id,
            revision: self.revision,
            items: self.items,
        };
        batch.check_sources()?;
        batch.check_overlaps(false)?;
        Ok(batch)
    }
}

fn canonical_key(path: &Path, fold_case: bool) -> Vec<String> {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| canonical_component(&c.as_os_str().to_string_lossy(), fold_case))
        .collect()
}

/// Indices of the first pair of paths that are equal or nested.
///
/// After sorting component-wise, any path that is a prefix of another sorts
/// directly before it or before an entry that shares the same prefix, so
/// adjacent comparisons are enough.
pub fn find_overlap(paths: &[&Path], fold_case: bool) -> Option<(usize, usize)> {
    let mut keyed: Vec<(Vec<String>, usize)> = paths
        .iter()
        .enumerate()
        .map(|(i, p)| (canonical_key(p, fold_case), i))
        .collect();
    keyed.sort();
    keyed.windows(2).find_map(|pair| {
        let (a, ia) = &pair[0];
        let (b, ib) = &pair[1];
        b.starts_with(a).then(|| (*ia.min(ib), *ia.max(ib)))
    })
}
