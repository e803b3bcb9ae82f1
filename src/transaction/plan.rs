//! Planning: validate, classify, and decide an action for every operation.
//!
//! Planning only reads. Any error here aborts the transaction before a
//! single byte is written.

use super::batch::{Batch, BatchItem, find_overlap};
use super::report::{Action, ConflictReason, PlanEntry, PlanReport};
use crate::artifact::is_staging_path;
use crate::classify::{Verdict, classify_against, classify_delete};
use crate::config::{DeletePolicy, HashingConfig, SyncConfig};
use crate::error::{Result, SyncError};
use crate::fingerprint::{Fingerprint, fingerprint_files};
use crate::registry::{ArtifactRecord, Registry};
use artisync_paths::{ApprovedRoot, is_within};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How the registry record changes if the transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordChange {
    Keep,
    Upsert(Fingerprint),
    Remove,
    /// Drop the record under `previous_source` and upsert this item's.
    Move {
        previous_source: String,
        hash: Fingerprint,
    },
}

/// Planning outcome for one batch item.
#[derive(Debug, Clone)]
pub(crate) struct PlannedOp<'b> {
    pub item: &'b BatchItem,
    pub destination: PathBuf,
    pub verdict: Verdict,
    pub action: Action,
    pub conflict: Option<ConflictReason>,
    pub record_change: RecordChange,
    /// Resolved old location of a tracked rename.
    pub previous: Option<PathBuf>,
    /// Remove `previous` once the new destination is written.
    pub remove_previous: bool,
    /// Keep a timestamped copy of the destination before replacing it.
    pub backup: bool,
}

impl<'b> PlannedOp<'b> {
    fn new(item: &'b BatchItem, destination: PathBuf, verdict: Verdict) -> Self {
        Self {
            item,
            destination,
            verdict,
            action: Action::Noop,
            conflict: None,
            record_change: RecordChange::Keep,
            previous: None,
            remove_previous: false,
            backup: false,
        }
    }

    fn skip(mut self, reason: ConflictReason) -> Self {
        self.action = Action::SkipConflict;
        self.conflict = Some(reason);
        self.record_change = RecordChange::Keep;
        self
    }

    /// File a conflict diff is taken against, with the path it was
    /// requested as.
    pub fn conflict_subject(&self) -> (&Path, &Path) {
        match (self.conflict, &self.previous, self.item.operation.renamed_from()) {
            (Some(ConflictReason::RenameLocalEdit), Some(previous), Some((_, requested))) => {
                (previous.as_path(), requested)
            }
            _ => (self.destination.as_path(), self.item.operation.destination()),
        }
    }
}

/// Planned batch.
#[derive(Debug, Clone)]
pub(crate) struct Plan<'b> {
    pub batch: &'b Batch,
    pub ops: Vec<PlannedOp<'b>>,
}

impl<'b> Plan<'b> {
    pub fn report(&self) -> PlanReport {
        PlanReport {
            integration_id: self.batch.integration_id.clone(),
            revision: self.batch.revision.clone(),
            entries: self
                .ops
                .iter()
                .map(|op| PlanEntry {
                    source_path: op.item.source_path.clone(),
                    destination: op.destination.clone(),
                    kind: op.item.kind,
                    verdict: op.verdict,
                    action: op.action,
                    conflict: op.conflict,
                    previous_destination: op.previous.clone(),
                })
                .collect(),
        }
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &PlannedOp<'b>> {
        self.ops.iter().filter(|op| op.action == Action::SkipConflict)
    }
}

/// The tracked side of a rename.
struct MovedFrom<'r> {
    previous_source: &'r str,
    record: &'r ArtifactRecord,
    path: PathBuf,
    local: Option<Fingerprint>,
}

/// Plan `batch` against `registry` under `root`.
///
/// # Errors
///
/// Validation errors for any rejected destination, duplicate source,
/// overlap, staged-only or ownership violation; [`SyncError::Fingerprint`]
/// when a local file cannot be read; [`SyncError::ConflictDetected`] in
/// strict mode.
pub(crate) fn plan<'b>(
    root: &ApprovedRoot,
    registry: &Registry,
    batch: &'b Batch,
    config: &SyncConfig,
    strict: bool,
) -> Result<Plan<'b>> {
    let fold = root.folds_case();
    let overwrite_untracked = config.apply.overwrite_untracked_with_backup;

    // Duplicate claims and overlap are properties of the batch alone;
    // reject them before any destination is resolved or classified.
    batch.check_sources()?;
    batch.check_overlaps(fold)?;

    let mut resolved = Vec::with_capacity(batch.len());
    let mut previous = Vec::with_capacity(batch.len());
    for item in &batch.items {
        resolved.push(resolve(root, item, item.operation.destination())?);
        previous.push(match item.operation.renamed_from() {
            Some((_, from)) => Some(resolve(root, item, from)?),
            None => None,
        });
    }

    // Distinct relative paths can still meet through symlinks or case.
    let mut touched: Vec<(&Path, &Path)> = Vec::with_capacity(batch.len());
    for ((item, destination), from) in batch.items.iter().zip(&resolved).zip(&previous) {
        touched.push((destination.as_path(), item.operation.destination()));
        if let (Some(from), Some((_, requested))) = (from, item.operation.renamed_from())
            && !same_entry(from, destination, fold)
        {
            touched.push((from.as_path(), requested));
        }
    }
    let refs: Vec<&Path> = touched.iter().map(|(path, _)| *path).collect();
    if let Some((a, b)) = find_overlap(&refs, fold) {
        return Err(SyncError::OverlappingDestinations {
            first: touched[a].1.to_path_buf(),
            second: touched[b].1.to_path_buf(),
        });
    }

    for (path, _) in &touched {
        if let Some((owner, _)) = registry.owner_of(path, fold)
            && owner != batch.integration_id
        {
            return Err(SyncError::OwnershipConflict {
                path: path.to_path_buf(),
                owner: owner.to_owned(),
                requested: batch.integration_id.clone(),
            });
        }
    }

    let mut targets = resolved.clone();
    targets.extend(previous.iter().flatten().cloned());
    let mut hashes = hash_locals(&targets, &config.hashing)
        .into_iter()
        .zip(&targets)
        .map(|(hash, path)| {
            hash.map_err(|source| SyncError::Fingerprint {
                path: path.clone(),
                source,
            })
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter();
    let locals: Vec<Option<Fingerprint>> = hashes.by_ref().take(resolved.len()).collect();
    let previous: Vec<Option<(PathBuf, Option<Fingerprint>)>> = previous
        .into_iter()
        .map(|from| from.map(|path| (path, hashes.next().flatten())))
        .collect();

    let mut ops = Vec::with_capacity(batch.len());
    for (((item, destination), local), from) in
        batch.items.iter().zip(resolved).zip(locals).zip(previous)
    {
        let record = registry.artifact(&batch.integration_id, &item.source_path);
        let moved = match (item.operation.renamed_from(), from) {
            (Some((previous_source, _)), Some((path, from_local))) if record.is_none() => registry
                .artifact(&batch.integration_id, previous_source)
                .map(|record| MovedFrom {
                    previous_source,
                    record,
                    path,
                    local: from_local,
                }),
            _ => None,
        };
        let baseline = item
            .operation
            .expected_prior()
            .or(record.map(|r| &r.last_known_hash));

        let op = match (item.operation.proposed_fingerprint(), moved) {
            (Some(proposed), Some(moved)) => plan_rename(
                item,
                destination,
                local,
                proposed,
                moved,
                registry,
                overwrite_untracked,
                fold,
            ),
            (Some(proposed), None) => {
                let current = record.is_some_and(|r| {
                    r.last_known_hash == proposed
                        && r.last_known_revision == batch.revision
                        && r.kind == item.kind
                        && r.destination_path == destination
                });
                plan_write(
                    item,
                    destination,
                    baseline,
                    local,
                    proposed,
                    current,
                    overwrite_untracked,
                )
            }
            (None, _) => plan_delete(
                item,
                destination,
                baseline,
                local,
                record.is_some(),
                config.apply.delete_policy,
            ),
        };
        debug!(
            source = %op.item.source_path,
            destination = %op.destination.display(),
            verdict = %op.verdict,
            action = ?op.action,
            "plan: classified"
        );
        ops.push(op);
    }

    let plan = Plan { batch, ops };
    let conflicts: Vec<&PlannedOp<'b>> = plan.conflicts().collect();
    if let Some(first) = conflicts.first() {
        if strict {
            warn!(
                integration = %batch.integration_id,
                conflicts = conflicts.len(),
                "plan: conflicts in strict mode, aborting"
            );
            return Err(SyncError::ConflictDetected {
                count: conflicts.len(),
                first: first.destination.clone(),
            });
        }
        for op in &conflicts {
            warn!(
                destination = %op.destination.display(),
                reason = ?op.conflict,
                "plan: conflict, destination will be left untouched"
            );
        }
    }
    info!(
        integration = %batch.integration_id,
        revision = %batch.revision,
        operations = plan.ops.len(),
        conflicts = conflicts.len(),
        "plan: complete"
    );
    Ok(plan)
}

/// Validate `requested` under `root`. Staged-only kinds must land inside
/// their own `<kind>.imported.<repo>` staging area once every symlink is
/// followed.
fn resolve(root: &ApprovedRoot, item: &BatchItem, requested: &Path) -> Result<PathBuf> {
    let resolved = root.validate(requested)?;
    if item.kind.staged_only() && !is_staging_path(item.kind, resolved.within_root()) {
        return Err(SyncError::StagedOnlyViolation {
            kind: item.kind.to_string(),
            path: requested.to_path_buf(),
        });
    }
    Ok(resolved.into_path_buf())
}

fn same_entry(a: &Path, b: &Path, fold_case: bool) -> bool {
    is_within(a, b, fold_case) && is_within(b, a, fold_case)
}

fn plan_write<'b>(
    item: &'b BatchItem,
    destination: PathBuf,
    baseline: Option<&Fingerprint>,
    local: Option<Fingerprint>,
    proposed: Fingerprint,
    record_current: bool,
    overwrite_untracked: bool,
) -> PlannedOp<'b> {
    let verdict = classify_against(baseline, local.as_ref(), &proposed);
    let mut op = PlannedOp::new(item, destination, verdict);
    op.action = match verdict {
        Verdict::Conflict => return op.skip(ConflictReason::LocalEdit),
        Verdict::CleanApply => Action::Write,
        Verdict::Unchanged => Action::Noop,
        Verdict::New => match &local {
            None => Action::Write,
            Some(existing) if *existing == proposed => Action::Adopt,
            Some(_) if overwrite_untracked => {
                op.backup = true;
                Action::OverwriteWithBackup
            }
            Some(_) => return op.skip(ConflictReason::UntrackedDestinationExists),
        },
    };
    if !(op.action == Action::Noop && record_current) {
        op.record_change = RecordChange::Upsert(proposed);
    }
    op
}

/// A tracked artifact moved upstream: write it at its new destination and
/// drop the old one, unless either end holds something we must not lose.
#[allow(clippy::too_many_arguments)]
fn plan_rename<'b>(
    item: &'b BatchItem,
    destination: PathBuf,
    local: Option<Fingerprint>,
    proposed: Fingerprint,
    moved: MovedFrom<'_>,
    registry: &Registry,
    overwrite_untracked: bool,
    fold_case: bool,
) -> PlannedOp<'b> {
    let same_file = same_entry(&moved.path, &destination, fold_case);
    let mut op = PlannedOp::new(item, destination, Verdict::Conflict);
    op.remove_previous = moved.local.is_some() && !same_file;
    op.previous = Some(moved.path);

    if moved
        .local
        .as_ref()
        .is_some_and(|local| *local != moved.record.last_known_hash)
    {
        return op.skip(ConflictReason::RenameLocalEdit);
    }
    if !same_file && let Some(existing) = &local {
        if registry.owner_of(&op.destination, fold_case).is_some() {
            return op.skip(ConflictReason::RenameDestinationTracked);
        }
        if *existing != proposed {
            if !overwrite_untracked {
                return op.skip(ConflictReason::UntrackedDestinationExists);
            }
            op.backup = true;
        }
    }
    op.verdict = Verdict::CleanApply;
    op.action = Action::Rename;
    op.record_change = RecordChange::Move {
        previous_source: moved.previous_source.to_owned(),
        hash: proposed,
    };
    op
}

fn plan_delete<'b>(
    item: &'b BatchItem,
    destination: PathBuf,
    baseline: Option<&Fingerprint>,
    local: Option<Fingerprint>,
    has_record: bool,
    policy: DeletePolicy,
) -> PlannedOp<'b> {
    let verdict = classify_delete(baseline, local.as_ref());
    let mut op = PlannedOp::new(item, destination, verdict);
    // A local edit is reported whatever the policy; Skip only keeps files
    // that were safe to remove.
    (op.action, op.record_change) = match (verdict, policy) {
        (Verdict::Unchanged, _) if has_record => (Action::Forget, RecordChange::Remove),
        (Verdict::Unchanged, _) => (Action::Noop, RecordChange::Keep),
        (Verdict::Conflict, _) => {
            return op.skip(if has_record || baseline.is_some() {
                ConflictReason::LocalEdit
            } else {
                ConflictReason::UntrackedDestinationExists
            });
        }
        (_, DeletePolicy::Skip) => (Action::KeepDeleted, RecordChange::Keep),
        (_, DeletePolicy::Soft) => (Action::SoftDelete, RecordChange::Remove),
        (_, DeletePolicy::Hard) => (Action::Delete, RecordChange::Remove),
    };
    op
}

/// Fingerprint destinations in parallel on the configured pool.
fn hash_locals(paths: &[PathBuf], hashing: &HashingConfig) -> Vec<io::Result<Option<Fingerprint>>> {
    if hashing.workers == 0 {
        return fingerprint_files(paths, hashing.chunk_size);
    }
    match rayon::ThreadPoolBuilder::new()
        .num_threads(hashing.workers)
        .build()
    {
        Ok(pool) => pool.install(|| fingerprint_files(paths, hashing.chunk_size)),
        Err(e) => {
            warn!(error = %e, "plan: cannot build hashing pool, using global pool");
            fingerprint_files(paths, hashing.chunk_size)
        }
    }
}
