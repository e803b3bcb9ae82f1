//! Transactional writer.
//!
//! A batch moves through
//!
//! ```text
//! Planning ──→ Staging ──→ Committing ──→ Committed
//!     │            │            │
//!     ↓            └────────────┴──→ RolledBack
//!  Aborted
//! ```
//!
//! Planning validates and classifies without writing. Staging writes every
//! new byte to synced temp files beside its destination. Committing renames
//! them into place one by one, keeping a backup of whatever each rename
//! replaces, and finally saves the registry. Any failure after Planning
//! restores every backup, so each destination ends up entirely old or
//! entirely new.
//!
//! The registry lock is taken before Planning and held until the
//! transaction ends, so the plan cannot go stale under a concurrent writer.

pub mod batch;
pub mod journal;
mod plan;
pub mod report;

pub use batch::{Batch, BatchBuilder, BatchItem, Operation};
pub use journal::{CommitHook, NoopHook};
pub use report::{
    Action, AppliedEntry, ApplyReport, ConflictReason, PlanEntry, PlanReport, ReportedError,
    SkippedConflict,
};

use crate::artifact::Scope;
use crate::config::SyncConfig;
use crate::diff;
use crate::error::{Result, SyncError};
use crate::lock::RegistryLock;
use crate::registry::{ArtifactRecord, IntegrationRecord, Registry, RegistryStore};
use artisync_paths::ApprovedRoot;
use chrono::{DateTime, Local, Utc};
use journal::Journal;
use plan::{Plan, RecordChange};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

// ── State machine ─────────────────────────────────────────────────────────────

/// Lifecycle state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Planning,
    Staging,
    Committing,
    Committed,
    RolledBack,
    Aborted,
}

impl TransactionState {
    /// Returns `true` if a transition from `self` to `target` is valid.
    ///
    /// - `Planning → Staging | Aborted`
    /// - `Staging → Committing | RolledBack`
    /// - `Committing → Committed | RolledBack`
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Planning, Self::Staging)
                | (Self::Planning, Self::Aborted)
                | (Self::Staging, Self::Committing)
                | (Self::Staging, Self::RolledBack)
                | (Self::Committing, Self::Committed)
                | (Self::Committing, Self::RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Aborted)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Planning => "planning",
            Self::Staging => "staging",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}

/// Tracks and logs the state of one running transaction.
struct Transaction {
    id: uuid::Uuid,
    state: TransactionState,
}

impl Transaction {
    fn begin(batch: &Batch) -> Self {
        let id = uuid::Uuid::new_v4();
        info!(
            txn = %id,
            integration = %batch.integration_id,
            revision = %batch.revision,
            operations = batch.len(),
            "transaction: planning"
        );
        Self {
            id,
            state: TransactionState::Planning,
        }
    }

    fn advance(&mut self, target: TransactionState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "invalid transaction transition {} -> {target}",
            self.state
        );
        info!(txn = %self.id, from = %self.state, to = %target, "transaction: state change");
        self.state = target;
    }
}

// ── Engine ────────────────────────────────────────────────────────────────────

/// Applies batches to one approved root, tracking provenance in one registry.
pub struct SyncEngine {
    root: ApprovedRoot,
    store: RegistryStore,
    config: SyncConfig,
    hook: Arc<dyn CommitHook>,
}

impl fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("root", &self.root)
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Engine over `root` and `store`. The store's backup behaviour follows
    /// `config.registry.keep_backup`.
    pub fn new(root: ApprovedRoot, store: RegistryStore, config: SyncConfig) -> Self {
        Self {
            root,
            store: store.with_backup(config.registry.keep_backup),
            config,
            hook: Arc::new(NoopHook),
        }
    }

    /// Engine for `root_path` using the scope's registry under the
    /// configured data directory.
    pub fn open(root_path: &Path, scope: Scope, config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let root = ApprovedRoot::new(root_path)?.with_case_sensitivity(config.paths.case_sensitivity);
        let store = RegistryStore::for_scope(&config.data_dir(), scope);
        Ok(Self::new(root, store, config))
    }

    /// Install a commit hook (fault injection in tests).
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn CommitHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn root(&self) -> &ApprovedRoot {
        &self.root
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Register (or update) an integration under the registry lock.
    pub fn register_integration(&self, record: IntegrationRecord) -> Result<()> {
        let _lock = RegistryLock::acquire(&self.store.lock_path(), &self.config.lock)?;
        let mut registry = self.load_registry(true)?;
        let before = registry.clone();
        registry.register_integration(record);
        if registry != before {
            self.store.save(&registry)?;
        }
        Ok(())
    }

    /// Remove an integration and its artifact records. Files stay in place.
    pub fn unregister_integration(&self, integration_id: &str) -> Result<IntegrationRecord> {
        let _lock = RegistryLock::acquire(&self.store.lock_path(), &self.config.lock)?;
        let mut registry = self.store.load()?;
        let removed = registry
            .remove(integration_id)
            .ok_or_else(|| SyncError::IntegrationNotFound(integration_id.to_owned()))?;
        self.store.save(&registry)?;
        info!(integration = %integration_id, "engine: integration unregistered");
        Ok(removed)
    }

    /// Replace a corrupt registry with its last known good copy.
    pub fn recover_registry(&self) -> Result<Registry> {
        let _lock = RegistryLock::acquire(&self.store.lock_path(), &self.config.lock)?;
        self.store.recover_from_backup()
    }

    /// Replace the registry with an empty one, moving the old file aside.
    pub fn reinitialize_registry(&self) -> Result<Registry> {
        let _lock = RegistryLock::acquire(&self.store.lock_path(), &self.config.lock)?;
        self.store.reinitialize()
    }

    /// Load the registry, falling back to the backup on corruption when
    /// `registry.recover_from_backup` is set. `repair` rewrites the main
    /// file from the backup; callers must hold the lock to pass it.
    fn load_registry(&self, repair: bool) -> Result<Registry> {
        match self.store.load_or_default() {
            Err(SyncError::RegistryCorrupt { path, reason }) if self.config.registry.recover_from_backup => {
                warn!(path = %path.display(), reason = %reason, "engine: registry corrupt, using backup");
                if repair {
                    self.store.recover_from_backup()
                } else {
                    self.store.load_backup()
                }
            }
            other => other,
        }
    }

    /// Plan `batch` without writing anything.
    pub fn plan(&self, batch: &Batch) -> Result<PlanReport> {
        let registry = self.load_registry(false)?;
        let plan = plan::plan(&self.root, &registry, batch, &self.config, false)?;
        Ok(plan.report())
    }

    /// Apply `batch` as one transaction.
    ///
    /// `strict` (or `apply.strict` in the config) turns any conflict into
    /// an abort.
    ///
    /// # Errors
    ///
    /// Errors that abort before anything is staged: lock timeout, registry
    /// corruption, unknown integration, validation failures, and conflicts
    /// in strict mode. Failures after staging begins are not errors; they
    /// produce a [`TransactionState::RolledBack`] report.
    pub fn apply(&self, batch: &Batch, strict: bool) -> Result<ApplyReport> {
        let strict = strict || self.config.apply.strict;
        let mut txn = Transaction::begin(batch);

        let prepared = self.prepare(batch, strict);
        let (_lock, registry, plan) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(txn = %txn.id, error = %e, "transaction: aborted during planning");
                txn.advance(TransactionState::Aborted);
                return Err(e);
            }
        };

        txn.advance(TransactionState::Staging);
        let now = Local::now();
        let mut journal = Journal::new(self.hook.as_ref());
        let mut skipped = Vec::new();
        let mut backups = Vec::with_capacity(plan.ops.len());
        for op in &plan.ops {
            match self.stage_op(&mut journal, op, &now) {
                Ok(staged) => {
                    skipped.extend(staged.conflict);
                    backups.push(staged.backup);
                }
                Err(e) => return Ok(self.roll_back(txn, journal, &plan, skipped, &e)),
            }
        }

        txn.advance(TransactionState::Committing);
        if let Err(e) = journal.promote_all() {
            return Ok(self.roll_back(txn, journal, &plan, skipped, &e));
        }

        let registry_saved = match self.commit_registry(&registry, &plan, now.with_timezone(&Utc)) {
            Ok(saved) => saved,
            Err(e) => return Ok(self.roll_back(txn, journal, &plan, skipped, &e)),
        };

        journal.finish();
        txn.advance(TransactionState::Committed);

        let report = committed_report(&plan, skipped, backups, registry_saved);
        info!(
            txn = %txn.id,
            applied = report.applied.len(),
            conflicts = report.skipped_conflicts.len(),
            unchanged = report.unchanged.len(),
            "transaction: committed"
        );
        Ok(report)
    }

    fn prepare<'b>(
        &self,
        batch: &'b Batch,
        strict: bool,
    ) -> Result<(crate::lock::RegistryLockGuard, Registry, Plan<'b>)> {
        let lock = RegistryLock::acquire(&self.store.lock_path(), &self.config.lock)?;
        let registry = self.load_registry(true)?;
        if registry.integration(&batch.integration_id).is_none() {
            return Err(SyncError::IntegrationNotFound(batch.integration_id.clone()));
        }
        let plan = plan::plan(&self.root, &registry, batch, &self.config, strict)?;
        Ok((lock, registry, plan))
    }

    /// Stage the filesystem changes for one planned operation.
    fn stage_op(
        &self,
        journal: &mut Journal<'_>,
        op: &plan::PlannedOp<'_>,
        now: &DateTime<Local>,
    ) -> Result<Staged> {
        let destination = op.destination.as_path();
        let mut staged = Staged::default();
        if op.backup {
            staged.backup = Some(stage_backup(journal, destination, now)?);
        }
        match op.action {
            Action::Write | Action::OverwriteWithBackup => {
                let content = op.item.operation.content().unwrap_or_default();
                journal.stage_write(destination, content)?;
            }
            Action::Rename => {
                let content = op.item.operation.content().unwrap_or_default();
                journal.stage_write(destination, content)?;
                if op.remove_previous
                    && let Some(previous) = &op.previous
                {
                    journal.stage_remove(previous);
                }
                info!(
                    from = ?op.previous.as_ref().map(|p| p.display().to_string()),
                    to = %destination.display(),
                    "transaction: rename staged"
                );
            }
            Action::Delete => journal.stage_remove(destination),
            Action::SoftDelete => {
                staged.backup = Some(stage_backup(journal, destination, now)?);
                journal.stage_remove(destination);
            }
            Action::SkipConflict => {
                let (subject, label) = op.conflict_subject();
                let local = std::fs::read(subject).map_err(|e| SyncError::StagingIo {
                    path: subject.to_path_buf(),
                    source: e,
                })?;
                let proposed = op.item.operation.content().unwrap_or_default();
                let text = diff::render_conflict_diff(
                    label,
                    &local,
                    proposed,
                    self.config.apply.diff_context_lines,
                );
                let artifact = diff::diff_artifact_path(subject, now).map_err(|e| {
                    SyncError::StagingIo {
                        path: subject.to_path_buf(),
                        source: e,
                    }
                })?;
                journal.stage_write(&artifact, text.as_bytes())?;
                warn!(
                    destination = %subject.display(),
                    diff = %artifact.display(),
                    "transaction: conflict skipped, diff artifact staged"
                );
                staged.conflict = Some(SkippedConflict {
                    source_path: op.item.source_path.clone(),
                    destination: op.destination.clone(),
                    reason: op.conflict.unwrap_or(ConflictReason::LocalEdit),
                    diff_artifact: Some(artifact),
                });
            }
            Action::Adopt | Action::Noop | Action::Forget | Action::KeepDeleted => {}
        }
        Ok(staged)
    }

    /// Apply record changes and save the registry if anything changed.
    fn commit_registry(&self, registry: &Registry, plan: &Plan<'_>, now: DateTime<Utc>) -> Result<bool> {
        let batch = plan.batch;
        let mut next = registry.clone();
        for op in &plan.ops {
            match &op.record_change {
                RecordChange::Keep => {}
                RecordChange::Upsert(hash) => next.upsert(
                    &batch.integration_id,
                    ArtifactRecord {
                        source_path: op.item.source_path.clone(),
                        destination_path: op.destination.clone(),
                        last_known_hash: hash.clone(),
                        last_known_revision: batch.revision.clone(),
                        kind: op.item.kind,
                        updated_at: now,
                    },
                )?,
                RecordChange::Remove => {
                    next.remove_artifact(&batch.integration_id, &op.item.source_path);
                }
                RecordChange::Move {
                    previous_source,
                    hash,
                } => {
                    next.remove_artifact(&batch.integration_id, previous_source);
                    next.upsert(
                        &batch.integration_id,
                        ArtifactRecord {
                            source_path: op.item.source_path.clone(),
                            destination_path: op.destination.clone(),
                            last_known_hash: hash.clone(),
                            last_known_revision: batch.revision.clone(),
                            kind: op.item.kind,
                            updated_at: now,
                        },
                    )?;
                }
            }
        }
        if !batch.is_empty()
            && let Some(integration) = next.integration_mut(&batch.integration_id)
        {
            integration.last_revision = Some(batch.revision.clone());
        }
        if next == *registry {
            return Ok(false);
        }
        self.hook
            .before_registry_save()
            .map_err(|e| SyncError::io(self.store.path(), e))?;
        self.store.save(&next)?;
        Ok(true)
    }

    fn roll_back(
        &self,
        mut txn: Transaction,
        mut journal: Journal<'_>,
        plan: &Plan<'_>,
        skipped: Vec<SkippedConflict>,
        cause: &SyncError,
    ) -> ApplyReport {
        error!(txn = %txn.id, error = %cause, "transaction: failed, rolling back");
        let mut errors = vec![ReportedError::from(cause)];
        errors.extend(journal.rollback());
        txn.advance(TransactionState::RolledBack);
        ApplyReport {
            integration_id: plan.batch.integration_id.clone(),
            revision: plan.batch.revision.clone(),
            state: TransactionState::RolledBack,
            applied: Vec::new(),
            skipped_conflicts: skipped
                .into_iter()
                .map(|s| SkippedConflict {
                    diff_artifact: None,
                    ..s
                })
                .collect(),
            unchanged: Vec::new(),
            kept: Vec::new(),
            errors,
            registry_saved: false,
        }
    }
}

/// What staging produced for one operation besides the journal entries.
#[derive(Debug, Default)]
struct Staged {
    backup: Option<PathBuf>,
    conflict: Option<SkippedConflict>,
}

/// Stage a `<dest>.bak.<timestamp>` copy of `destination`.
fn stage_backup(
    journal: &mut Journal<'_>,
    destination: &Path,
    now: &DateTime<Local>,
) -> Result<PathBuf> {
    let staging_err = |source| SyncError::StagingIo {
        path: destination.to_path_buf(),
        source,
    };
    let bytes = std::fs::read(destination).map_err(staging_err)?;
    let backup = diff::soft_delete_backup_path(destination, now).map_err(staging_err)?;
    journal.stage_write(&backup, &bytes)?;
    info!(
        destination = %destination.display(),
        backup = %backup.display(),
        "transaction: backup staged"
    );
    Ok(backup)
}

fn committed_report(
    plan: &Plan<'_>,
    skipped: Vec<SkippedConflict>,
    backups: Vec<Option<PathBuf>>,
    registry_saved: bool,
) -> ApplyReport {
    let mut applied = Vec::new();
    let mut unchanged = Vec::new();
    let mut kept = Vec::new();
    for (op, backup) in plan.ops.iter().zip(backups) {
        match op.action {
            Action::Write
            | Action::OverwriteWithBackup
            | Action::Rename
            | Action::Adopt
            | Action::Delete
            | Action::SoftDelete
            | Action::Forget => {
                applied.push(AppliedEntry {
                    source_path: op.item.source_path.clone(),
                    destination: op.destination.clone(),
                    action: op.action,
                    previous_destination: op.previous.clone(),
                    backup,
                });
            }
            Action::Noop => unchanged.push(op.destination.clone()),
            Action::KeepDeleted => kept.push(op.destination.clone()),
            Action::SkipConflict => {}
        }
    }
    ApplyReport {
        integration_id: plan.batch.integration_id.clone(),
        revision: plan.batch.revision.clone(),
        state: TransactionState::Committed,
        applied,
        skipped_conflicts: skipped,
        unchanged,
        kept,
        errors: Vec::new(),
        registry_saved,
    }
}
