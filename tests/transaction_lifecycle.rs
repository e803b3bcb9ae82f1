//! End-to-end transaction tests against real temporary directories.
//!
//! Each test builds an approved root and a data directory under a fresh
//! `TempDir`, registers one integration, and drives [`SyncEngine`] through
//! plan/apply cycles.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use artisync::artifact::destination_for;
use artisync::registry::IntegrationRecord;
use artisync::{
    Action, ApprovedRoot, ArtifactKind, Batch, CommitHook, ConflictReason, DeletePolicy,
    Operation, PathError, RegistryStore, Scope, SyncConfig, SyncEngine, SyncError,
    TransactionState, Verdict, fingerprint,
};
use artisync::transaction::BatchItem;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

// ── Test helpers ──────────────────────────────────────────────────────────────

const INTEGRATION: &str = "user-tools";

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    data: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("root");
        let data = dir.path().join("data");
        std::fs::create_dir_all(&root).expect("create root");
        Self {
            _dir: dir,
            root,
            data,
        }
    }

    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::default();
        config.paths.data_dir = Some(self.data.clone());
        config.lock.timeout_ms = 200;
        config.lock.poll_interval_ms = 10;
        config
    }

    fn engine_with(&self, config: SyncConfig) -> SyncEngine {
        let root = ApprovedRoot::new(&self.root).expect("approved root");
        let store = RegistryStore::for_scope(&self.data, Scope::User);
        let engine = SyncEngine::new(root, store, config);
        engine
            .register_integration(IntegrationRecord::new(
                INTEGRATION,
                "https://github.com/acme/tools",
                Scope::User,
            ))
            .expect("register integration");
        engine
    }

    fn engine(&self) -> SyncEngine {
        self.engine_with(self.config())
    }

    fn store(&self) -> RegistryStore {
        RegistryStore::for_scope(&self.data, Scope::User)
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.root.join(rel)).expect("read destination")
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, content).expect("write");
    }
}

fn skill_path(i: usize) -> String {
    format!("skills/s{i}/SKILL.md")
}

fn create_batch(revision: &str, count: usize, body: &str) -> Batch {
    (0..count)
        .fold(Batch::builder(INTEGRATION, revision), |b, i| {
            b.create(
                skill_path(i),
                ArtifactKind::Skill,
                skill_path(i),
                format!("{body} {i}\n"),
            )
        })
        .build()
        .expect("batch")
}

fn update_batch(revision: &str, count: usize, body: &str) -> Batch {
    (0..count)
        .fold(Batch::builder(INTEGRATION, revision), |b, i| {
            b.update(
                skill_path(i),
                ArtifactKind::Skill,
                skill_path(i),
                format!("{body} {i}\n"),
                None,
            )
        })
        .build()
        .expect("batch")
}

/// Every file name under `dir`, recursively.
fn all_names(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).expect("read_dir").flatten() {
            let path = entry.path();
            names.push(entry.file_name().to_string_lossy().into_owned());
            if path.is_dir() {
                pending.push(path);
            }
        }
    }
    names
}

fn leftover_temps(dir: &Path) -> Vec<String> {
    all_names(dir)
        .into_iter()
        .filter(|n| n.contains(".artisync-"))
        .collect()
}

/// Fails promotion number `at`.
struct FailAt(usize);

impl CommitHook for FailAt {
    fn before_promote(&self, index: usize, _destination: &Path) -> io::Result<()> {
        if index == self.0 {
            Err(io::Error::other("injected failure"))
        } else {
            Ok(())
        }
    }
}

/// Panics before promotion number `at`, simulating a crash mid-commit.
struct PanicAt(usize);

impl CommitHook for PanicAt {
    fn before_promote(&self, index: usize, _destination: &Path) -> io::Result<()> {
        if index == self.0 {
            panic!("simulated crash");
        }
        Ok(())
    }
}

struct FailRegistrySave;

impl CommitHook for FailRegistrySave {
    fn before_registry_save(&self) -> io::Result<()> {
        Err(io::Error::other("disk full"))
    }
}

// ── Apply and idempotence ─────────────────────────────────────────────────────

#[test]
fn first_apply_writes_and_records_every_artifact() {
    let f = Fixture::new();
    let engine = f.engine();

    let report = engine.apply(&create_batch("r1", 3, "v1"), false).expect("apply");

    assert_eq!(report.state, TransactionState::Committed);
    assert_eq!(report.files_changed(), 3);
    assert!(report.registry_saved);
    assert_eq!(f.read("skills/s1/SKILL.md"), "v1 1\n");

    let registry = f.store().load().expect("load");
    let integration = registry.integration(INTEGRATION).expect("integration");
    assert_eq!(integration.artifacts.len(), 3);
    assert_eq!(integration.last_revision.as_deref(), Some("r1"));
    let record = registry.artifact(INTEGRATION, "skills/s0/SKILL.md").expect("record");
    assert_eq!(record.last_known_hash, fingerprint(b"v1 0\n"));
    assert_eq!(record.last_known_revision, "r1");
}

#[test]
fn reapplying_same_batch_writes_nothing() {
    let f = Fixture::new();
    let engine = f.engine();
    let batch = create_batch("r1", 3, "v1");
    engine.apply(&batch, false).expect("first apply");

    let registry_path = f.store().path().to_path_buf();
    let registry_bytes = std::fs::read(&registry_path).expect("registry bytes");
    let registry_mtime = std::fs::metadata(&registry_path).and_then(|m| m.modified()).expect("mtime");
    let dest_mtime = std::fs::metadata(f.root.join("skills/s0/SKILL.md"))
        .and_then(|m| m.modified())
        .expect("mtime");

    let plan = engine.plan(&batch).expect("plan");
    assert!(plan.entries.iter().all(|e| e.verdict == Verdict::Unchanged));
    assert!(plan.would_write().is_empty());

    let report = engine.apply(&batch, false).expect("second apply");
    assert!(report.is_committed());
    assert_eq!(report.files_changed(), 0);
    assert_eq!(report.unchanged.len(), 3);
    assert!(!report.registry_saved);

    assert_eq!(std::fs::read(&registry_path).expect("registry bytes"), registry_bytes);
    assert_eq!(
        std::fs::metadata(&registry_path).and_then(|m| m.modified()).expect("mtime"),
        registry_mtime
    );
    assert_eq!(
        std::fs::metadata(f.root.join("skills/s0/SKILL.md"))
            .and_then(|m| m.modified())
            .expect("mtime"),
        dest_mtime
    );
}

#[test]
fn clean_upstream_update_is_applied() {
    let f = Fixture::new();
    let engine = f.engine();
    engine.apply(&create_batch("r1", 2, "v1"), false).expect("apply v1");

    let report = engine.apply(&update_batch("r2", 2, "v2"), false).expect("apply v2");

    assert!(report.is_committed());
    assert_eq!(report.files_changed(), 2);
    assert_eq!(f.read("skills/s0/SKILL.md"), "v2 0\n");
    let record = f
        .store()
        .load()
        .expect("load")
        .artifact(INTEGRATION, "skills/s1/SKILL.md")
        .cloned()
        .expect("record");
    assert_eq!(record.last_known_hash, fingerprint(b"v2 1\n"));
    assert_eq!(record.last_known_revision, "r2");
}

#[test]
fn plan_touches_nothing() {
    let f = Fixture::new();
    let engine = f.engine();
    let before = f.store().load().expect("load");

    let plan = engine.plan(&create_batch("r1", 2, "v1")).expect("plan");

    assert_eq!(plan.would_write().len(), 2);
    assert!(!f.root.join("skills").exists());
    assert_eq!(f.store().load().expect("load"), before);
}

// ── Conflicts ─────────────────────────────────────────────────────────────────

#[test]
fn local_edit_is_preserved_and_one_diff_is_emitted() {
    let f = Fixture::new();
    let engine = f.engine();
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply v1");
    f.write("skills/s0/SKILL.md", "my local notes\n");

    let report = engine.apply(&update_batch("r2", 1, "v2"), false).expect("apply v2");

    assert!(report.is_committed());
    assert_eq!(report.files_changed(), 0);
    assert_eq!(report.skipped_conflicts.len(), 1);
    assert_eq!(f.read("skills/s0/SKILL.md"), "my local notes\n");

    let diffs: Vec<String> = all_names(&f.root.join("skills/s0"))
        .into_iter()
        .filter(|n| n.starts_with("SKILL.md.diff."))
        .collect();
    assert_eq!(diffs.len(), 1);
    let artifact = report.skipped_conflicts[0]
        .diff_artifact
        .clone()
        .expect("diff artifact");
    let text = std::fs::read_to_string(artifact).expect("read diff");
    assert!(text.contains("(local)"));
    assert!(text.contains("(upstream)"));
    assert!(text.contains("-my local notes"));
    assert!(text.contains("+v2 0"));

    // Baseline stays at the last imported content.
    let record = f
        .store()
        .load()
        .expect("load")
        .artifact(INTEGRATION, "skills/s0/SKILL.md")
        .cloned()
        .expect("record");
    assert_eq!(record.last_known_hash, fingerprint(b"v1 0\n"));
}

#[test]
fn untracked_file_in_the_way_is_not_overwritten() {
    let f = Fixture::new();
    let engine = f.engine();
    f.write("skills/s0/SKILL.md", "hand written\n");

    let report = engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");

    assert_eq!(report.skipped_conflicts.len(), 1);
    assert_eq!(f.read("skills/s0/SKILL.md"), "hand written\n");
}

#[test]
fn identical_untracked_file_is_adopted_without_a_write() {
    let f = Fixture::new();
    let engine = f.engine();
    f.write("skills/s0/SKILL.md", "v1 0\n");

    let report = engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");

    assert_eq!(report.applied.len(), 1);
    assert_eq!(report.applied[0].action, Action::Adopt);
    assert_eq!(report.files_changed(), 0);
    assert!(
        f.store()
            .load()
            .expect("load")
            .artifact(INTEGRATION, "skills/s0/SKILL.md")
            .is_some()
    );
}

#[test]
fn strict_mode_aborts_whole_batch_on_conflict() {
    let f = Fixture::new();
    let engine = f.engine();
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply v1");
    f.write("skills/s0/SKILL.md", "edited\n");

    let batch = Batch::builder(INTEGRATION, "r2")
        .update("skills/s0/SKILL.md", ArtifactKind::Skill, "skills/s0/SKILL.md", "v2\n", None)
        .create("agents/new.md", ArtifactKind::Agent, "agents/new.md", "agent\n")
        .build()
        .expect("batch");
    let result = engine.apply(&batch, true);

    assert!(matches!(result, Err(SyncError::ConflictDetected { count: 1, .. })));
    assert!(!f.root.join("agents").exists());
    assert!(leftover_temps(&f.root).is_empty());
}

// ── Rollback ──────────────────────────────────────────────────────────────────

#[test]
fn failure_mid_commit_restores_every_destination() {
    let f = Fixture::new();
    f.engine().apply(&create_batch("r1", 5, "v1"), false).expect("apply v1");
    let registry_before = std::fs::read(f.store().path()).expect("registry");

    let engine = f.engine().with_hook(Arc::new(FailAt(2)));
    let report = engine.apply(&update_batch("r2", 5, "v2"), false).expect("report");

    assert_eq!(report.state, TransactionState::RolledBack);
    assert!(!report.errors.is_empty());
    assert!(report.applied.is_empty());
    for i in 0..5 {
        assert_eq!(f.read(&skill_path(i)), format!("v1 {i}\n"));
    }
    assert!(leftover_temps(&f.root).is_empty(), "{:?}", leftover_temps(&f.root));
    assert_eq!(std::fs::read(f.store().path()).expect("registry"), registry_before);
}

#[test]
fn failed_registry_save_rolls_back_created_files() {
    let f = Fixture::new();
    let engine = f.engine().with_hook(Arc::new(FailRegistrySave));

    let report = engine.apply(&create_batch("r1", 3, "v1"), false).expect("report");

    assert_eq!(report.state, TransactionState::RolledBack);
    assert!(!f.root.join("skills/s0/SKILL.md").exists());
    assert!(!f.root.join("skills").exists(), "created directories are removed");
    assert!(leftover_temps(&f.root).is_empty());
    let registry = f.store().load().expect("load");
    assert!(registry.integration(INTEGRATION).expect("integration").artifacts.is_empty());
}

#[test]
fn crash_during_commit_leaves_old_content() {
    let f = Fixture::new();
    f.engine().apply(&create_batch("r1", 5, "v1"), false).expect("apply v1");

    let engine = f.engine().with_hook(Arc::new(PanicAt(3)));
    let batch = update_batch("r2", 5, "v2");
    let outcome = catch_unwind(AssertUnwindSafe(|| engine.apply(&batch, false)));

    assert!(outcome.is_err());
    for i in 0..5 {
        assert_eq!(f.read(&skill_path(i)), format!("v1 {i}\n"));
    }
    assert!(leftover_temps(&f.root).is_empty());

    // The lock was released on unwind; a fresh engine can commit.
    let report = f.engine().apply(&batch, false).expect("retry");
    assert!(report.is_committed());
    assert_eq!(f.read(&skill_path(4)), "v2 4\n");
}

// ── Validation ────────────────────────────────────────────────────────────────

#[test]
fn traversal_aborts_before_any_write() {
    let f = Fixture::new();
    let engine = f.engine();
    let batch = Batch::builder(INTEGRATION, "r1")
        .create("skills/ok/SKILL.md", ArtifactKind::Skill, "skills/ok/SKILL.md", "ok\n")
        .create("skills/bad/SKILL.md", ArtifactKind::Skill, "../escape.md", "bad\n")
        .build()
        .expect("batch");

    let result = engine.apply(&batch, false);

    assert!(matches!(
        result,
        Err(SyncError::Validation(PathError::TraversalAttempt(_)))
    ));
    assert!(!f.root.join("skills").exists());
    assert!(!f.root.parent().expect("parent").join("escape.md").exists());
}

#[test]
fn overlapping_destinations_are_rejected() {
    let result = Batch::builder(INTEGRATION, "r1")
        .create("a", ArtifactKind::Skill, "skills/a", "x")
        .create("b", ArtifactKind::Skill, "skills/a/SKILL.md", "y")
        .build();

    assert!(matches!(result, Err(SyncError::OverlappingDestinations { .. })));
}

#[test]
fn staged_only_kind_requires_imported_location() {
    let f = Fixture::new();
    let engine = f.engine();

    let active = Batch::builder(INTEGRATION, "r1")
        .create("hooks/pre.sh", ArtifactKind::Hook, "hooks/pre.sh", "#!/bin/sh\n")
        .build()
        .expect("batch");
    assert!(matches!(
        engine.apply(&active, false),
        Err(SyncError::StagedOnlyViolation { .. })
    ));

    let staged = Batch::builder(INTEGRATION, "r1")
        .create(
            "hooks/pre.sh",
            ArtifactKind::Hook,
            destination_for(ArtifactKind::Hook, "pre.sh", "acme-tools"),
            "#!/bin/sh\n",
        )
        .build()
        .expect("batch");
    let report = engine.apply(&staged, false).expect("apply staged");
    assert_eq!(report.files_changed(), 1);
    assert!(f.root.join("hooks.imported.acme-tools/pre.sh").exists());
}

#[test]
fn destination_owned_by_another_integration_is_refused() {
    let f = Fixture::new();
    let engine = f.engine();
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");
    engine
        .register_integration(IntegrationRecord::new("user-other", "/src/other", Scope::User))
        .expect("register");

    let batch = Batch::builder("user-other", "x1")
        .create("SKILL.md", ArtifactKind::Skill, "skills/s0/SKILL.md", "theirs\n")
        .build()
        .expect("batch");
    let result = engine.apply(&batch, false);

    assert!(matches!(result, Err(SyncError::OwnershipConflict { .. })));
    assert_eq!(f.read("skills/s0/SKILL.md"), "v1 0\n");
}

#[test]
fn unknown_integration_is_refused() {
    let f = Fixture::new();
    let engine = f.engine();
    let batch = Batch::builder("nobody", "r1")
        .create("a.md", ArtifactKind::Command, "commands/a.md", "a\n")
        .build()
        .expect("batch");

    assert!(matches!(
        engine.apply(&batch, false),
        Err(SyncError::IntegrationNotFound(_))
    ));
}

#[cfg(unix)]
#[test]
fn staging_name_symlinked_onto_active_directory_is_refused() {
    let f = Fixture::new();
    let engine = f.engine();
    std::fs::create_dir_all(f.root.join("hooks")).expect("mkdir hooks");
    std::os::unix::fs::symlink("hooks", f.root.join("hooks.imported.evil")).expect("symlink");

    let batch = Batch::builder(INTEGRATION, "r1")
        .create("hooks/pre.sh", ArtifactKind::Hook, "hooks.imported.evil/pre.sh", "#!/bin/sh\n")
        .build()
        .expect("batch");

    assert!(matches!(
        engine.apply(&batch, false),
        Err(SyncError::StagedOnlyViolation { .. })
    ));
    assert!(!f.root.join("hooks/pre.sh").exists());
}

#[test]
fn staging_marker_inside_active_directory_is_refused() {
    let f = Fixture::new();
    let engine = f.engine();
    let batch = Batch::builder(INTEGRATION, "r1")
        .create("hooks/pre.sh", ArtifactKind::Hook, "hooks/pre.imported.sh", "#!/bin/sh\n")
        .build()
        .expect("batch");

    assert!(matches!(
        engine.apply(&batch, false),
        Err(SyncError::StagedOnlyViolation { .. })
    ));
    assert!(!f.root.join("hooks").exists());
}

#[test]
fn duplicate_source_path_is_refused_before_any_write() {
    let f = Fixture::new();
    let engine = f.engine();
    let item = |dest: &str| BatchItem {
        source_path: "skills/x/SKILL.md".into(),
        kind: ArtifactKind::Skill,
        operation: Operation::Create {
            destination: dest.into(),
            content: b"x\n".to_vec(),
        },
    };
    let batch = Batch {
        integration_id: INTEGRATION.into(),
        revision: "r1".into(),
        items: vec![item("skills/a/SKILL.md"), item("skills/b/SKILL.md")],
    };

    assert!(matches!(
        engine.apply(&batch, false),
        Err(SyncError::DuplicateSourcePath(_))
    ));
    assert!(!f.root.join("skills").exists());
    assert!(
        f.store()
            .load()
            .expect("load")
            .integration(INTEGRATION)
            .expect("integration")
            .artifacts
            .is_empty()
    );
}

// ── Deletes ───────────────────────────────────────────────────────────────────

fn delete_batch(revision: &str) -> Batch {
    Batch::builder(INTEGRATION, revision)
        .delete(skill_path(0), ArtifactKind::Skill, skill_path(0), None)
        .build()
        .expect("batch")
}

fn engine_with_policy(f: &Fixture, policy: DeletePolicy) -> SyncEngine {
    let mut config = f.config();
    config.apply.delete_policy = policy;
    f.engine_with(config)
}

#[test]
fn skip_policy_keeps_deleted_artifact() {
    let f = Fixture::new();
    let engine = engine_with_policy(&f, DeletePolicy::Skip);
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");

    let report = engine.apply(&delete_batch("r2"), false).expect("delete");

    assert_eq!(report.kept.len(), 1);
    assert_eq!(f.read(&skill_path(0)), "v1 0\n");
}

#[test]
fn soft_policy_removes_and_keeps_backup() {
    let f = Fixture::new();
    let engine = engine_with_policy(&f, DeletePolicy::Soft);
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");

    let report = engine.apply(&delete_batch("r2"), false).expect("delete");

    assert_eq!(report.files_changed(), 1);
    assert!(!f.root.join(skill_path(0)).exists());
    let backups: Vec<String> = all_names(&f.root.join("skills/s0"))
        .into_iter()
        .filter(|n| n.starts_with("SKILL.md.bak."))
        .collect();
    assert_eq!(backups.len(), 1);
    let backup = f.root.join("skills/s0").join(&backups[0]);
    assert_eq!(std::fs::read_to_string(backup).expect("backup"), "v1 0\n");
    assert!(
        f.store()
            .load()
            .expect("load")
            .artifact(INTEGRATION, &skill_path(0))
            .is_none()
    );
}

#[test]
fn hard_policy_removes_outright() {
    let f = Fixture::new();
    let engine = engine_with_policy(&f, DeletePolicy::Hard);
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");

    let report = engine.apply(&delete_batch("r2"), false).expect("delete");

    assert_eq!(report.files_changed(), 1);
    assert!(!f.root.join(skill_path(0)).exists());
    assert!(all_names(&f.root.join("skills/s0")).is_empty());
}

#[test]
fn locally_modified_file_is_never_deleted() {
    let f = Fixture::new();
    let engine = engine_with_policy(&f, DeletePolicy::Hard);
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");
    f.write(&skill_path(0), "mine now\n");

    let report = engine.apply(&delete_batch("r2"), false).expect("delete");

    assert_eq!(report.skipped_conflicts.len(), 1);
    assert_eq!(f.read(&skill_path(0)), "mine now\n");
}

#[test]
fn edited_file_is_reported_as_conflict_under_skip_policy() {
    let f = Fixture::new();
    let engine = engine_with_policy(&f, DeletePolicy::Skip);
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");
    f.write(&skill_path(0), "mine now\n");

    let report = engine.apply(&delete_batch("r2"), false).expect("delete");

    assert_eq!(report.skipped_conflicts.len(), 1);
    assert_eq!(report.skipped_conflicts[0].reason, ConflictReason::LocalEdit);
    assert!(report.kept.is_empty());
    assert_eq!(f.read(&skill_path(0)), "mine now\n");
    assert!(matches!(
        engine.apply(&delete_batch("r2"), true),
        Err(SyncError::ConflictDetected { count: 1, .. })
    ));
}

// ── Overwrite with backup and renames ─────────────────────────────────────────

fn backups_of(dir: &Path, name: &str) -> Vec<String> {
    all_names(dir)
        .into_iter()
        .filter(|n| n.starts_with(&format!("{name}.bak.")))
        .collect()
}

#[test]
fn untracked_file_is_backed_up_then_overwritten_when_enabled() {
    let f = Fixture::new();
    let mut config = f.config();
    config.apply.overwrite_untracked_with_backup = true;
    let engine = f.engine_with(config);
    f.write("skills/s0/SKILL.md", "hand written\n");

    let report = engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");

    assert!(report.skipped_conflicts.is_empty());
    assert_eq!(report.applied[0].action, Action::OverwriteWithBackup);
    assert_eq!(f.read("skills/s0/SKILL.md"), "v1 0\n");
    let backups = backups_of(&f.root.join("skills/s0"), "SKILL.md");
    assert_eq!(backups.len(), 1);
    let backup = report.applied[0].backup.clone().expect("backup path");
    assert_eq!(std::fs::read_to_string(backup).expect("backup"), "hand written\n");
}

#[test]
fn failed_overwrite_leaves_no_backup_behind() {
    let f = Fixture::new();
    let mut config = f.config();
    config.apply.overwrite_untracked_with_backup = true;
    let engine = f.engine_with(config).with_hook(Arc::new(FailRegistrySave));
    f.write("skills/s0/SKILL.md", "hand written\n");

    let report = engine.apply(&create_batch("r1", 1, "v1"), false).expect("report");

    assert_eq!(report.state, TransactionState::RolledBack);
    assert_eq!(f.read("skills/s0/SKILL.md"), "hand written\n");
    assert!(backups_of(&f.root.join("skills/s0"), "SKILL.md").is_empty());
    assert!(leftover_temps(&f.root).is_empty());
}

fn rename_batch(revision: &str, content: &str) -> Batch {
    Batch::builder(INTEGRATION, revision)
        .rename(
            "commands/old.md",
            "commands/new.md",
            ArtifactKind::Command,
            "commands/old.md",
            "commands/new.md",
            content,
        )
        .build()
        .expect("batch")
}

fn create_command(engine: &SyncEngine) {
    let batch = Batch::builder(INTEGRATION, "r1")
        .create("commands/old.md", ArtifactKind::Command, "commands/old.md", "cmd\n")
        .build()
        .expect("batch");
    engine.apply(&batch, false).expect("apply");
}

#[test]
fn rename_moves_file_and_record() {
    let f = Fixture::new();
    let engine = f.engine();
    create_command(&engine);

    let report = engine.apply(&rename_batch("r2", "cmd v2\n"), false).expect("rename");

    assert!(report.is_committed());
    assert_eq!(report.applied[0].action, Action::Rename);
    assert_eq!(
        report.applied[0].previous_destination.as_deref(),
        Some(engine.root().path().join("commands/old.md").as_path())
    );
    assert!(!f.root.join("commands/old.md").exists());
    assert_eq!(f.read("commands/new.md"), "cmd v2\n");
    let registry = f.store().load().expect("load");
    assert!(registry.artifact(INTEGRATION, "commands/old.md").is_none());
    let record = registry.artifact(INTEGRATION, "commands/new.md").expect("moved record");
    assert_eq!(record.last_known_hash, fingerprint(b"cmd v2\n"));
    assert!(leftover_temps(&f.root).is_empty());

    // Once moved, the same rename is an ordinary no-op update.
    let again = engine.apply(&rename_batch("r2", "cmd v2\n"), false).expect("again");
    assert_eq!(again.files_changed(), 0);
}

#[test]
fn rename_of_locally_edited_file_changes_nothing() {
    let f = Fixture::new();
    let engine = f.engine();
    create_command(&engine);
    f.write("commands/old.md", "my edits\n");

    let report = engine.apply(&rename_batch("r2", "cmd v2\n"), false).expect("rename");

    assert_eq!(report.skipped_conflicts.len(), 1);
    assert_eq!(report.skipped_conflicts[0].reason, ConflictReason::RenameLocalEdit);
    assert_eq!(f.read("commands/old.md"), "my edits\n");
    assert!(!f.root.join("commands/new.md").exists());
    let diff = report.skipped_conflicts[0].diff_artifact.clone().expect("diff");
    assert!(diff.file_name().expect("name").to_string_lossy().starts_with("old.md.diff."));
    let registry = f.store().load().expect("load");
    assert!(registry.artifact(INTEGRATION, "commands/old.md").is_some());
    assert!(registry.artifact(INTEGRATION, "commands/new.md").is_none());
}

#[test]
fn rename_onto_untracked_file_needs_overwrite_option() {
    let f = Fixture::new();
    create_command(&f.engine());
    f.write("commands/new.md", "somebody else\n");

    let report = f.engine().apply(&rename_batch("r2", "cmd\n"), false).expect("rename");
    assert_eq!(
        report.skipped_conflicts[0].reason,
        ConflictReason::UntrackedDestinationExists
    );
    assert!(f.root.join("commands/old.md").exists());

    let mut config = f.config();
    config.apply.overwrite_untracked_with_backup = true;
    let report = f.engine_with(config).apply(&rename_batch("r2", "cmd\n"), false).expect("rename");
    assert_eq!(report.applied[0].action, Action::Rename);
    assert!(report.applied[0].backup.is_some());
    assert!(!f.root.join("commands/old.md").exists());
    assert_eq!(f.read("commands/new.md"), "cmd\n");
    assert_eq!(backups_of(&f.root.join("commands"), "new.md").len(), 1);
}

// ── Registry and lock ─────────────────────────────────────────────────────────

#[test]
fn held_lock_times_out_as_retryable_error() {
    let f = Fixture::new();
    let engine = f.engine();
    let config = f.config();
    let _held = artisync::RegistryLock::acquire(&f.store().lock_path(), &config.lock)
        .expect("hold lock");

    let result = engine.apply(&create_batch("r1", 1, "v1"), false);

    let err = result.expect_err("lock contention");
    assert!(matches!(err, SyncError::LockTimeout { .. }));
    assert!(err.is_retryable());
    assert!(!f.root.join("skills").exists());
}

#[test]
fn corrupt_registry_blocks_apply_until_reinitialized() {
    let f = Fixture::new();
    let engine = f.engine();
    std::fs::write(f.store().path(), b"{ not json").expect("corrupt");

    let result = engine.apply(&create_batch("r1", 1, "v1"), false);
    assert!(matches!(result, Err(SyncError::RegistryCorrupt { .. })));
    assert!(!f.root.join("skills").exists());

    let fresh = f.store().reinitialize().expect("reinitialize");
    assert!(fresh.integrations.is_empty());
    assert!(
        all_names(&f.data)
            .iter()
            .any(|n| n.starts_with("registry.user.json.corrupt."))
    );
}

#[test]
fn registry_keeps_last_good_copy_for_recovery() {
    let f = Fixture::new();
    let engine = f.engine();
    engine.apply(&create_batch("r1", 2, "v1"), false).expect("apply");
    let good = f.store().load().expect("load");
    engine.apply(&update_batch("r2", 2, "v2"), false).expect("apply");
    std::fs::write(f.store().path(), b"{ torn").expect("corrupt");

    let recovered = engine.recover_registry().expect("recover");

    assert_eq!(recovered, good);
    assert_eq!(f.store().load().expect("load"), good);
}

#[test]
fn corrupt_registry_falls_back_to_backup_when_enabled() {
    let f = Fixture::new();
    let mut config = f.config();
    config.registry.recover_from_backup = true;
    let engine = f.engine_with(config);
    engine.apply(&create_batch("r1", 1, "v1"), false).expect("apply");
    std::fs::write(f.store().path(), b"{ torn").expect("corrupt");

    let plan = engine.plan(&update_batch("r2", 1, "v2")).expect("plan from backup");
    assert_eq!(plan.entries.len(), 1);
    assert_eq!(std::fs::read(f.store().path()).expect("read"), b"{ torn");

    let report = engine.apply(&create_batch("r2", 1, "v2"), false).expect("apply");
    assert!(report.is_committed());
    assert!(f.store().load().expect("load").integration(INTEGRATION).is_some());
}
