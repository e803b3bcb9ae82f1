//! artisync: transactional, provenance-tracked synchronisation of imported
//! artifacts into a local tree.
//!
//! Upstream artifact trees (skills, commands, agents, hooks, config) are
//! written into an approved local root as one all-or-nothing transaction per
//! batch. A per-scope registry remembers which integration produced each file
//! and the content fingerprint last written, so a later sync can tell a
//! clean upstream update from a local edit.
//!
//! # Architecture
//!
//! - **Path containment** ([`artisync_paths`]): every destination is resolved
//!   under an [`ApprovedRoot`] before anything is touched
//! - **Fingerprints** ([`fingerprint`]): streaming SHA-256 of file content
//! - **Classification** ([`classify`]): three-way comparison of registry
//!   baseline, local file and proposed content
//! - **Transactions** ([`transaction`]): plan, stage, commit, roll back
//! - **Registry** ([`registry`]) guarded by an exclusive [`lock`]

pub mod artifact;
pub mod classify;
pub mod config;
pub mod diff;
pub mod dirs;
pub mod durable;
pub mod error;
pub mod fingerprint;
pub mod lock;
pub mod registry;
pub mod transaction;

pub use artifact::{ArtifactKind, Scope};
pub use artisync_paths::{ApprovedRoot, CaseSensitivity, PathError, ResolvedPath};
pub use classify::{Verdict, classify, classify_delete};
pub use config::{DeletePolicy, SyncConfig};
pub use error::{ErrorKind, Result, SyncError};
pub use fingerprint::{Fingerprint, fingerprint, fingerprint_file};
pub use lock::{RegistryLock, RegistryLockGuard};
pub use registry::{ArtifactRecord, IntegrationRecord, Registry, RegistryStore};
pub use transaction::{
    Action, ApplyReport, Batch, BatchBuilder, CommitHook, ConflictReason, NoopHook, Operation,
    PlanReport, SyncEngine, TransactionState,
};
