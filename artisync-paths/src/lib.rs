//! # artisync-paths
//!
//! Approved-root path containment for artisync.
//!
//! Every destination artisync writes to is first validated against an
//! [`ApprovedRoot`]. Validation is read-only: it queries filesystem metadata
//! through a [`Resolver`] and never creates, opens, or modifies anything.
//!
//! ## Rules
//!
//! - Candidates are relative to the root; absolute candidates are refused.
//! - Any `..` segment is refused before resolution, even if the result would
//!   stay inside the root.
//! - Symlinks are followed fully. Each link crossed under the root must
//!   resolve back inside the root, regardless of where the leaf ends up.
//! - Containment is decided on NFC-normalised components, case-folded when
//!   the destination volume ignores case.

pub mod compare;
pub mod error;
pub mod resolver;
mod root;

pub use compare::{CaseSensitivity, is_within, paths_overlap};
pub use error::{PathError, Result};
pub use resolver::{EntryKind, FsResolver, Resolver};
pub use root::{ApprovedRoot, MAX_SYMLINK_HOPS, ResolvedPath};
