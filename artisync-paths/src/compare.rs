//! Canonical path comparison.
//!
//! Paths are compared component by component after NFC normalisation, and
//! additionally case-folded when the destination volume ignores case, so a
//! decomposed `e\u{301}` or an upper-cased directory name cannot slip past a
//! prefix test. Components that are not valid UTF-8 are compared byte for byte.

use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// How the destination volume treats letter case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSensitivity {
    /// Probe the volume once when the root is opened.
    #[default]
    Auto,
    Sensitive,
    Insensitive,
}

impl CaseSensitivity {
    /// Whether comparisons under `dir` should fold case.
    ///
    /// `Auto` probes `dir` with [`detect_case_insensitive`]; if the probe
    /// cannot run the volume is treated as case-insensitive, which only ever
    /// makes containment stricter.
    pub fn folds_case(self, dir: &Path) -> bool {
        match self {
            Self::Sensitive => false,
            Self::Insensitive => true,
            Self::Auto => detect_case_insensitive(dir).unwrap_or_else(|e| {
                tracing::debug!(
                    dir = %dir.display(),
                    error = %e,
                    "paths: case probe failed, assuming case-insensitive"
                );
                true
            }),
        }
    }
}

/// Probe whether the volume holding `dir` ignores case.
///
/// Creates a short-lived mixed-case file in `dir` and checks whether its
/// lower-cased name resolves to the same entry.
pub fn detect_case_insensitive(dir: &Path) -> io::Result<bool> {
    let probe_name = format!(".artisync-CaseProbe-{}", std::process::id());
    let probe = dir.join(&probe_name);
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)?;
    let folded = dir.join(probe_name.to_lowercase());
    let insensitive = std::fs::symlink_metadata(&folded).is_ok();
    let _ = std::fs::remove_file(&probe);
    Ok(insensitive)
}

/// Canonical text form of one path component.
pub fn canonical_component(component: &str, fold_case: bool) -> String {
    let normalized: String = component.nfc().collect();
    if fold_case {
        normalized.to_lowercase()
    } else {
        normalized
    }
}

fn components_match(left: &OsStr, right: &OsStr, fold_case: bool) -> bool {
    match (left.to_str(), right.to_str()) {
        (Some(l), Some(r)) => canonical_component(l, fold_case) == canonical_component(r, fold_case),
        _ => left == right,
    }
}

/// True when `path` is `root` or lies beneath it.
pub fn is_within(path: &Path, root: &Path, fold_case: bool) -> bool {
    let mut path_parts = path.components().filter(|c| !matches!(c, Component::CurDir));
    for root_part in root.components().filter(|c| !matches!(c, Component::CurDir)) {
        match path_parts.next() {
            Some(part) => {
                if !components_match(part.as_os_str(), root_part.as_os_str(), fold_case) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

/// The part of `path` below `root`, or `None` when `path` is not within it.
pub fn strip_root(path: &Path, root: &Path, fold_case: bool) -> Option<PathBuf> {
    let mut path_parts = path.components().filter(|c| !matches!(c, Component::CurDir));
    for root_part in root.components().filter(|c| !matches!(c, Component::CurDir)) {
        let part = path_parts.next()?;
        if !components_match(part.as_os_str(), root_part.as_os_str(), fold_case) {
            return None;
        }
    }
    Some(path_parts.collect())
}

/// True when the two paths are equal or one contains the other.
pub fn paths_overlap(a: &Path, b: &Path, fold_case: bool) -> bool {
    is_within(a, b, fold_case) || is_within(b, a, fold_case)
}
