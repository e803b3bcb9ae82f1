//! Conflict classification.
//!
//! Decides, per operation, whether local content can be replaced, must be
//! left alone, or needs nothing at all. Decisions are made purely on
//! fingerprints: the one recorded at the last successful write, the one on
//! disk now, and the one being proposed.

use crate::fingerprint::Fingerprint;
use crate::registry::ArtifactRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Local content already equals the proposed content.
    Unchanged,
    /// Local content matches the last import; safe to overwrite or delete.
    CleanApply,
    /// Local content was edited since the last import.
    Conflict,
    /// Nothing has been recorded for this artifact yet.
    New,
}

impl Verdict {
    /// Whether applying the operation writes to the destination.
    pub fn writes(self) -> bool {
        matches!(self, Self::CleanApply | Self::New)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unchanged => "unchanged",
            Self::CleanApply => "clean_apply",
            Self::Conflict => "conflict",
            Self::New => "new",
        };
        f.write_str(label)
    }
}

/// Classify a write against the registry record.
///
/// | record | local file | local == recorded | local == proposed | verdict |
/// |---|---|---|---|---|
/// | no | any | any | any | `New` |
/// | yes | no | any | any | `CleanApply` |
/// | yes | yes | yes | yes | `Unchanged` |
/// | yes | yes | yes | no | `CleanApply` |
/// | yes | yes | no | any | `Conflict` |
pub fn classify(
    record: Option<&ArtifactRecord>,
    local: Option<&Fingerprint>,
    proposed: &Fingerprint,
) -> Verdict {
    classify_against(record.map(|r| &r.last_known_hash), local, proposed)
}

/// [`classify`] with an explicit baseline fingerprint in place of a record.
pub fn classify_against(
    baseline: Option<&Fingerprint>,
    local: Option<&Fingerprint>,
    proposed: &Fingerprint,
) -> Verdict {
    let Some(baseline) = baseline else {
        return Verdict::New;
    };
    let Some(local) = local else {
        return Verdict::CleanApply;
    };
    if local != baseline {
        Verdict::Conflict
    } else if local == proposed {
        Verdict::Unchanged
    } else {
        Verdict::CleanApply
    }
}

/// Classify an upstream deletion.
///
/// A file already gone locally needs nothing. Without a baseline there is no
/// proof the local file came from upstream, so it is a conflict; otherwise
/// the file may go only if it still matches the baseline.
pub fn classify_delete(baseline: Option<&Fingerprint>, local: Option<&Fingerprint>) -> Verdict {
    match (baseline, local) {
        (_, None) => Verdict::Unchanged,
        (None, Some(_)) => Verdict::Conflict,
        (Some(baseline), Some(local)) if baseline == local => Verdict::CleanApply,
        (Some(_), Some(_)) => Verdict::Conflict,
    }
}
