//! Reviewable diff artifacts for conflicting updates.

use chrono::{DateTime, TimeZone};
use similar::TextDiff;
use std::io;
use std::path::{Path, PathBuf};

/// Timestamp format used in diff and soft-delete backup suffixes.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Render a unified diff from the local file to the proposed upstream content.
///
/// Binary or non-UTF-8 content is decoded lossily; the result is meant for a
/// human reviewer, not for `patch`.
pub fn render_conflict_diff(
    destination: &Path,
    local: &[u8],
    proposed: &[u8],
    context_lines: usize,
) -> String {
    let local = String::from_utf8_lossy(local);
    let proposed = String::from_utf8_lossy(proposed);
    let label = destination.display().to_string();
    let old_header = format!("{label} (local)");
    let new_header = format!("{label} (upstream)");

    let diff = TextDiff::from_lines(local.as_ref(), proposed.as_ref());
    diff.unified_diff()
        .context_radius(context_lines)
        .header(&old_header, &new_header)
        .to_string()
}

/// `<destination>.diff.<timestamp>`, suffixed `-N` if that name is taken.
pub fn diff_artifact_path<Tz: TimeZone>(destination: &Path, at: &DateTime<Tz>) -> io::Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let suffix = format!(".diff.{}", at.format(TIMESTAMP_FORMAT));
    crate::durable::unique_sibling(destination, &suffix)
}

/// `<destination>.bak.<timestamp>`, kept by the soft delete policy.
pub fn soft_delete_backup_path<Tz: TimeZone>(
    destination: &Path,
    at: &DateTime<Tz>,
) -> io::Result<PathBuf>
where
    Tz::Offset: std::fmt::Display,
{
    let suffix = format!(".bak.{}", at.format(TIMESTAMP_FORMAT));
    crate::durable::unique_sibling(destination, &suffix)
}
