//! Artifact kinds, scopes, and the destination layout under an approved root.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Path component marker for staged-only (inactive) locations.
pub const STAGING_MARKER: &str = ".imported.";

/// Closed set of artifact kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Skill,
    Command,
    Agent,
    Hook,
    Config,
    McpConfig,
    Doc,
}

impl ArtifactKind {
    pub const ALL: [Self; 7] = [
        Self::Skill,
        Self::Command,
        Self::Agent,
        Self::Hook,
        Self::Config,
        Self::McpConfig,
        Self::Doc,
    ];

    /// Kinds that are never written to an active location automatically.
    pub fn staged_only(self) -> bool {
        matches!(self, Self::Hook | Self::Config | Self::McpConfig | Self::Doc)
    }

    /// Stem of the per-repository staging location for staged-only kinds.
    fn staging_stem(self) -> Option<&'static str> {
        match self {
            Self::Hook => Some("hooks"),
            Self::Config => Some("config"),
            Self::McpConfig => Some("mcp"),
            Self::Doc => Some("docs"),
            Self::Skill | Self::Command | Self::Agent => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Command => "command",
            Self::Agent => "agent",
            Self::Hook => "hook",
            Self::Config => "config",
            Self::McpConfig => "mcp_config",
            Self::Doc => "doc",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown artifact kind: {s}"))
    }
}

/// Installation scope of an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    #[default]
    User,
    Project,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            other => Err(format!("unknown scope: {other}")),
        }
    }
}

/// Root-relative destination for an artifact.
///
/// Active kinds land in `skills/`, `commands/` and `agents/`. Staged-only
/// kinds land under a per-repository `.imported.` location, so nothing they
/// contain is picked up until a user moves it into place.
pub fn destination_for(kind: ArtifactKind, name: &str, repo_id: &str) -> PathBuf {
    let repo = sanitize_component(repo_id);
    match kind {
        ArtifactKind::Skill => Path::new("skills").join(name),
        ArtifactKind::Command => Path::new("commands").join(name),
        ArtifactKind::Agent => Path::new("agents").join(name),
        ArtifactKind::Hook => PathBuf::from(format!("hooks.imported.{repo}")).join(name),
        ArtifactKind::Config => PathBuf::from(format!("config.imported.{repo}")).join(name),
        ArtifactKind::McpConfig => PathBuf::from(format!("mcp.imported.{repo}.json")),
        ArtifactKind::Doc => PathBuf::from(format!("docs.imported.{repo}")).join(name),
    }
}

/// True when `path` lies in the staging location for `kind`.
///
/// `path` is root-relative with symlinks already followed. The first
/// component must be `<stem>.imported.<repo>` for `kind`, with the artifact
/// below it; MCP config must be exactly `mcp.imported.<repo>.json`. A marker
/// anywhere else (`hooks/pre.imported.sh`) does not count.
pub fn is_staging_path(kind: ArtifactKind, path: &Path) -> bool {
    let Some(stem) = kind.staging_stem() else {
        return false;
    };
    let mut parts = path.components();
    let Some(Component::Normal(first)) = parts.next() else {
        return false;
    };
    let Some(first) = first.to_str() else {
        return false;
    };
    let first = first.to_ascii_lowercase();
    let Some(repo) = first
        .strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix(STAGING_MARKER))
    else {
        return false;
    };
    let rest: Vec<Component<'_>> = parts.collect();
    if kind == ArtifactKind::McpConfig {
        rest.is_empty() && repo.strip_suffix(".json").is_some_and(is_repo_id)
    } else {
        !rest.is_empty()
            && rest.iter().all(|c| matches!(c, Component::Normal(_)))
            && is_repo_id(repo)
    }
}

fn is_repo_id(repo: &str) -> bool {
    !repo.is_empty() && repo == sanitize_component(repo) && !repo.chars().all(|c| c == '.' || c == '-')
}

/// Turn a source locator into a filesystem-safe repository id.
///
/// `https://github.com/owner/repo.git` and `git@github.com:owner/repo`
/// both become `owner-repo`; local paths use their final directory name.
pub fn sanitize_repo_id(source: &str) -> String {
    let trimmed = source.trim().trim_end_matches('/');
    let raw = if let Ok(parsed) = url::Url::parse(trimmed)
        && parsed.has_host()
    {
        owner_and_repo(parsed.path())
    } else if let Some((_, path)) = scp_like_path(trimmed) {
        owner_and_repo(path)
    } else {
        Path::new(trimmed)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    };
    let id = sanitize_component(raw.as_deref().unwrap_or(""));
    if id.is_empty() || id.chars().all(|c| c == '.' || c == '-') {
        "unknown-repo".to_owned()
    } else {
        id
    }
}

/// `user@host:owner/repo` style locators.
fn scp_like_path(source: &str) -> Option<(&str, &str)> {
    let (host, path) = source.split_once(':')?;
    if host.contains('/') || path.starts_with("//") || !host.contains('@') {
        return None;
    }
    Some((host, path))
}

fn owner_and_repo(path: &str) -> Option<String> {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    let (owner, repo) = match segments.as_slice() {
        [] => return None,
        [repo] => (None, *repo),
        [.., owner, repo] => (Some(*owner), *repo),
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Some(match owner {
        Some(owner) => format!("{owner}-{repo}"),
        None => repo.to_owned(),
    })
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
