//! Approved roots and candidate validation.

use crate::compare::{self, CaseSensitivity};
use crate::error::{PathError, Result};
use crate::resolver::{EntryKind, FsResolver, Resolver, is_absent};
use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

/// Symlinks followed before resolution gives up (matches Linux `MAXSYMLINKS`).
pub const MAX_SYMLINK_HOPS: usize = 40;

/// An absolute, symlink-resolved directory that writes must stay under.
#[derive(Clone)]
pub struct ApprovedRoot {
    declared: PathBuf,
    resolved: PathBuf,
    fold_case: bool,
    resolver: Arc<dyn Resolver>,
}

impl fmt::Debug for ApprovedRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApprovedRoot")
            .field("declared", &self.declared)
            .field("resolved", &self.resolved)
            .field("fold_case", &self.fold_case)
            .finish()
    }
}

/// A validated destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedPath {
    absolute: PathBuf,
    relative: PathBuf,
    within: PathBuf,
}

impl ResolvedPath {
    /// Absolute path after following every symlink.
    pub fn as_path(&self) -> &Path {
        &self.absolute
    }

    /// The candidate as supplied, minus `.` segments.
    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Location below the root after following every symlink.
    ///
    /// Unlike [`ResolvedPath::relative`], this names where the bytes will
    /// actually land.
    pub fn within_root(&self) -> &Path {
        &self.within
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.absolute
    }
}

impl AsRef<Path> for ResolvedPath {
    fn as_ref(&self) -> &Path {
        &self.absolute
    }
}

impl fmt::Display for ResolvedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.absolute.display())
    }
}

enum Step {
    Part(OsString),
    Parent,
    Anchor(PathBuf),
    LinkEnd(PathBuf),
}

impl ApprovedRoot {
    /// Open `path` as an approved root using the real filesystem.
    ///
    /// # Errors
    ///
    /// [`PathError::RootNotAbsolute`] for relative roots and
    /// [`PathError::RootUnavailable`] when the root does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_resolver(path, Arc::new(FsResolver))
    }

    /// Open `path` as an approved root using a custom [`Resolver`].
    pub fn with_resolver(path: impl Into<PathBuf>, resolver: Arc<dyn Resolver>) -> Result<Self> {
        let declared = path.into();
        if !declared.is_absolute() {
            return Err(PathError::RootNotAbsolute(declared));
        }
        let resolved =
            resolver
                .canonicalize(&declared)
                .map_err(|source| PathError::RootUnavailable {
                    path: declared.clone(),
                    source,
                })?;
        Ok(Self {
            declared,
            resolved,
            fold_case: false,
            resolver,
        })
    }

    /// Force case folding on or off.
    #[must_use]
    pub fn with_case_folding(mut self, fold_case: bool) -> Self {
        self.fold_case = fold_case;
        self
    }

    /// Apply a [`CaseSensitivity`] setting, probing the root for `Auto`.
    #[must_use]
    pub fn with_case_sensitivity(self, setting: CaseSensitivity) -> Self {
        let fold_case = setting.folds_case(&self.resolved);
        self.with_case_folding(fold_case)
    }

    /// Resolved root directory.
    pub fn path(&self) -> &Path {
        &self.resolved
    }

    /// Root as it was declared, before symlink resolution.
    pub fn declared(&self) -> &Path {
        &self.declared
    }

    pub fn folds_case(&self) -> bool {
        self.fold_case
    }

    /// Canonical containment test against the resolved root.
    pub fn contains(&self, path: &Path) -> bool {
        compare::is_within(path, &self.resolved, self.fold_case)
    }

    /// Canonical overlap test using this root's case rules.
    pub fn overlaps(&self, a: &Path, b: &Path) -> bool {
        compare::paths_overlap(a, b, self.fold_case)
    }

    /// Validate a root-relative candidate and resolve it.
    ///
    /// `..` segments are refused outright, even when the lexical result
    /// would stay inside the root. Every symlink met on the way down must
    /// itself resolve inside the root, wherever the leaf ends up. Missing
    /// trailing components are appended verbatim to the deepest existing
    /// ancestor.
    ///
    /// # Errors
    ///
    /// Any [`PathError`] variant except the root-construction ones.
    pub fn validate(&self, candidate: impl AsRef<Path>) -> Result<ResolvedPath> {
        let candidate = candidate.as_ref();
        if candidate.as_os_str().is_empty() {
            return Err(PathError::EmptyPath);
        }
        if candidate
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(PathError::TraversalAttempt(candidate.to_path_buf()));
        }

        let mut parts = Vec::new();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => parts.push(part.to_os_string()),
                Component::CurDir => {}
                Component::RootDir | Component::Prefix(_) | Component::ParentDir => {
                    return Err(PathError::AbsolutePathRejected(candidate.to_path_buf()));
                }
            }
        }

        let relative: PathBuf = parts.iter().collect();
        let absolute = self.resolve(parts)?;
        let within = compare::strip_root(&absolute, &self.resolved, self.fold_case).ok_or_else(
            || PathError::OutsideRoot {
                resolved: absolute.clone(),
                root: self.resolved.clone(),
            },
        )?;
        tracing::debug!(
            candidate = %candidate.display(),
            resolved = %absolute.display(),
            "paths: candidate accepted"
        );
        Ok(ResolvedPath {
            absolute,
            relative,
            within,
        })
    }

    /// Walk `parts` from the root, expanding symlinks in place.
    ///
    /// `current` only ever holds symlink-free components, so a `..` coming
    /// from a link target can be applied by popping.
    fn resolve(&self, parts: Vec<OsString>) -> Result<PathBuf> {
        let mut current = self.resolved.clone();
        let mut queue: VecDeque<Step> = parts.into_iter().map(Step::Part).collect();
        let mut hops = 0usize;

        while let Some(step) = queue.pop_front() {
            match step {
                Step::Part(name) => {
                    let next = current.join(&name);
                    match self.resolver.entry_kind(&next) {
                        Ok(EntryKind::Symlink) => {
                            hops += 1;
                            if hops > MAX_SYMLINK_HOPS {
                                return Err(PathError::SymlinkLoop(next));
                            }
                            let inside = self.contains(&next);
                            if !inside && !self.is_root_ancestor(&next) {
                                return Err(PathError::RootEscapeViaSymlink {
                                    resolved: next.clone(),
                                    link: next,
                                });
                            }
                            let target = self
                                .resolver
                                .read_link(&next)
                                .map_err(|source| PathError::Io {
                                    path: next.clone(),
                                    source,
                                })?;
                            let mut expansion = expand_link_target(&target);
                            // Links above the root land outside it by construction.
                            if inside {
                                expansion.push(Step::LinkEnd(next));
                            }
                            for step in expansion.into_iter().rev() {
                                queue.push_front(step);
                            }
                        }
                        Ok(_) => current.push(&name),
                        Err(e) if is_absent(&e) => current.push(&name),
                        Err(source) => return Err(PathError::Io { path: next, source }),
                    }
                }
                Step::Parent => {
                    current.pop();
                }
                Step::Anchor(anchor) => current = anchor,
                Step::LinkEnd(link) => {
                    if !self.contains(&current) {
                        tracing::warn!(
                            link = %link.display(),
                            resolved = %current.display(),
                            "paths: symlink escapes approved root"
                        );
                        return Err(PathError::RootEscapeViaSymlink {
                            link,
                            resolved: current,
                        });
                    }
                }
            }
        }

        if !self.contains(&current) {
            return Err(PathError::OutsideRoot {
                resolved: current,
                root: self.resolved.clone(),
            });
        }
        Ok(current)
    }

    /// Symlinks above the root (e.g. `/tmp -> /private/tmp`) are part of how
    /// the root itself was reached and may be crossed by absolute targets.
    fn is_root_ancestor(&self, path: &Path) -> bool {
        compare::is_within(&self.resolved, path, self.fold_case)
            || compare::is_within(&self.declared, path, self.fold_case)
    }
}

fn expand_link_target(target: &Path) -> Vec<Step> {
    let mut steps = Vec::new();
    if target.has_root() {
        let anchor: PathBuf = target
            .components()
            .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
            .collect();
        steps.push(Step::Anchor(anchor));
    }
    for component in target.components() {
        match component {
            Component::Normal(part) => steps.push(Step::Part(part.to_os_string())),
            Component::ParentDir => steps.push(Step::Parent),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    steps
}
