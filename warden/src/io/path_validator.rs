//! Canonicalization and bounds checking of paths against a fixed workspace root.
//!
//! Every path is resolved to its real, symlink-free form before the boundary
//! check, so `..` traversal, absolute paths, backslash traversal, and symlinks
//! whose targets leave the root are all rejected by the same comparison.
//!
//! Paths that do not exist yet are validated through their nearest existing
//! ancestor. A dangling symlink met on the way is followed by hand, with a
//! visited set guarding against cycles.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::core::boundary::{is_within, normalize_input, resolve_lexically};
use crate::error::{Result, SandboxError};

/// Maximum number of symlinks followed by hand for a single path.
const MAX_LINK_HOPS: usize = 40;

/// The immutable, canonical sandbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Resolve `root` to its canonical form. Fails if it does not exist or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            return Err(SandboxError::EmptyPath);
        }
        let canonical = fs::canonicalize(root).map_err(|source| SandboxError::InvalidWorkspace {
            path: root.to_path_buf(),
            source,
        })?;
        let meta = fs::metadata(&canonical).map_err(|source| SandboxError::InvalidWorkspace {
            path: root.to_path_buf(),
            source,
        })?;
        if !meta.is_dir() {
            return Err(SandboxError::InvalidWorkspace {
                path: root.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }
        Ok(Self { root: canonical })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// A canonical absolute path proven to lie inside the workspace.
///
/// Only [`PathValidator`] can construct one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatedPath(PathBuf);

impl ValidatedPath {
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl Deref for ValidatedPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for ValidatedPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ValidatedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone)]
pub struct PathValidator {
    workspace: Workspace,
}

impl PathValidator {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }

    /// Construct directly from a root path.
    pub fn for_root(root: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(Workspace::new(root)?))
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn workspace_root(&self) -> &Path {
        self.workspace.root()
    }

    /// Validate one path, relative to the workspace root or absolute.
    #[instrument(skip_all, fields(input = %input.as_ref().display()))]
    pub fn validate(&self, input: impl AsRef<Path>) -> Result<ValidatedPath> {
        let input = input.as_ref();
        if input.as_os_str().is_empty() {
            return Err(SandboxError::EmptyPath);
        }
        let absolute = resolve_lexically(self.workspace.root(), &normalize_input(input));
        let resolved = resolve_real(&absolute)?;
        if !is_within(self.workspace.root(), &resolved) {
            warn!(resolved = %resolved.display(), "path outside workspace rejected");
            return Err(SandboxError::PathOutsideWorkspace {
                input: input.display().to_string(),
                resolved,
            });
        }
        debug!(resolved = %resolved.display(), "path validated");
        Ok(ValidatedPath(resolved))
    }

    /// Validate `input` and return the location of the entry itself rather than
    /// what a final symlink points at.
    ///
    /// The full path must still resolve inside the workspace. Used by operations
    /// that act on directory entries (delete, rename) instead of their targets.
    pub fn validate_entry(&self, input: impl AsRef<Path>) -> Result<ValidatedPath> {
        let input = input.as_ref();
        let resolved = self.validate(input)?;
        if self.is_root(&resolved) {
            return Ok(resolved);
        }
        let absolute = resolve_lexically(self.workspace.root(), &normalize_input(input));
        let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) else {
            return Ok(resolved);
        };
        let parent = self.validate(parent)?;
        let entry = parent.as_path().join(name);
        if !is_within(self.workspace.root(), &entry) {
            return Err(SandboxError::PathOutsideWorkspace {
                input: input.display().to_string(),
                resolved: entry,
            });
        }
        Ok(ValidatedPath(entry))
    }

    /// Validate every path, failing on the first invalid entry.
    pub fn validate_batch<I, P>(&self, inputs: I) -> Result<Vec<ValidatedPath>>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        inputs
            .into_iter()
            .map(|input| self.validate(input))
            .collect()
    }

    /// True if `path` is the workspace root itself.
    pub fn is_root(&self, path: &ValidatedPath) -> bool {
        path.as_path() == self.workspace.root()
    }
}

/// Resolve an absolute, lexically normalized path to its canonical form.
///
/// Existing paths are canonicalized directly. Otherwise the path is walked one
/// component at a time: symlinks are followed by hand (dangling ones included)
/// and, once a component is missing, the remaining components are appended
/// lexically to the canonical form of the deepest existing directory.
fn resolve_real(absolute: &Path) -> Result<PathBuf> {
    if let Ok(real) = fs::canonicalize(absolute) {
        return Ok(real);
    }

    let (mut resolved, mut pending) = split_anchor(absolute);
    let mut seen: HashSet<(PathBuf, Vec<OsString>)> = HashSet::new();
    let mut hops = 0usize;

    while let Some(name) = pending.pop() {
        if name == ".." {
            resolved.pop();
            continue;
        }
        if name == "." {
            continue;
        }
        let candidate = resolved.join(&name);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                hops += 1;
                if hops > MAX_LINK_HOPS || !seen.insert((candidate.clone(), pending.clone())) {
                    warn!(path = %candidate.display(), "symlink loop detected");
                    return Err(SandboxError::SymlinkLoop { path: candidate });
                }
                let target = fs::read_link(&candidate)
                    .map_err(|source| SandboxError::storage("read link", &candidate, source))?;
                if target.is_absolute() {
                    let (anchor, names) = split_anchor(&target);
                    resolved = anchor;
                    pending.extend(names);
                } else {
                    pending.extend(names_reversed(&target));
                }
            }
            Ok(_) => resolved = candidate,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let mut out = fs::canonicalize(&resolved)
                    .map_err(|source| SandboxError::storage("resolve", &resolved, source))?;
                out.push(&name);
                while let Some(rest) = pending.pop() {
                    if rest == ".." {
                        out.pop();
                    } else if rest != "." {
                        out.push(rest);
                    }
                }
                return Ok(out);
            }
            Err(err) => return Err(SandboxError::storage("resolve", &candidate, err)),
        }
    }

    fs::canonicalize(&resolved)
        .map_err(|source| SandboxError::storage("resolve", &resolved, source))
}

/// Split an absolute path into its anchor (prefix and root) and its remaining
/// names, last name first so they can be popped in order.
fn split_anchor(path: &Path) -> (PathBuf, Vec<OsString>) {
    let mut anchor = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => anchor.push(component.as_os_str()),
            _ => break,
        }
    }
    (anchor, names_reversed(path))
}

fn names_reversed(path: &Path) -> Vec<OsString> {
    path.components()
        .rev()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_os_string()),
            Component::ParentDir => Some(OsString::from("..")),
            _ => None,
        })
        .collect()
}
