//! Virtual path normalization and resolution against the served root.
//!
//! Client paths are untrusted. They are normalized lexically first (so that a
//! traversal attempt never reaches the filesystem), then joined onto the
//! canonical root and canonicalized again so that symlinks cannot be used to
//! step outside of it.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use super::error::FileError;

/// A virtual path mapped onto the real filesystem for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Normalized client-facing path (always starts with `/`).
    pub virtual_path: String,
    /// Virtual path of the location actually reached. Differs from
    /// `virtual_path` only when a followed symlink was crossed.
    pub target_path: String,
    /// Absolute location under the root.
    pub real_path: PathBuf,
    /// Whether the location exists on disk.
    pub exists: bool,
    /// Whether the location is a directory.
    pub is_directory: bool,
}

impl ResolvedPath {
    /// Whether the location was reached through a symlink.
    pub fn is_alias(&self) -> bool {
        self.target_path != self.virtual_path
    }
}

/// Normalize an untrusted virtual path.
///
/// Backslashes are treated as separators, empty and `.` segments are dropped
/// and `..` pops the previous segment. Popping past the root fails with
/// [`FileError::PathTraversal`] instead of clamping, so `../../etc/passwd`
/// is rejected rather than silently rewritten to `/etc/passwd`.
pub fn normalize_virtual_path(raw: &str) -> Result<String, FileError> {
    if raw.contains('\0') {
        return Err(FileError::PathTraversal(raw.replace('\0', "\\0")));
    }

    let unified = raw.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                if segments.pop().is_none() {
                    return Err(FileError::PathTraversal(raw.to_string()));
                }
            }
            other => segments.push(other),
        }
    }

    Ok(format!("/{}", segments.join("/")))
}

/// Maps virtual paths onto a fixed real root.
#[derive(Debug, Clone)]
pub struct PathResolver {
    /// Canonical root directory.
    root: PathBuf,
    /// Whether symlinks inside the root may be traversed.
    follow_symlinks: bool,
}

impl PathResolver {
    /// Create a resolver for the given root directory.
    ///
    /// The root is canonicalized once; it must exist and be a directory.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, FileError> {
        let root = root.as_ref();
        let canonical = fs::canonicalize(root).map_err(|e| match e.kind() {
            ErrorKind::NotFound => FileError::NotFound(root.display().to_string()),
            _ => FileError::Io(e),
        })?;

        if !canonical.is_dir() {
            return Err(FileError::NotADirectory(root.display().to_string()));
        }

        Ok(Self {
            root: canonical,
            follow_symlinks: false,
        })
    }

    /// Set whether symlinks are followed.
    ///
    /// Even when enabled, a symlink whose target leaves the root is rejected.
    pub fn follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Whether symlinks are followed.
    pub fn follows_symlinks(&self) -> bool {
        self.follow_symlinks
    }

    /// The canonical root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a virtual path to its real location without requiring it to exist.
    ///
    /// Containment is checked against the deepest existing ancestor.
    pub fn locate(&self, virtual_path: &str) -> Result<ResolvedPath, FileError> {
        let normalized = normalize_virtual_path(virtual_path)?;
        let real_path = self.real_path_of(&normalized);

        match fs::canonicalize(&real_path) {
            Ok(canonical) => {
                if !canonical.starts_with(&self.root) {
                    return Err(FileError::PathTraversal(normalized));
                }
                if canonical != real_path && !self.follow_symlinks {
                    // A symlink somewhere along the way; invisible when not followed.
                    return Err(FileError::NotFound(normalized));
                }
                let target_path = self
                    .virtual_path_for(&canonical)
                    .ok_or_else(|| FileError::NotFound(normalized.clone()))?;
                let metadata = fs::metadata(&canonical)?;
                Ok(ResolvedPath {
                    virtual_path: normalized,
                    target_path,
                    real_path: canonical,
                    exists: true,
                    is_directory: metadata.is_dir(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.check_nearest_ancestor(&real_path, &normalized)?;
                Ok(ResolvedPath {
                    target_path: normalized.clone(),
                    virtual_path: normalized,
                    real_path,
                    exists: false,
                    is_directory: false,
                })
            }
            Err(e) => Err(FileError::Io(e)),
        }
    }

    /// Map a virtual path to an existing real location.
    ///
    /// Fails with [`FileError::NotFound`] when nothing exists there.
    pub fn resolve(&self, virtual_path: &str) -> Result<ResolvedPath, FileError> {
        let located = self.locate(virtual_path)?;
        if !located.exists {
            return Err(FileError::NotFound(located.virtual_path));
        }
        Ok(located)
    }

    /// Compute the virtual path of a real location under the root.
    ///
    /// Returns `None` for locations outside the root or with non UTF-8 names.
    pub fn virtual_path_for(&self, real_path: &Path) -> Option<String> {
        let relative = real_path.strip_prefix(&self.root).ok()?;
        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(name) => segments.push(name.to_str()?),
                _ => return None,
            }
        }
        Some(format!("/{}", segments.join("/")))
    }

    fn real_path_of(&self, normalized: &str) -> PathBuf {
        normalized
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    fn check_nearest_ancestor(&self, real_path: &Path, normalized: &str) -> Result<(), FileError> {
        let mut ancestor = real_path.parent();
        while let Some(candidate) = ancestor {
            match fs::canonicalize(candidate) {
                Ok(canonical) => {
                    if canonical.starts_with(&self.root) {
                        return Ok(());
                    }
                    return Err(FileError::PathTraversal(normalized.to_string()));
                }
                Err(e) if e.kind() == ErrorKind::NotFound => ancestor = candidate.parent(),
                Err(e) => return Err(FileError::Io(e)),
            }
        }
        Err(FileError::PathTraversal(normalized.to_string()))
    }
}

/// Resolve `virtual_path` against `root` in one call.
pub fn resolve<P: AsRef<Path>>(root: P, virtual_path: &str) -> Result<ResolvedPath, FileError> {
    PathResolver::new(root)?.resolve(virtual_path)
}
