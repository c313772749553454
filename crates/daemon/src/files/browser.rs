//! Permission-filtered directory enumeration.
//!
//! Every candidate entry is authorized on its own virtual path. Entries the
//! principal cannot read are dropped silently, so a listing never reveals
//! that a forbidden file or folder exists.

use std::fs::{self, Metadata};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use protocol::{DirEntry, ListingWarning};
use tracing::{debug, warn};

use super::error::FileError;
use super::media::MediaTypeTable;
use super::permissions::GrantTable;
use super::resolver::PathResolver;

/// Options controlling an enumeration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Walk the whole subtree instead of immediate children.
    pub recursive: bool,
    /// Include names starting with `.`.
    pub include_hidden: bool,
}

impl ListOptions {
    /// Immediate children only.
    pub fn shallow() -> Self {
        Self::default()
    }

    /// Full subtree.
    pub fn recursive() -> Self {
        Self {
            recursive: true,
            ..Self::default()
        }
    }

    /// Set whether hidden entries are included.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }
}

/// Result of an enumeration.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Permitted entries in walk order.
    pub entries: Vec<DirEntry>,
    /// Subtrees that could not be read and were skipped.
    pub warnings: Vec<ListingWarning>,
}

impl Listing {
    /// Whether some subtree was skipped.
    pub fn is_partial(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// File entries only.
    pub fn files(&self) -> impl Iterator<Item = &DirEntry> {
        self.entries.iter().filter(|e| e.is_file)
    }
}

/// A child of a directory being walked.
struct Child {
    entry: DirEntry,
    real_path: PathBuf,
    is_dir: bool,
    is_symlink: bool,
}

/// Directory browser that filters through grants.
pub struct DirectoryBrowser {
    resolver: Arc<PathResolver>,
    media: Arc<MediaTypeTable>,
}

impl DirectoryBrowser {
    /// Create a browser over the resolver's root.
    pub fn new(resolver: Arc<PathResolver>, media: Arc<MediaTypeTable>) -> Self {
        Self { resolver, media }
    }

    /// The resolver this browser walks.
    pub fn resolver(&self) -> &Arc<PathResolver> {
        &self.resolver
    }

    /// List the directory at `virtual_path`.
    ///
    /// Failing to read the requested directory itself is an error. In
    /// recursive mode a subdirectory that cannot be read is skipped and
    /// reported in [`Listing::warnings`].
    ///
    /// A directory the principal cannot read is still descended into when a
    /// grant exists beneath it, so independently re-granted subtrees are
    /// found; its own entry and any unreadable siblings stay hidden.
    pub fn list(
        &self,
        virtual_path: &str,
        grants: &GrantTable,
        options: ListOptions,
    ) -> Result<Listing, FileError> {
        let target = self.resolver.resolve(virtual_path)?;
        if target.is_alias() && !grants.authorize(&target.target_path).can_read {
            return Err(FileError::PermissionDenied(target.virtual_path));
        }
        if !target.is_directory {
            return Err(FileError::NotADirectory(target.virtual_path));
        }

        let mut listing = Listing::default();
        let mut pending = vec![(target.real_path, target.virtual_path)];
        let mut at_request_root = true;

        while let Some((real_dir, virtual_dir)) = pending.pop() {
            let children = match self.read_children(&real_dir, &virtual_dir, grants, options) {
                Ok(children) => children,
                Err(e) if at_request_root => return Err(e),
                Err(e) => {
                    warn!(path = %virtual_dir, error = %e, "Skipping unreadable directory");
                    listing.warnings.push(ListingWarning {
                        virtual_path: virtual_dir,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            at_request_root = false;

            let mut subdirs = Vec::new();
            for child in children {
                let decision = grants.authorize(&child.entry.virtual_path);

                if options.recursive
                    && child.is_dir
                    && !child.is_symlink
                    && (decision.can_read || grants.has_grant_below(&child.entry.virtual_path))
                {
                    subdirs.push((child.real_path, child.entry.virtual_path.clone()));
                }

                if decision.can_read {
                    listing.entries.push(child.entry);
                }
            }

            // Reverse so that the first subdirectory is walked first.
            pending.extend(subdirs.into_iter().rev());
        }

        debug!(
            path = %virtual_path,
            entries = listing.entries.len(),
            warnings = listing.warnings.len(),
            recursive = options.recursive,
            "Listed directory"
        );

        Ok(listing)
    }

    /// Read one directory level, sorted with directories first.
    fn read_children(
        &self,
        real_dir: &std::path::Path,
        virtual_dir: &str,
        grants: &GrantTable,
        options: ListOptions,
    ) -> Result<Vec<Child>, FileError> {
        let entries = fs::read_dir(real_dir)?;

        let mut children = Vec::new();
        for entry_result in entries {
            let entry = match entry_result {
                Ok(e) => e,
                Err(e) => {
                    debug!(path = %virtual_dir, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    debug!(path = %virtual_dir, name = ?raw, "Skipping non UTF-8 name");
                    continue;
                }
            };

            if !options.include_hidden && name.starts_with('.') {
                continue;
            }

            // Such a name cannot be addressed as a virtual path.
            if name.contains('\\') {
                debug!(path = %virtual_dir, name = %name, "Skipping name with backslash");
                continue;
            }

            let virtual_path = join_virtual(virtual_dir, &name);

            let file_type = match entry.file_type() {
                Ok(t) => t,
                Err(_) => continue,
            };

            let is_symlink = file_type.is_symlink();
            let metadata = if is_symlink {
                if !self.resolver.follows_symlinks() {
                    continue;
                }
                // Target must stay inside the root and be readable on its own.
                match self.resolver.resolve(&virtual_path) {
                    Ok(resolved) if grants.authorize(&resolved.target_path).can_read => {}
                    Ok(resolved) => {
                        debug!(
                            path = %virtual_path,
                            target = %resolved.target_path,
                            "Skipping symlink to unreadable target"
                        );
                        continue;
                    }
                    Err(_) => {
                        debug!(path = %virtual_path, "Skipping symlink leaving the root");
                        continue;
                    }
                }
                match fs::metadata(entry.path()) {
                    Ok(m) => m,
                    Err(_) => continue,
                }
            } else {
                match entry.metadata() {
                    Ok(m) => m,
                    Err(_) => continue,
                }
            };

            let Some(dir_entry) = self.to_dir_entry(virtual_path, &name, &metadata) else {
                continue;
            };

            children.push(Child {
                is_dir: metadata.is_dir(),
                entry: dir_entry,
                real_path: entry.path(),
                is_symlink,
            });
        }

        children.sort_by(|a, b| match (a.is_dir, b.is_dir) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => a
                .entry
                .basename
                .to_lowercase()
                .cmp(&b.entry.basename.to_lowercase()),
        });

        Ok(children)
    }

    fn to_dir_entry(&self, virtual_path: String, name: &str, metadata: &Metadata) -> Option<DirEntry> {
        let entry = if metadata.is_dir() {
            DirEntry::directory(virtual_path)
        } else if metadata.is_file() {
            DirEntry::file(
                virtual_path,
                metadata.len(),
                Some(self.media.category_of(name)),
            )
        } else {
            // Sockets, fifos and devices are never exposed.
            return None;
        };

        let modified = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_secs());

        Some(match modified {
            Some(secs) => entry.with_modified(secs),
            None => entry,
        })
    }
}

/// Append a name to a normalized virtual directory.
pub fn join_virtual(virtual_dir: &str, name: &str) -> String {
    if virtual_dir == "/" {
        format!("/{name}")
    } else {
        format!("{virtual_dir}/{name}")
    }
}
