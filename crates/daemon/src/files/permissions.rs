//! Per-principal path grants and access decisions.
//!
//! Every principal owns an ordered list of grants, each a slash-terminated
//! virtual path prefix plus a write flag. Access to a path is decided by the
//! longest matching prefix; a path no grant covers is denied entirely.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use protocol::AccessGrant;
use serde::{Deserialize, Serialize};

use super::error::FileError;
use super::resolver::normalize_virtual_path;

/// A single access rule: read access below `path_prefix`, plus write if `can_write`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Grant {
    /// Normalized, slash-terminated virtual path prefix.
    pub path_prefix: String,
    /// Whether the grant also allows writing.
    pub can_write: bool,
}

impl Grant {
    /// Create a grant, normalizing the prefix.
    pub fn new(path_prefix: &str, can_write: bool) -> Result<Self, FileError> {
        let normalized = normalize_virtual_path(path_prefix)?;
        let path_prefix = if normalized == "/" {
            normalized
        } else {
            format!("{normalized}/")
        };
        Ok(Self {
            path_prefix,
            can_write,
        })
    }

    /// Create a read-only grant.
    pub fn read_only(path_prefix: &str) -> Result<Self, FileError> {
        Self::new(path_prefix, false)
    }

    /// Create a read-write grant.
    pub fn read_write(path_prefix: &str) -> Result<Self, FileError> {
        Self::new(path_prefix, true)
    }

    /// Whether this grant covers a normalized virtual path.
    ///
    /// Matching is segment aware: `/a/` covers `/a` and `/a/b` but not `/ab`.
    pub fn matches(&self, normalized: &str) -> bool {
        if self.path_prefix == "/" {
            return true;
        }
        let folder = &self.path_prefix[..self.path_prefix.len() - 1];
        normalized == folder || normalized.starts_with(self.path_prefix.as_str())
    }

    /// Wire representation.
    pub fn to_wire(&self) -> AccessGrant {
        AccessGrant {
            path_prefix: self.path_prefix.clone(),
            can_write: self.can_write,
        }
    }
}

/// File operation types for permission checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperation {
    /// Read a file or stream it.
    Read,
    /// List directory contents or archive them.
    List,
    /// Write or create a file.
    Write,
    /// Delete a file or directory.
    Delete,
}

/// Outcome of evaluating grants against one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessDecision {
    /// Path may be read, listed and streamed.
    pub can_read: bool,
    /// Path may be modified.
    pub can_write: bool,
}

impl AccessDecision {
    /// Decision used when no grant matches.
    pub const fn deny_all() -> Self {
        Self {
            can_read: false,
            can_write: false,
        }
    }

    /// Whether the decision permits the given operation.
    pub fn allows(&self, operation: FileOperation) -> bool {
        match operation {
            FileOperation::Read | FileOperation::List => self.can_read,
            FileOperation::Write | FileOperation::Delete => self.can_write,
        }
    }

    fn from_grant(grant: &Grant) -> Self {
        Self {
            can_read: true,
            can_write: grant.can_write,
        }
    }
}

/// Evaluate an unsorted grant list against a virtual path.
///
/// The longest matching prefix wins. Two grants can only tie when they name
/// the same prefix; the one allowing writes wins then.
pub fn authorize(grants: &[Grant], virtual_path: &str) -> AccessDecision {
    let Ok(normalized) = normalize_virtual_path(virtual_path) else {
        return AccessDecision::deny_all();
    };

    let mut best: Option<&Grant> = None;
    for grant in grants.iter().filter(|g| g.matches(&normalized)) {
        best = match best {
            None => Some(grant),
            Some(current) => {
                let longer = grant.path_prefix.len() > current.path_prefix.len();
                let same_len = grant.path_prefix.len() == current.path_prefix.len();
                if longer || (same_len && grant.can_write && !current.can_write) {
                    Some(grant)
                } else {
                    Some(current)
                }
            }
        };
    }

    best.map(AccessDecision::from_grant)
        .unwrap_or_else(AccessDecision::deny_all)
}

/// Grants sorted by specificity, most specific first.
///
/// The first matching grant is the decisive one, so lookups stop early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantTable {
    grants: Vec<Grant>,
}

impl GrantTable {
    /// Build a table from grants in any order.
    pub fn new(mut grants: Vec<Grant>) -> Self {
        grants.sort_by(|a, b| {
            b.path_prefix
                .len()
                .cmp(&a.path_prefix.len())
                .then(b.can_write.cmp(&a.can_write))
                .then(a.path_prefix.cmp(&b.path_prefix))
        });
        grants.dedup();
        Self { grants }
    }

    /// Evaluate the table against a virtual path.
    pub fn authorize(&self, virtual_path: &str) -> AccessDecision {
        let Ok(normalized) = normalize_virtual_path(virtual_path) else {
            return AccessDecision::deny_all();
        };

        self.grants
            .iter()
            .find(|g| g.matches(&normalized))
            .map(AccessDecision::from_grant)
            .unwrap_or_else(AccessDecision::deny_all)
    }

    /// Whether some grant lies strictly beneath `virtual_dir`.
    ///
    /// Used to decide whether a denied folder may still contain re-granted
    /// subtrees worth walking.
    pub fn has_grant_below(&self, virtual_dir: &str) -> bool {
        let Ok(normalized) = normalize_virtual_path(virtual_dir) else {
            return false;
        };
        let base = if normalized == "/" {
            normalized
        } else {
            format!("{normalized}/")
        };
        self.grants
            .iter()
            .any(|g| g.path_prefix.len() > base.len() && g.path_prefix.starts_with(&base))
    }

    /// Grants in specificity order.
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// Whether the table holds no grants (denies everything).
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Wire representation in specificity order.
    pub fn to_wire(&self) -> Vec<AccessGrant> {
        self.grants.iter().map(Grant::to_wire).collect()
    }
}

/// Grants for one principal, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalGrants {
    /// Principal identifier (user id or email).
    pub principal: String,
    /// Grants in the order they were configured.
    pub grants: Vec<Grant>,
}

/// Grant store wrapper for serialization.
#[derive(Debug, Serialize, Deserialize)]
struct GrantStoreData {
    /// Version of the store format.
    version: u32,
    /// Per-principal grants.
    principals: Vec<PrincipalGrants>,
}

impl Default for GrantStoreData {
    fn default() -> Self {
        Self {
            version: 1,
            principals: Vec::new(),
        }
    }
}

/// Thread-safe store mapping principals to their grants.
///
/// Lookups hand out immutable [`GrantTable`] snapshots, so a request keeps a
/// consistent view even if the store is updated concurrently.
pub struct GrantStore {
    /// Path to the grants file.
    path: PathBuf,
    /// Grant tables, keyed by principal.
    principals: RwLock<HashMap<String, Arc<GrantTable>>>,
    /// Shared table for unknown principals.
    empty: Arc<GrantTable>,
}

impl GrantStore {
    /// Create a new, empty store backed by `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            principals: RwLock::new(HashMap::new()),
            empty: Arc::new(GrantTable::default()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load grants from the file.
    ///
    /// A missing file leaves the store empty. Prefixes are re-normalized;
    /// grants whose prefix cannot be normalized are dropped with a warning.
    pub fn load(&self) -> Result<()> {
        if !self.path.exists() {
            tracing::debug!("Grants file not found at {:?}, starting empty", self.path);
            return Ok(());
        }

        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read grants file: {}", self.path.display()))?;

        let data: GrantStoreData = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse grants file: {}", self.path.display()))?;

        let mut principals = self
            .principals
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on grant store"))?;

        principals.clear();
        for entry in data.principals {
            let mut grants = Vec::with_capacity(entry.grants.len());
            for grant in entry.grants {
                match Grant::new(&grant.path_prefix, grant.can_write) {
                    Ok(grant) => grants.push(grant),
                    Err(e) => tracing::warn!(
                        principal = %entry.principal,
                        prefix = %grant.path_prefix,
                        error = %e,
                        "Dropping invalid grant"
                    ),
                }
            }
            principals.insert(entry.principal, Arc::new(GrantTable::new(grants)));
        }

        tracing::info!(
            "Loaded grants for {} principals from {:?}",
            principals.len(),
            self.path
        );
        Ok(())
    }

    /// Save grants to the file atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create grants directory: {}", parent.display())
            })?;
        }

        let principals = self
            .principals
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on grant store"))?;

        let mut entries: Vec<PrincipalGrants> = principals
            .iter()
            .map(|(principal, table)| PrincipalGrants {
                principal: principal.clone(),
                grants: table.grants().to_vec(),
            })
            .collect();
        entries.sort_by(|a, b| a.principal.cmp(&b.principal));

        let data = GrantStoreData {
            version: 1,
            principals: entries,
        };

        let contents = serde_json::to_string_pretty(&data).context("Failed to serialize grants")?;

        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, &contents).with_context(|| {
            format!("Failed to write temp grants file: {}", temp_path.display())
        })?;

        fs::rename(&temp_path, &self.path).with_context(|| {
            format!(
                "Failed to rename temp grants file {} to {}",
                temp_path.display(),
                self.path.display()
            )
        })?;

        tracing::debug!(
            "Saved grants for {} principals to {:?}",
            principals.len(),
            self.path
        );
        Ok(())
    }

    /// Replace all grants of a principal.
    pub fn set_grants(&self, principal: &str, grants: Vec<Grant>) -> Result<()> {
        let mut principals = self
            .principals
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on grant store"))?;

        tracing::info!(
            "Setting {} grants for principal {}",
            grants.len(),
            principal
        );

        principals.insert(principal.to_string(), Arc::new(GrantTable::new(grants)));
        Ok(())
    }

    /// Add one grant, replacing any existing grant with the same prefix.
    pub fn add_grant(&self, principal: &str, grant: Grant) -> Result<()> {
        let mut principals = self
            .principals
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on grant store"))?;

        let mut grants: Vec<Grant> = principals
            .get(principal)
            .map(|t| t.grants().to_vec())
            .unwrap_or_default();
        grants.retain(|g| g.path_prefix != grant.path_prefix);
        grants.push(grant);

        principals.insert(principal.to_string(), Arc::new(GrantTable::new(grants)));
        Ok(())
    }

    /// Snapshot of a principal's grants; unknown principals get an empty table.
    pub fn grants_for(&self, principal: &str) -> Result<Arc<GrantTable>> {
        let principals = self
            .principals
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on grant store"))?;

        Ok(principals
            .get(principal)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.empty)))
    }

    /// Remove all grants of a principal.
    pub fn remove_principal(&self, principal: &str) -> Result<Option<Arc<GrantTable>>> {
        let mut principals = self
            .principals
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to acquire write lock on grant store"))?;

        Ok(principals.remove(principal))
    }

    /// List all principals with grants, sorted.
    pub fn list_principals(&self) -> Result<Vec<String>> {
        let principals = self
            .principals
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to acquire read lock on grant store"))?;

        let mut names: Vec<String> = principals.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
