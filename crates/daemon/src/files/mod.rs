//! Permission-aware path resolution and streaming engine.
//!
//! - [`resolver`] maps untrusted virtual paths onto the configured root
//! - [`permissions`] decides read/write access by longest-prefix grant
//! - [`browser`] lists folders, dropping everything the principal cannot read
//! - [`range`] serves file bytes with single-range support
//! - [`archive`] streams ZIP archives of permitted subtrees
//!
//! # Security
//!
//! Virtual paths are normalized lexically before any filesystem access, and
//! every resolved location is canonicalized and checked against the root.
//! Symlinks leaving the root are never followed.

pub mod archive;
pub mod browser;
pub mod error;
pub mod media;
pub mod permissions;
pub mod range;
pub mod resolver;
pub mod thumbnail;

pub use archive::{
    ActiveArchives, ArchiveCompression, ArchiveFormat, ArchiveJob, ArchiveOptions, ArchiveStreamer,
};
pub use browser::{DirectoryBrowser, ListOptions, Listing};
pub use error::FileError;
pub use media::{MediaType, MediaTypeTable};
pub use permissions::{AccessDecision, FileOperation, Grant, GrantStore, GrantTable};
pub use range::{ByteRange, RangePolicy, RangeStreamer};
pub use resolver::{normalize_virtual_path, PathResolver, ResolvedPath};
pub use thumbnail::{ImageTransform, SizePolicy, TransformedImage};
