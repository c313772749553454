//! # Pathgate Daemon Library
//!
//! Serves a tree of real filesystem paths to remote clients through a
//! permission-filtered virtual namespace.
//!
//! ## Overview
//!
//! - **Path resolution**: untrusted virtual paths are normalized and confined
//!   to the configured root
//! - **Grants**: per-principal read/write access by longest matching prefix
//! - **Browsing**: folder listings that never reveal forbidden entries
//! - **Streaming**: single-file downloads with `Range` support for media
//!   scrubbing
//! - **Archives**: on-the-fly ZIP downloads of permitted subtrees
//!
//! ## Architecture
//!
//! ```text
//! request ─► Principal ─► normalize ─► GrantTable ─┬─► DirectoryBrowser ─► JSON
//!                                                  ├─► RangeStreamer ────► bytes
//!                                                  └─► ArchiveStreamer ──► zip
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use daemon::{server, AppState, Config, GrantStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load_default()?;
//!     config.validate()?;
//!
//!     let grants = Arc::new(GrantStore::new(config.grants_path()));
//!     grants.load()?;
//!
//!     let state = AppState::from_config(&config, grants)?;
//!     server::serve(state, config.listen_addr()?, CancellationToken::new()).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and defaults
//! - [`files`]: Path resolution, grants, listing and streaming
//! - [`server`]: HTTP routes

pub mod config;
pub mod files;
pub mod server;

// Re-export protocol for convenience
pub use protocol;

pub use config::Config;

pub use files::{
    ActiveArchives, ArchiveJob, ArchiveStreamer, DirectoryBrowser, FileError, Grant, GrantStore,
    GrantTable, ImageTransform, ListOptions, PathResolver, RangePolicy, RangeStreamer,
};

pub use server::{router, AppState};
