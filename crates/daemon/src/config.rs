//! Configuration management for the Pathgate daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/pathgate/config.toml`.

use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::http::HeaderName;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::files::archive::{ArchiveCompression, ArchiveFormat, ArchiveOptions};
use crate::files::media::{MediaType, MediaTypeTable};
use crate::files::range::RangePolicy;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("files.root does not exist: {0}")]
    RootNotFound(String),

    #[error("files.root is not a directory: {0}")]
    RootNotDirectory(String),

    #[error("server.listen must be a socket address like 127.0.0.1:8080, got {0}")]
    InvalidListenAddress(String),

    #[error("server.principal_header is not a valid header name: {0}")]
    InvalidPrincipalHeader(String),

    #[error("archive.default_name must be non-empty and contain no '/', got {0:?}")]
    InvalidArchiveName(String),

    #[error("{key} must be between 4096 and 4194304 bytes, got {size}")]
    InvalidChunkSize { key: &'static str, size: usize },
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const MIN_CHUNK_SIZE: usize = 4 * 1024;
const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Main configuration structure for the Pathgate daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// HTTP listener configuration.
    pub server: ServerConfig,

    /// Exposed file tree.
    pub files: FilesConfig,

    /// Archive downloads.
    pub archive: ArchiveConfig,

    /// Permission store.
    pub grants: GrantsConfig,

    /// Media type table overrides.
    pub media: MediaConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for daemon state (grant store).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Directory for daily rolling log files. Console only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind.
    pub listen: String,

    /// Request header carrying the authenticated principal.
    ///
    /// Set by the identity-aware proxy in front of the daemon.
    pub principal_header: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilesConfig {
    /// Real directory exposed as the virtual root.
    pub root: PathBuf,

    /// List dot-files.
    pub include_hidden: bool,

    /// Serve symlinks whose target stays inside the root.
    pub follow_symlinks: bool,

    /// Handling of ranges reaching past end of file.
    pub range_policy: RangePolicy,

    /// Allow clients to cache file responses.
    pub cache: bool,

    /// `max-age` in seconds when caching is allowed.
    pub cache_max_age: u64,

    /// Bytes per chunk when streaming a single file.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    pub enabled: bool,
    pub format: ArchiveFormat,
    pub compression: ArchiveCompression,
    /// Download name used when archiving the root.
    pub default_name: String,
    /// Bytes per chunk sent to the client.
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct GrantsConfig {
    /// Grant store file. Defaults to `<data_dir>/grants.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MediaConfig {
    /// Extension to media type additions and replacements.
    pub overrides: HashMap<String, MediaType>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            principal_header: "x-forwarded-email".to_string(),
        }
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include_hidden: false,
            follow_symlinks: false,
            range_policy: RangePolicy::Clamp,
            cache: true,
            cache_max_age: 3600,
            chunk_size: 64 * 1024, // 64KB
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ArchiveFormat::Zip,
            compression: ArchiveCompression::Stored,
            default_name: "archive".to_string(),
            chunk_size: 64 * 1024, // 64KB
        }
    }
}

impl ArchiveConfig {
    pub fn options(&self) -> ArchiveOptions {
        ArchiveOptions {
            format: self.format,
            compression: self.compression,
            chunk_size: self.chunk_size,
        }
    }
}

impl MediaConfig {
    pub fn table(&self) -> MediaTypeTable {
        MediaTypeTable::with_overrides(&self.overrides)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pathgate")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pathgate")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - PATHGATE_ROOT: Override the exposed root directory
    /// - PATHGATE_LISTEN: Override the listen address
    /// - PATHGATE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var("PATHGATE_ROOT") {
            if !root.is_empty() {
                tracing::info!("Overriding files.root from environment: {}", root);
                self.files.root = PathBuf::from(root);
            }
        }

        if let Ok(listen) = std::env::var("PATHGATE_LISTEN") {
            if !listen.is_empty() {
                tracing::info!("Overriding server.listen from environment: {}", listen);
                self.server.listen = listen;
            }
        }

        if let Ok(level) = std::env::var("PATHGATE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        let root = &self.files.root;
        if !root.exists() {
            return Err(ConfigError::RootNotFound(root.display().to_string()));
        }
        if !root.is_dir() {
            return Err(ConfigError::RootNotDirectory(root.display().to_string()));
        }

        if self.server.listen.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::InvalidListenAddress(self.server.listen.clone()));
        }

        if HeaderName::from_bytes(self.server.principal_header.as_bytes()).is_err() {
            return Err(ConfigError::InvalidPrincipalHeader(
                self.server.principal_header.clone(),
            ));
        }

        let name = &self.archive.default_name;
        if name.trim().is_empty() || name.contains('/') || name.contains('\\') {
            return Err(ConfigError::InvalidArchiveName(name.clone()));
        }

        for (key, size) in [
            ("files.chunk_size", self.files.chunk_size),
            ("archive.chunk_size", self.archive.chunk_size),
        ] {
            if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&size) {
                return Err(ConfigError::InvalidChunkSize { key, size });
            }
        }

        Ok(())
    }

    /// Parsed listen address. Call after [`Config::validate`].
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.server.listen))
    }

    /// Location of the grant store file.
    pub fn grants_path(&self) -> PathBuf {
        self.grants
            .path
            .clone()
            .unwrap_or_else(|| self.daemon.data_dir.join("grants.json"))
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
