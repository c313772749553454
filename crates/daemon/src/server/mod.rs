//! HTTP surface.
//!
//! | Route | Response |
//! |---|---|
//! | `GET /list?path=` | JSON array of permitted entries |
//! | `GET /file?path=` | file bytes, with `Range` support |
//! | `GET /archive?path=` | streamed ZIP of the permitted subtree |
//! | `GET /me` | principal and its grants |
//!
//! Every route requires the principal header and a read grant on the target.

pub mod auth;
pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{HeaderName, HeaderValue};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::files::{
    ActiveArchives, ArchiveFormat, ArchiveStreamer, DirectoryBrowser, GrantStore, ImageTransform,
    MediaTypeTable, PathResolver, RangeStreamer,
};

pub use auth::Principal;
pub use error::ApiError;

/// Header reporting how many subtrees were skipped in a listing.
pub const PARTIAL_HEADER: &str = "x-pathgate-partial";

/// Request-independent settings derived from configuration.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub principal_header: HeaderName,
    pub include_hidden: bool,
    pub cache_control: HeaderValue,
    pub archive_enabled: bool,
    pub archive_format: ArchiveFormat,
    pub archive_default_name: String,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        let principal_header = HeaderName::from_bytes(config.server.principal_header.as_bytes())
            .with_context(|| {
                format!("Invalid principal header: {}", config.server.principal_header)
            })?;

        // Responses depend on the principal, so shared caches must not keep them.
        let cache_control = if config.files.cache {
            HeaderValue::from_str(&format!("private, max-age={}", config.files.cache_max_age))
                .context("Invalid cache max age")?
        } else {
            HeaderValue::from_static("no-store")
        };

        Ok(Self {
            principal_header,
            include_hidden: config.files.include_hidden,
            cache_control,
            archive_enabled: config.archive.enabled,
            archive_format: config.archive.format,
            archive_default_name: config.archive.default_name.clone(),
        })
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<PathResolver>,
    pub browser: Arc<DirectoryBrowser>,
    pub grants: Arc<GrantStore>,
    pub media: Arc<MediaTypeTable>,
    pub ranges: RangeStreamer,
    pub archiver: ArchiveStreamer,
    pub archives: ActiveArchives,
    pub transform: Option<Arc<dyn ImageTransform>>,
    pub settings: Arc<ServerSettings>,
}

impl AppState {
    /// Build the state for `config` over an already loaded grant store.
    pub fn from_config(config: &Config, grants: Arc<GrantStore>) -> Result<Self> {
        let resolver = PathResolver::new(&config.files.root)
            .with_context(|| format!("Invalid files.root: {}", config.files.root.display()))?
            .follow_symlinks(config.files.follow_symlinks);
        let resolver = Arc::new(resolver);
        let media = Arc::new(config.media.table());

        Ok(Self {
            browser: Arc::new(DirectoryBrowser::new(Arc::clone(&resolver), Arc::clone(&media))),
            ranges: RangeStreamer::new(config.files.range_policy, config.files.chunk_size),
            archiver: ArchiveStreamer::new(Arc::clone(&resolver), config.archive.options()),
            archives: ActiveArchives::new(),
            transform: None,
            settings: Arc::new(ServerSettings::from_config(config)?),
            resolver,
            grants,
            media,
        })
    }

    /// Install an image transform for thumbnail and preview requests.
    pub fn with_transform(mut self, transform: Arc<dyn ImageTransform>) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/list", get(handlers::list))
        .route("/file", get(handlers::file))
        .route("/archive", get(handlers::archive))
        .route("/me", get(handlers::me))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
///
/// Running archives are cancelled on shutdown so open connections can
/// drain.
pub async fn serve(state: AppState, addr: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(address = %listener.local_addr()?, root = %state.resolver.root().display(), "Listening");

    let archives = state.archives.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Shutting down HTTP server");
            archives.cancel_all();
        })
        .await
        .context("HTTP server failed")
}
