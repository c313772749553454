//! Principal extraction.
//!
//! Authentication happens upstream; the identity-aware proxy in front of the
//! daemon forwards the authenticated identity in a configured header.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use super::error::ApiError;
use super::AppState;

/// The authenticated identity making a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl Principal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = &state.settings.principal_header;
        let principal = parts
            .headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match principal {
            Some(p) => Ok(Principal(p.to_string())),
            None => {
                debug!(header = %header, uri = %parts.uri, "Request without principal");
                Err(ApiError::Unauthorized)
            }
        }
    }
}
