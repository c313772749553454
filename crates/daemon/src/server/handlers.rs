//! Request handlers.
//!
//! Each handler normalizes the requested path and checks the principal's
//! grants before touching the filesystem, so a denied request never learns
//! whether the path exists.

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use protocol::messages::basename_of;
use protocol::PrincipalInfo;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::auth::Principal;
use super::error::ApiError;
use super::{AppState, PARTIAL_HEADER};
use crate::files::archive::archive_file_name;
use crate::files::thumbnail::wants_transform;
use crate::files::{
    normalize_virtual_path, ArchiveJob, FileError, FileOperation, GrantTable, ListOptions,
    SizePolicy,
};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub path: Option<String>,
    #[serde(default)]
    pub recursive: bool,
    pub hidden: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub path: String,
    #[serde(default)]
    pub download: bool,
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveQuery {
    pub path: Option<String>,
}

/// Normalize `raw` and require `operation` on it.
///
/// Runs before any existence check.
fn authorize(
    state: &AppState,
    principal: &Principal,
    raw: &str,
    operation: FileOperation,
) -> Result<(String, Arc<GrantTable>), ApiError> {
    let path = match normalize_virtual_path(raw) {
        Ok(path) => path,
        Err(e) => {
            warn!(principal = %principal, path = %raw, error = %e, "Rejected path");
            return Err(ApiError::Forbidden);
        }
    };

    let grants = state.grants.grants_for(principal.as_str())?;
    if !grants.authorize(&path).allows(operation) {
        warn!(
            principal = %principal,
            path = %path,
            operation = ?operation,
            "Permission denied"
        );
        return Err(ApiError::Forbidden);
    }

    Ok((path, grants))
}

/// Log denials surfaced by the browser, then map the error.
fn listing_error(principal: &Principal, path: &str, error: FileError) -> ApiError {
    if error.is_forbidden() {
        warn!(principal = %principal, path = %path, error = %error, "Permission denied");
    }
    ApiError::from(error)
}

fn bad_query(rejection: QueryRejection) -> ApiError {
    ApiError::BadRequest(rejection.body_text())
}

/// `GET /list`
pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(bad_query)?;
    let raw = query.path.as_deref().unwrap_or("/");
    let (path, grants) = authorize(&state, &principal, raw, FileOperation::List)?;

    let options = ListOptions {
        recursive: query.recursive,
        include_hidden: query.hidden.unwrap_or(state.settings.include_hidden),
    };

    let browser = Arc::clone(&state.browser);
    let target = path.clone();
    let listing = tokio::task::spawn_blocking(move || browser.list(&target, &grants, options))
        .await?
        .map_err(|e| listing_error(&principal, &path, e))?;

    let mut headers = HeaderMap::new();
    if listing.is_partial() {
        warn!(
            principal = %principal,
            path = %path,
            skipped = listing.warnings.len(),
            "Partial listing"
        );
        headers.insert(PARTIAL_HEADER, HeaderValue::from(listing.warnings.len()));
    }

    debug!(principal = %principal, path = %path, entries = listing.entries.len(), "Listed");
    Ok((headers, Json(listing.entries)).into_response())
}

/// `GET /file`
pub async fn file(
    State(state): State<AppState>,
    principal: Principal,
    request_headers: HeaderMap,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(bad_query)?;
    let (path, grants) = authorize(&state, &principal, &query.path, FileOperation::Read)?;

    let size: SizePolicy = match query.size.as_deref() {
        Some(raw) => raw.parse().map_err(ApiError::BadRequest)?,
        None => SizePolicy::Original,
    };

    let resolved = state.resolver.resolve(&path)?;
    if !grants.authorize(&resolved.target_path).allows(FileOperation::Read) {
        warn!(
            principal = %principal,
            path = %path,
            target = %resolved.target_path,
            "Permission denied on symlink target"
        );
        return Err(ApiError::Forbidden);
    }
    if resolved.is_directory {
        return Err(ApiError::BadRequest("path is a directory".into()));
    }

    let file_name = basename_of(&path).to_string();
    let disposition = content_disposition(query.download, &file_name);

    if wants_transform(state.media.category_of(&file_name), size) {
        if let Some(transform) = state.transform.clone() {
            let real_path = resolved.real_path.clone();
            let image =
                tokio::task::spawn_blocking(move || transform.transform(&real_path, size)).await??;

            debug!(principal = %principal, path = %path, size = %size, "Serving transformed image");
            let content_type = HeaderValue::from_str(&image.content_type)
                .map_err(|e| ApiError::Internal(format!("invalid transform content type: {e}")))?;
            return Ok((
                [
                    (header::CONTENT_TYPE, content_type),
                    (header::CONTENT_LENGTH, HeaderValue::from(image.bytes.len())),
                    (header::CACHE_CONTROL, state.settings.cache_control.clone()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                Body::from(image.bytes),
            )
                .into_response());
        }
        debug!(path = %path, "No image transform installed, serving original");
    }

    // A non-ASCII header cannot be a valid range.
    let range_header = request_headers
        .get(header::RANGE)
        .map(|v| v.to_str().unwrap_or(""));
    let stream = state.ranges.open(&resolved.real_path, range_header).await?;
    let head = stream.head;

    let content_type = state.media.content_type_for(Path::new(&file_name));
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(head.content_length()));
    headers.insert(header::CACHE_CONTROL, state.settings.cache_control.clone());
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    let status = match head.content_range() {
        Some(content_range) => {
            let value = HeaderValue::from_str(&content_range)
                .map_err(|e| ApiError::Internal(format!("invalid content range: {e}")))?;
            headers.insert(header::CONTENT_RANGE, value);
            StatusCode::PARTIAL_CONTENT
        }
        None => StatusCode::OK,
    };

    debug!(
        principal = %principal,
        path = %path,
        status = status.as_u16(),
        length = head.content_length(),
        "Serving file"
    );
    Ok((status, headers, Body::from_stream(stream.body)).into_response())
}

/// `GET /archive`
pub async fn archive(
    State(state): State<AppState>,
    principal: Principal,
    query: Result<Query<ArchiveQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    if !state.settings.archive_enabled {
        return Err(ApiError::ArchiveDisabled);
    }

    let Query(query) = query.map_err(bad_query)?;
    let raw = query.path.as_deref().unwrap_or("/");
    let (path, grants) = authorize(&state, &principal, raw, FileOperation::Read)?;

    let options = ListOptions::recursive().include_hidden(state.settings.include_hidden);
    let browser = Arc::clone(&state.browser);
    let target = path.clone();
    let listing = tokio::task::spawn_blocking(move || browser.list(&target, &grants, options))
        .await?
        .map_err(|e| listing_error(&principal, &path, e))?;

    if listing.is_partial() {
        warn!(
            principal = %principal,
            path = %path,
            skipped = listing.warnings.len(),
            "Archive omits unreadable subtrees"
        );
    }

    let job = ArchiveJob::from_listing(&path, &listing);
    let format = state.settings.archive_format;
    let file_name = archive_file_name(&path, &state.settings.archive_default_name, format);

    info!(principal = %principal, path = %path, files = job.len(), "Archive requested");
    let body = state.archiver.spawn(job, &state.archives);

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(format.content_type())),
            (header::CONTENT_DISPOSITION, content_disposition(true, &file_name)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// `GET /me`
pub async fn me(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<PrincipalInfo>, ApiError> {
    let grants = state.grants.grants_for(principal.as_str())?;
    Ok(Json(PrincipalInfo {
        grants: grants.to_wire(),
        principal: principal.0,
    }))
}

/// `Content-Disposition` value with an ASCII fallback and an RFC 5987 name.
pub fn content_disposition(attachment: bool, file_name: &str) -> HeaderValue {
    let kind = if attachment { "attachment" } else { "inline" };

    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            ' '..='~' if c != '"' && c != '\\' => c,
            _ => '_',
        })
        .collect();

    let mut encoded = String::with_capacity(file_name.len());
    for byte in file_name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }

    let value = format!("{kind}; filename=\"{fallback}\"; filename*=UTF-8''{encoded}");
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
