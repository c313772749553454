//! Mapping of engine errors onto HTTP responses.

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use protocol::{ErrorCode, ErrorResponse};
use tracing::error;

use crate::files::FileError;

/// Error returned by HTTP handlers.
///
/// Forbidden responses carry one fixed body regardless of cause, so clients
/// cannot tell a traversal attempt, a missing grant and a missing path apart.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden,
    ArchiveDisabled,
    NotFound,
    BadRequest(String),
    RangeNotSatisfiable(u64),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::ArchiveDisabled => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorResponse {
        match self {
            Self::Unauthorized => {
                ErrorResponse::new(ErrorCode::Unauthorized, "missing authenticated principal")
            }
            Self::Forbidden => ErrorResponse::new(ErrorCode::Forbidden, "access denied"),
            Self::ArchiveDisabled => {
                ErrorResponse::new(ErrorCode::Forbidden, "archive downloads are disabled")
            }
            Self::NotFound => ErrorResponse::new(ErrorCode::NotFound, "not found"),
            Self::BadRequest(msg) => ErrorResponse::new(ErrorCode::InvalidRequest, msg.clone()),
            Self::RangeNotSatisfiable(_) => {
                ErrorResponse::new(ErrorCode::RangeNotSatisfiable, "range not satisfiable")
            }
            // Details stay in the server log.
            Self::Internal(_) => ErrorResponse::new(ErrorCode::InternalError, "internal error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        match &self {
            Self::RangeNotSatisfiable(size) => {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                    headers.insert(header::CONTENT_RANGE, value);
                }
            }
            Self::Internal(detail) => {
                error!(error = %detail, "Request failed");
            }
            _ => {}
        }

        (self.status(), headers, Json(self.body())).into_response()
    }
}

impl From<FileError> for ApiError {
    fn from(error: FileError) -> Self {
        match error {
            FileError::PathTraversal(_) | FileError::PermissionDenied(_) => Self::Forbidden,
            FileError::NotFound(_) => Self::NotFound,
            FileError::NotADirectory(_) => Self::BadRequest("path is not a directory".into()),
            FileError::IsADirectory(_) => Self::BadRequest("path is a directory".into()),
            FileError::RangeNotSatisfiable { total_size } => Self::RangeNotSatisfiable(total_size),
            e @ (FileError::ArchiveAborted { .. } | FileError::Io(_)) => Self::Internal(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(error: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {error}"))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(format!("{error:#}"))
    }
}
