//! Payload definitions for Pathgate.
//!
//! This module defines the JSON bodies produced by the server: folder listings,
//! the principal summary, and the uniform error body.

use serde::{Deserialize, Serialize};

/// Coarse media class of a file, used by clients to pick a viewer or player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MimeCategory {
    /// Still images (thumbnails may be requested).
    Image,
    /// Video files (served with range support for scrubbing).
    Video,
    /// Audio files.
    Audio,
    /// Archive files (zip, tar, ...).
    Archive,
    /// PDF documents.
    Pdf,
    /// Anything else.
    #[default]
    Other,
}

/// A single permitted file or folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    /// Client-facing path, always starting with `/`.
    pub virtual_path: String,
    /// Last path segment.
    pub basename: String,
    /// `true` for regular files, `false` for folders.
    pub is_file: bool,
    /// Size in bytes (files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Lowercased extension without the dot (files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    /// Media category (files only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_category: Option<MimeCategory>,
    /// Last modified timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<u64>,
}

impl DirEntry {
    /// Create a file entry; basename and extension are derived from the path.
    pub fn file(
        virtual_path: impl Into<String>,
        size_bytes: u64,
        mime_category: Option<MimeCategory>,
    ) -> Self {
        let virtual_path = virtual_path.into();
        let basename = basename_of(&virtual_path).to_string();
        let extension = extension_of(&basename);
        Self {
            virtual_path,
            basename,
            is_file: true,
            size_bytes: Some(size_bytes),
            extension,
            mime_category,
            modified: None,
        }
    }

    /// Create a folder entry.
    pub fn directory(virtual_path: impl Into<String>) -> Self {
        let virtual_path = virtual_path.into();
        let basename = basename_of(&virtual_path).to_string();
        Self {
            virtual_path,
            basename,
            is_file: false,
            size_bytes: None,
            extension: None,
            mime_category: None,
            modified: None,
        }
    }

    /// Set the modification timestamp.
    pub fn with_modified(mut self, modified: u64) -> Self {
        self.modified = Some(modified);
        self
    }
}

/// Last segment of a virtual path (`"/"` for the root).
pub fn basename_of(virtual_path: &str) -> &str {
    let trimmed = virtual_path.trim_end_matches('/');
    match trimmed.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "/",
    }
}

/// Lowercased extension of a file name, if it has one.
///
/// Dot-files such as `.bashrc` have no extension.
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A subtree that could not be read while enumerating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingWarning {
    /// Virtual path of the folder that failed.
    pub virtual_path: String,
    /// Human-readable reason.
    pub message: String,
}

/// Wire form of a single grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    /// Slash-terminated path prefix.
    pub path_prefix: String,
    /// Whether writes are allowed below the prefix.
    pub can_write: bool,
}

/// Response body of `GET /me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrincipalInfo {
    /// Authenticated principal.
    pub principal: String,
    /// Grants in specificity order (most specific first).
    pub grants: Vec<AccessGrant>,
}

/// Error codes for common error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No principal was supplied.
    Unauthorized,
    /// Access denied (also used for paths outside the root).
    Forbidden,
    /// Resource not found.
    NotFound,
    /// Invalid request or parameters.
    InvalidRequest,
    /// Requested byte range cannot be served.
    RangeNotSatisfiable,
    /// Server-side error.
    InternalError,
}

/// Error body returned with every non-success status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ErrorResponse {
    /// Create a new error body.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_entry_derives_names() {
        let entry = DirEntry::file("/music/Album/Track 01.FLAC", 1024, Some(MimeCategory::Audio));
        assert_eq!(entry.basename, "Track 01.FLAC");
        assert_eq!(entry.extension.as_deref(), Some("flac"));
        assert!(entry.is_file);
        assert_eq!(entry.size_bytes, Some(1024));
    }

    #[test]
    fn test_directory_entry_has_no_file_fields() {
        let entry = DirEntry::directory("/music/Album");
        assert_eq!(entry.basename, "Album");
        assert!(!entry.is_file);
        assert!(entry.size_bytes.is_none());
        assert!(entry.extension.is_none());
        assert!(entry.mime_category.is_none());
    }

    #[test]
    fn test_basename_of_root() {
        assert_eq!(basename_of("/"), "/");
        assert_eq!(basename_of("/a/b/"), "b");
    }

    #[test]
    fn test_extension_of_dotfile() {
        assert_eq!(extension_of(".bashrc"), None);
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("trailing."), None);
        assert_eq!(extension_of("archive.tar.GZ").as_deref(), Some("gz"));
    }

    #[test]
    fn test_dir_entry_wire_format() {
        let entry = DirEntry::file("/a.png", 5, Some(MimeCategory::Image)).with_modified(1704067200);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["virtualPath"], "/a.png");
        assert_eq!(json["isFile"], true);
        assert_eq!(json["sizeBytes"], 5);
        assert_eq!(json["mimeCategory"], "image");
        assert_eq!(json["modified"], 1704067200);
    }

    #[test]
    fn test_directory_wire_format_omits_file_fields() {
        let json = serde_json::to_value(DirEntry::directory("/docs")).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("sizeBytes"));
        assert!(!object.contains_key("mimeCategory"));
    }

    #[test]
    fn test_error_response_json() {
        let body = ErrorResponse::new(ErrorCode::Forbidden, "access denied");
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(json, r#"{"code":"forbidden","message":"access denied"}"#);

        let restored: ErrorResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, body);
    }

    #[test]
    fn test_mime_category_serialization() {
        let json = serde_json::to_string(&MimeCategory::Pdf).unwrap();
        assert_eq!(json, "\"pdf\"");
        assert_eq!(MimeCategory::default(), MimeCategory::Other);
    }
}
