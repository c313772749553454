//! Extension to media type lookup.

use std::collections::HashMap;
use std::path::Path;

use protocol::messages::extension_of;
use protocol::MimeCategory;
use serde::{Deserialize, Serialize};

/// Media type of one extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    /// Coarse category.
    pub category: MimeCategory,
    /// MIME string sent as `Content-Type`.
    pub mime: String,
}

impl MediaType {
    fn new(category: MimeCategory, mime: &str) -> Self {
        Self {
            category,
            mime: mime.to_string(),
        }
    }
}

const BUILTIN: &[(&str, MimeCategory, &str)] = &[
    ("jpg", MimeCategory::Image, "image/jpeg"),
    ("jpeg", MimeCategory::Image, "image/jpeg"),
    ("png", MimeCategory::Image, "image/png"),
    ("gif", MimeCategory::Image, "image/gif"),
    ("webp", MimeCategory::Image, "image/webp"),
    ("bmp", MimeCategory::Image, "image/bmp"),
    ("heic", MimeCategory::Image, "image/heic"),
    ("tif", MimeCategory::Image, "image/tiff"),
    ("tiff", MimeCategory::Image, "image/tiff"),
    ("svg", MimeCategory::Image, "image/svg+xml"),
    ("mp4", MimeCategory::Video, "video/mp4"),
    ("m4v", MimeCategory::Video, "video/mp4"),
    ("mov", MimeCategory::Video, "video/quicktime"),
    ("webm", MimeCategory::Video, "video/webm"),
    ("mkv", MimeCategory::Video, "video/x-matroska"),
    ("avi", MimeCategory::Video, "video/x-msvideo"),
    ("mp3", MimeCategory::Audio, "audio/mpeg"),
    ("m4a", MimeCategory::Audio, "audio/mp4"),
    ("aac", MimeCategory::Audio, "audio/aac"),
    ("flac", MimeCategory::Audio, "audio/flac"),
    ("ogg", MimeCategory::Audio, "audio/ogg"),
    ("opus", MimeCategory::Audio, "audio/opus"),
    ("wav", MimeCategory::Audio, "audio/wav"),
    ("zip", MimeCategory::Archive, "application/zip"),
    ("tar", MimeCategory::Archive, "application/x-tar"),
    ("gz", MimeCategory::Archive, "application/gzip"),
    ("7z", MimeCategory::Archive, "application/x-7z-compressed"),
    ("rar", MimeCategory::Archive, "application/vnd.rar"),
    ("pdf", MimeCategory::Pdf, "application/pdf"),
];

/// Extension to media type table.
///
/// Built-in entries cover common photo, video, audio, archive and PDF types;
/// configured overrides replace or extend them. Extensions are matched
/// case-insensitively.
#[derive(Debug, Clone)]
pub struct MediaTypeTable {
    entries: HashMap<String, MediaType>,
}

impl Default for MediaTypeTable {
    fn default() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(ext, category, mime)| (ext.to_string(), MediaType::new(*category, mime)))
            .collect();
        Self { entries }
    }
}

impl MediaTypeTable {
    /// Built-in table extended with overrides.
    pub fn with_overrides(overrides: &HashMap<String, MediaType>) -> Self {
        let mut table = Self::default();
        for (ext, media) in overrides {
            let ext = ext.trim_start_matches('.').to_ascii_lowercase();
            table.entries.insert(ext, media.clone());
        }
        table
    }

    /// Look up an extension (without the dot).
    pub fn lookup(&self, extension: &str) -> Option<&MediaType> {
        self.entries.get(&extension.to_ascii_lowercase())
    }

    /// Category of a file name; unknown extensions map to [`MimeCategory::Other`].
    pub fn category_of(&self, file_name: &str) -> MimeCategory {
        extension_of(file_name)
            .and_then(|ext| self.lookup(&ext).map(|m| m.category))
            .unwrap_or_default()
    }

    /// `Content-Type` for a path.
    ///
    /// Falls back to `mime_guess`, then to `application/octet-stream`.
    pub fn content_type_for(&self, path: &Path) -> String {
        let known = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(extension_of)
            .and_then(|ext| self.lookup(&ext).map(|m| m.mime.clone()));

        known.unwrap_or_else(|| {
            mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        })
    }
}
