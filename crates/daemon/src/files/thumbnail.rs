//! Image transformation seam.
//!
//! Resizing is delegated to an [`ImageTransform`] implementation supplied by
//! the embedding application. This module only decides whether one is
//! requested for a given file and size.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use bytes::Bytes;
use protocol::MimeCategory;
use serde::{Deserialize, Serialize};

use super::error::FileError;

/// Requested rendition of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizePolicy {
    /// Small grid thumbnail.
    Thumb,
    /// Screen-sized preview.
    Preview,
    /// Untouched file bytes.
    #[default]
    Original,
}

impl SizePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thumb => "thumb",
            Self::Preview => "preview",
            Self::Original => "original",
        }
    }
}

impl fmt::Display for SizePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SizePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "thumb" | "thumbnail" => Ok(Self::Thumb),
            "preview" => Ok(Self::Preview),
            "original" | "" => Ok(Self::Original),
            other => Err(format!("unknown size '{other}'")),
        }
    }
}

/// Output of an image transform.
#[derive(Debug, Clone)]
pub struct TransformedImage {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Produces resized renditions of image files.
///
/// Called from a blocking thread.
pub trait ImageTransform: Send + Sync {
    fn transform(&self, real_path: &Path, size: SizePolicy) -> Result<TransformedImage, FileError>;
}

/// Whether a file of `category` requested at `size` needs transforming.
pub fn wants_transform(category: MimeCategory, size: SizePolicy) -> bool {
    category == MimeCategory::Image && size != SizePolicy::Original
}
