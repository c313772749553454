//! Single-range byte streaming.
//!
//! Parses a `Range: bytes=...` header against the file size, seeks the open
//! handle to the start offset and yields exactly the requested bytes as a
//! chunked stream. Nothing is buffered beyond one chunk.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom, Take};
use tokio_util::io::ReaderStream;
use tracing::debug;

use super::error::FileError;

/// Default read chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// How ranges reaching past end of file are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePolicy {
    /// Shorten the range to the last byte of the file.
    #[default]
    Clamp,
    /// Reject the range with 416.
    Strict,
}

/// An inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false; a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// `Content-Range` value for a file of `total_size` bytes.
    pub fn content_range(&self, total_size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total_size)
    }
}

/// Parse a `Range` header value for a file of `total_size` bytes.
///
/// Returns `Ok(None)` when no header is present. Only a single range is
/// supported; multiple ranges, other units and malformed values are
/// unsatisfiable, as is any range against an empty file.
pub fn parse_range(
    header: Option<&str>,
    total_size: u64,
    policy: RangePolicy,
) -> Result<Option<ByteRange>, FileError> {
    let Some(header) = header else {
        return Ok(None);
    };

    let unsatisfiable = || FileError::RangeNotSatisfiable { total_size };

    let header = header.trim();
    let set = match header.get(..6) {
        Some(unit) if unit.eq_ignore_ascii_case("bytes=") => header[6..].trim(),
        _ => return Err(unsatisfiable()),
    };

    if set.contains(',') || total_size == 0 {
        return Err(unsatisfiable());
    }

    let (start_str, end_str) = set.split_once('-').ok_or_else(unsatisfiable)?;
    let start_str = start_str.trim();
    let end_str = end_str.trim();
    let last = total_size - 1;

    // Suffix form: the final N bytes.
    if start_str.is_empty() {
        let suffix: u64 = end_str.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 {
            return Err(unsatisfiable());
        }
        if suffix > total_size && policy == RangePolicy::Strict {
            return Err(unsatisfiable());
        }
        let start = total_size.saturating_sub(suffix);
        return Ok(Some(ByteRange { start, end: last }));
    }

    let start: u64 = start_str.parse().map_err(|_| unsatisfiable())?;
    if start >= total_size {
        return Err(unsatisfiable());
    }

    let end = if end_str.is_empty() {
        last
    } else {
        let end: u64 = end_str.parse().map_err(|_| unsatisfiable())?;
        if end < start {
            return Err(unsatisfiable());
        }
        if end > last {
            match policy {
                RangePolicy::Clamp => last,
                RangePolicy::Strict => return Err(unsatisfiable()),
            }
        } else {
            end
        }
    };

    Ok(Some(ByteRange { start, end }))
}

/// Status and header values of a file response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHead {
    /// Full size of the file.
    pub total_size: u64,
    /// The satisfied range, if the request carried one.
    pub range: Option<ByteRange>,
}

impl StreamHead {
    /// Whether the response is `206 Partial Content`.
    pub fn is_partial(&self) -> bool {
        self.range.is_some()
    }

    /// Exact number of body bytes.
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.total_size, |r| r.len())
    }

    /// `Content-Range` value for partial responses.
    pub fn content_range(&self) -> Option<String> {
        self.range.map(|r| r.content_range(self.total_size))
    }
}

/// Body stream over the selected bytes of a file.
pub type FileBody = ReaderStream<Take<File>>;

/// An opened file ready to be streamed.
pub struct RangeStream {
    pub head: StreamHead,
    pub body: FileBody,
}

/// Opens files and positions them for range requests.
#[derive(Debug, Clone, Copy)]
pub struct RangeStreamer {
    policy: RangePolicy,
    chunk_size: usize,
}

impl Default for RangeStreamer {
    fn default() -> Self {
        Self::new(RangePolicy::default(), DEFAULT_CHUNK_SIZE)
    }
}

impl RangeStreamer {
    pub fn new(policy: RangePolicy, chunk_size: usize) -> Self {
        Self {
            policy,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn policy(&self) -> RangePolicy {
        self.policy
    }

    /// Open `real_path` and prepare the body for `range_header`.
    ///
    /// The size is taken from the opened handle, so the range is validated
    /// against the same file that is read. The handle is closed when the
    /// returned body is dropped, whether fully consumed or not.
    pub async fn open(
        &self,
        real_path: &Path,
        range_header: Option<&str>,
    ) -> Result<RangeStream, FileError> {
        let mut file = File::open(real_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                FileError::NotFound(real_path.display().to_string())
            }
            _ => FileError::Io(e),
        })?;

        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(FileError::IsADirectory(real_path.display().to_string()));
        }
        let total_size = metadata.len();

        let range = parse_range(range_header, total_size, self.policy)?;
        let head = StreamHead { total_size, range };

        if let Some(r) = range {
            file.seek(SeekFrom::Start(r.start)).await?;
        }

        debug!(
            path = %real_path.display(),
            total_size,
            start = range.map(|r| r.start),
            length = head.content_length(),
            "Opened file stream"
        );

        let body = ReaderStream::with_capacity(file.take(head.content_length()), self.chunk_size);
        Ok(RangeStream { head, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, size: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        let content: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        fs::write(&path, content).unwrap();
        path
    }

    async fn collect(body: FileBody) -> Vec<u8> {
        let mut out = Vec::new();
        let mut body = body;
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    fn unsatisfiable(result: Result<Option<ByteRange>, FileError>) -> bool {
        matches!(result, Err(FileError::RangeNotSatisfiable { .. }))
    }

    #[test]
    fn test_parse_no_header() {
        assert_eq!(parse_range(None, 100, RangePolicy::Clamp).unwrap(), None);
    }

    #[test]
    fn test_parse_closed_range() {
        let range = parse_range(Some("bytes=10-19"), 100, RangePolicy::Clamp)
            .unwrap()
            .unwrap();
        assert_eq!(range, ByteRange { start: 10, end: 19 });
        assert_eq!(range.len(), 10);
        assert_eq!(range.content_range(100), "bytes 10-19/100");
    }

    #[test]
    fn test_parse_open_ended_and_suffix() {
        assert_eq!(
            parse_range(Some("bytes=95-"), 100, RangePolicy::Strict).unwrap(),
            Some(ByteRange { start: 95, end: 99 })
        );
        assert_eq!(
            parse_range(Some("bytes=-10"), 100, RangePolicy::Clamp).unwrap(),
            Some(ByteRange { start: 90, end: 99 })
        );
        assert_eq!(
            parse_range(Some("bytes=-500"), 100, RangePolicy::Clamp).unwrap(),
            Some(ByteRange { start: 0, end: 99 })
        );
        assert!(unsatisfiable(parse_range(Some("bytes=-500"), 100, RangePolicy::Strict)));
        assert!(unsatisfiable(parse_range(Some("bytes=-0"), 100, RangePolicy::Clamp)));
    }

    #[test]
    fn test_parse_past_end_depends_on_policy() {
        assert_eq!(
            parse_range(Some("bytes=90-200"), 100, RangePolicy::Clamp).unwrap(),
            Some(ByteRange { start: 90, end: 99 })
        );
        assert!(unsatisfiable(parse_range(Some("bytes=90-200"), 100, RangePolicy::Strict)));
    }

    #[test]
    fn test_parse_start_at_or_past_end() {
        for policy in [RangePolicy::Clamp, RangePolicy::Strict] {
            assert!(unsatisfiable(parse_range(Some("bytes=100-"), 100, policy)));
            assert!(unsatisfiable(parse_range(Some("bytes=150-160"), 100, policy)));
        }
    }

    #[test]
    fn test_parse_malformed() {
        for header in [
            "bytes=",
            "bytes=abc-def",
            "bytes=20-10",
            "bytes=0-1,5-6",
            "items=0-10",
            "bytes 0-10",
            "",
        ] {
            assert!(
                unsatisfiable(parse_range(Some(header), 100, RangePolicy::Clamp)),
                "{header:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_empty_file() {
        assert!(unsatisfiable(parse_range(Some("bytes=0-"), 0, RangePolicy::Clamp)));
        assert_eq!(parse_range(None, 0, RangePolicy::Clamp).unwrap(), None);
    }

    #[test]
    fn test_parse_is_lenient_about_whitespace_and_case() {
        assert_eq!(
            parse_range(Some(" Bytes= 1 - 2 "), 10, RangePolicy::Clamp).unwrap(),
            Some(ByteRange { start: 1, end: 2 })
        );
    }

    #[tokio::test]
    async fn test_stream_full_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_file(temp_dir.path(), "full.bin", 1000);

        let stream = RangeStreamer::default().open(&path, None).await.unwrap();
        assert!(!stream.head.is_partial());
        assert_eq!(stream.head.content_length(), 1000);
        assert_eq!(stream.head.content_range(), None);

        let bytes = collect(stream.body).await;
        assert_eq!(bytes, fs::read(&path).unwrap());
    }

    #[tokio::test]
    async fn test_stream_range_returns_exact_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_file(temp_dir.path(), "range.bin", 100);

        let stream = RangeStreamer::default()
            .open(&path, Some("bytes=10-19"))
            .await
            .unwrap();
        assert!(stream.head.is_partial());
        assert_eq!(stream.head.content_length(), 10);
        assert_eq!(stream.head.content_range().as_deref(), Some("bytes 10-19/100"));

        let bytes = collect(stream.body).await;
        assert_eq!(bytes, (10u8..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_stream_small_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_file(temp_dir.path(), "chunks.bin", 10_000);

        let streamer = RangeStreamer::new(RangePolicy::Clamp, 1024);
        let stream = streamer.open(&path, Some("bytes=5000-")).await.unwrap();

        let mut body = stream.body;
        let mut total = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.unwrap();
            assert!(chunk.len() <= 1024);
            total += chunk.len();
        }
        assert_eq!(total, 5000);
    }

    #[tokio::test]
    async fn test_stream_strict_rejects_past_end() {
        let temp_dir = TempDir::new().unwrap();
        let path = create_test_file(temp_dir.path(), "strict.bin", 100);

        let streamer = RangeStreamer::new(RangePolicy::Strict, DEFAULT_CHUNK_SIZE);
        let result = streamer.open(&path, Some("bytes=90-200")).await;
        assert!(matches!(
            result,
            Err(FileError::RangeNotSatisfiable { total_size: 100 })
        ));
    }

    #[tokio::test]
    async fn test_stream_missing_file_and_directory() {
        let temp_dir = TempDir::new().unwrap();
        let streamer = RangeStreamer::default();

        let missing = streamer.open(&temp_dir.path().join("gone"), None).await;
        assert!(matches!(missing, Err(FileError::NotFound(_))));

        let dir = streamer.open(temp_dir.path(), None).await;
        assert!(matches!(dir, Err(FileError::IsADirectory(_))));
    }
}
