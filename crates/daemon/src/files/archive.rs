//! Streaming ZIP archives of permitted subtrees.
//!
//! An [`ArchiveJob`] is built from a recursive listing and consumed once by
//! [`ArchiveStreamer`]. The archive is written on a blocking thread into a
//! bounded channel, so at most one chunk per in-flight slot is held in
//! memory and a slow client applies backpressure to file reads.
//!
//! Dropping the returned body stream cancels the job. The producer notices
//! at the next chunk, closes the file it is reading and exits.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::browser::Listing;
use super::error::FileError;
use super::resolver::PathResolver;

/// Chunks buffered between the producer and the connection.
const CHANNEL_DEPTH: usize = 4;

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    #[default]
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
        }
    }
}

/// Compression applied to archive entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveCompression {
    /// No compression. Media files rarely shrink, so this is the default.
    #[default]
    Stored,
    Deflated,
}

impl ArchiveCompression {
    fn method(&self) -> CompressionMethod {
        match self {
            Self::Stored => CompressionMethod::Stored,
            Self::Deflated => CompressionMethod::Deflated,
        }
    }
}

/// Archive writer settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    pub format: ArchiveFormat,
    pub compression: ArchiveCompression,
    /// Bytes per chunk pushed to the connection.
    pub chunk_size: usize,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            format: ArchiveFormat::default(),
            compression: ArchiveCompression::default(),
            chunk_size: 64 * 1024,
        }
    }
}

/// One file to be written into an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, relative to the job's base path.
    pub entry_name: String,
    /// Virtual path the bytes are read from.
    pub virtual_path: String,
}

/// A single archive request.
#[derive(Debug, Clone)]
pub struct ArchiveJob {
    /// Virtual folder being archived.
    pub base_path: String,
    /// Files in listing order.
    pub entries: Vec<ArchiveEntry>,
}

impl ArchiveJob {
    /// Build a job from a recursive listing of `base_path`.
    ///
    /// Directories are structural only and produce no entries.
    pub fn from_listing(base_path: &str, listing: &Listing) -> Self {
        let entries = listing
            .files()
            .filter_map(|entry| {
                entry_name_for(base_path, &entry.virtual_path).map(|name| ArchiveEntry {
                    entry_name: name.to_string(),
                    virtual_path: entry.virtual_path.clone(),
                })
            })
            .collect();

        Self {
            base_path: base_path.to_string(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Path of `virtual_path` inside an archive rooted at `base_path`.
///
/// Returns `None` when the path is not strictly below the base.
pub fn entry_name_for<'a>(base_path: &str, virtual_path: &'a str) -> Option<&'a str> {
    let base = base_path.trim_end_matches('/');
    let rest = virtual_path.strip_prefix(base)?;
    let rest = rest.strip_prefix('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Download file name for an archive of `base_path`.
///
/// Uses the last path segment, or `default_name` for the root.
pub fn archive_file_name(base_path: &str, default_name: &str, format: ArchiveFormat) -> String {
    let stem = base_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(default_name);
    format!("{}.{}", stem, format.extension())
}

/// Totals of a completed archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub files: usize,
    pub bytes: u64,
}

/// Writes archive jobs into a byte sink.
#[derive(Clone)]
pub struct ArchiveStreamer {
    resolver: Arc<PathResolver>,
    options: ArchiveOptions,
}

impl fmt::Debug for ArchiveStreamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveStreamer")
            .field("root", &self.resolver.root())
            .field("options", &self.options)
            .finish()
    }
}

impl ArchiveStreamer {
    pub fn new(resolver: Arc<PathResolver>, options: ArchiveOptions) -> Self {
        Self { resolver, options }
    }

    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// Write `job` into `sink`, blocking the current thread.
    ///
    /// Each file is re-resolved and opened only while it is being copied.
    /// A missing or unreadable file, a failed write or cancellation aborts
    /// the archive before the central directory is written, leaving the
    /// sink with an invalid archive.
    pub fn write_to<W: Write>(
        &self,
        job: &ArchiveJob,
        sink: W,
        cancel: &CancellationToken,
    ) -> Result<ArchiveSummary, FileError> {
        let closed = Arc::new(AtomicBool::new(false));
        let mut zip = ZipWriter::new_stream(GatedSink {
            inner: sink,
            closed: Arc::clone(&closed),
        });

        match self.write_entries(job, &mut zip, cancel) {
            Ok(summary) => {
                let mut inner = zip.finish().map_err(|e| FileError::ArchiveAborted {
                    entry: job.base_path.clone(),
                    reason: e.to_string(),
                })?;
                inner.flush()?;
                Ok(summary)
            }
            Err(e) => {
                // The writer finalizes on drop; nothing more may reach the sink.
                closed.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    fn write_entries<W: Write + Seek>(
        &self,
        job: &ArchiveJob,
        zip: &mut ZipWriter<W>,
        cancel: &CancellationToken,
    ) -> Result<ArchiveSummary, FileError> {
        let mut buf = vec![0u8; self.options.chunk_size.max(1)];
        let mut summary = ArchiveSummary::default();

        for entry in &job.entries {
            let aborted = |reason: String| FileError::ArchiveAborted {
                entry: entry.virtual_path.clone(),
                reason,
            };

            if cancel.is_cancelled() {
                return Err(aborted("cancelled".to_string()));
            }

            let resolved = self
                .resolver
                .resolve(&entry.virtual_path)
                .map_err(|e| aborted(e.to_string()))?;
            if resolved.is_directory {
                return Err(aborted("entry became a directory".to_string()));
            }

            let mut file = File::open(&resolved.real_path).map_err(|e| aborted(e.to_string()))?;
            let size = file.metadata().map_err(|e| aborted(e.to_string()))?.len();

            let options = SimpleFileOptions::default()
                .compression_method(self.options.compression.method())
                .large_file(size > u32::MAX as u64);
            zip.start_file(entry.entry_name.as_str(), options)
                .map_err(|e| aborted(e.to_string()))?;

            loop {
                let n = file.read(&mut buf).map_err(|e| aborted(e.to_string()))?;
                if n == 0 {
                    break;
                }
                zip.write_all(&buf[..n]).map_err(|e| aborted(e.to_string()))?;
                summary.bytes += n as u64;

                if cancel.is_cancelled() {
                    return Err(aborted("cancelled".to_string()));
                }
            }

            summary.files += 1;
            debug!(entry = %entry.entry_name, size, "Archived file");
        }

        Ok(summary)
    }

    /// Start writing `job` on a blocking thread and return the body stream.
    ///
    /// The job is registered in `archives` until the producer exits.
    pub fn spawn(
        &self,
        job: ArchiveJob,
        archives: &ActiveArchives,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);
        let registration = archives.register();
        let cancel = registration.token.clone();
        let guard = cancel.clone().drop_guard();
        let id = registration.id;
        let streamer = self.clone();

        info!(
            archive_id = %id,
            path = %job.base_path,
            files = job.len(),
            "Starting archive"
        );

        tokio::task::spawn_blocking(move || {
            let _registration = registration;
            let writer = ChannelWriter::new(tx.clone(), streamer.options.chunk_size);

            match streamer.write_to(&job, writer, &cancel) {
                Ok(summary) => {
                    info!(
                        archive_id = %id,
                        files = summary.files,
                        bytes = summary.bytes,
                        "Archive completed"
                    );
                }
                Err(e) if cancel.is_cancelled() => {
                    info!(archive_id = %id, error = %e, "Archive cancelled");
                }
                Err(e) => {
                    error!(archive_id = %id, path = %job.base_path, error = %e, "Archive aborted");
                    // Terminate the body with an error instead of a clean end.
                    let _ = tx.blocking_send(Err(io::Error::other(e.to_string())));
                }
            }
        });

        stream::unfold((rx, guard), |(mut rx, guard)| async move {
            rx.recv().await.map(|item| (item, (rx, guard)))
        })
    }
}

/// Sink that silently discards all writes once closed.
///
/// The zip writer tries to finish the archive when dropped; after an abort
/// those trailing bytes must not reach the client.
struct GatedSink<W> {
    inner: W,
    closed: Arc<AtomicBool>,
}

impl<W: Write> GatedSink<W> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl<W: Write> Write for GatedSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Ok(data.len());
        }
        self.inner.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.inner.flush()
    }
}

/// `Write` adapter pushing fixed-size chunks into a channel.
///
/// Send failures mean the receiving side (the connection) is gone.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: BytesMut,
    chunk_size: usize,
}

impl ChannelWriter {
    fn new(tx: mpsc::Sender<io::Result<Bytes>>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            tx,
            buf: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    fn send_buffered(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = self.buf.split().freeze();
        self.tx
            .blocking_send(Ok(chunk))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client disconnected"))
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self.chunk_size - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend_from_slice(&data[..n]);
        if self.buf.len() >= self.chunk_size {
            self.send_buffered()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffered()
    }
}

/// Registry of running archive jobs.
#[derive(Debug, Clone, Default)]
pub struct ActiveArchives {
    inner: Arc<DashMap<Uuid, CancellationToken>>,
}

/// Registration of one job; removed from the registry on drop.
struct Registration {
    id: Uuid,
    token: CancellationToken,
    archives: Arc<DashMap<Uuid, CancellationToken>>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.archives.remove(&self.id);
    }
}

impl ActiveArchives {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self) -> Registration {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        self.inner.insert(id, token.clone());
        Registration {
            id,
            token,
            archives: Arc::clone(&self.inner),
        }
    }

    /// Number of jobs whose producer has not exited yet.
    pub fn active_count(&self) -> usize {
        self.inner.len()
    }

    /// Cancel every running job.
    pub fn cancel_all(&self) {
        let count = self.inner.len();
        for entry in self.inner.iter() {
            entry.value().cancel();
        }
        if count > 0 {
            info!(count, "Cancelled active archives");
        }
    }
}
