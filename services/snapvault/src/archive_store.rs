use crate::frame_fetcher::Frame;
use chrono::{DateTime, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, error, info, instrument, warn};

/// Filename layout for archived frames. Fixed width, so byte order is time order.
pub const FILENAME_FORMAT: &str = "%Y%m%d_%H%M%S.jpg";

/// Errors raised by the archive store
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archived frame not found: {0}")]
    NotFound(String),

    #[error("File system error at {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode frame: {0}")]
    Encode(String),
}

impl ArchiveError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArchiveError::FileSystem {
            path: path.into(),
            source,
        }
    }
}

/// A frame persisted in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedFrame {
    pub filename: String,
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
    pub size_bytes: usize,
}

/// Outcome of a best-effort archive sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearReport {
    /// Number of files deleted
    pub removed: usize,
    /// Entries that could not be deleted
    pub failed: Vec<String>,
}

/// Flat directory of timestamp-named JPEG frames.
///
/// The directory listing is the only index. Writers (save, clear) take the
/// write half of the lock; exports read through an [`ArchiveSnapshot`] that
/// holds the read half for as long as it lives.
pub struct ArchiveStore {
    root: PathBuf,
    jpeg_quality: u8,
    lock: RwLock<()>,
}

impl ArchiveStore {
    pub fn new(root: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            root: root.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            lock: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filename a frame captured at `captured_at` is stored under
    pub fn filename_for(captured_at: DateTime<Utc>) -> String {
        captured_at.format(FILENAME_FORMAT).to_string()
    }

    /// Encode an image the way the archive stores it
    pub async fn encode_jpeg(&self, image: &DynamicImage) -> Result<Vec<u8>, ArchiveError> {
        let rgb = image.to_rgb8();
        let quality = self.jpeg_quality;

        tokio::task::spawn_blocking(move || -> Result<Vec<u8>, ArchiveError> {
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, quality)
                .encode_image(&rgb)
                .map_err(|e| ArchiveError::Encode(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| ArchiveError::Encode(format!("encode task failed: {}", e)))?
    }

    /// Persist a frame under its capture-time filename
    pub async fn save(&self, frame: &Frame) -> Result<ArchivedFrame, ArchiveError> {
        let jpeg = self.encode_jpeg(frame.image()).await?;
        self.save_jpeg(frame.captured_at(), &jpeg).await
    }

    /// Persist already-encoded JPEG bytes. A capture in the same second
    /// overwrites the earlier file.
    #[instrument(skip(self, jpeg), fields(size_bytes = jpeg.len()))]
    pub async fn save_jpeg(
        &self,
        captured_at: DateTime<Utc>,
        jpeg: &[u8],
    ) -> Result<ArchivedFrame, ArchiveError> {
        let _guard = self.lock.write().await;

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ArchiveError::io(&self.root, e))?;

        let filename = Self::filename_for(captured_at);
        let path = self.root.join(&filename);

        if fs::try_exists(&path).await.unwrap_or(false) {
            warn!(filename = %filename, "Overwriting frame captured in the same second");
        }

        fs::write(&path, jpeg)
            .await
            .map_err(|e| ArchiveError::io(&path, e))?;

        info!(path = %path.display(), "Saved frame");

        Ok(ArchivedFrame {
            filename,
            path,
            captured_at,
            size_bytes: jpeg.len(),
        })
    }

    /// Every file in the archive, sorted by name (and therefore by capture time)
    pub async fn list(&self) -> Result<Vec<String>, ArchiveError> {
        let _guard = self.lock.read().await;
        list_files(&self.root).await
    }

    /// Hold the archive steady and take its ordered listing
    pub async fn snapshot(&self) -> Result<ArchiveSnapshot<'_>, ArchiveError> {
        let guard = self.lock.read().await;
        let filenames = list_files(&self.root).await?;

        Ok(ArchiveSnapshot {
            _guard: guard,
            root: &self.root,
            filenames,
        })
    }

    /// Delete every file in the archive. Per-file failures are logged and
    /// skipped; the sweep itself always completes. Subdirectories are left alone.
    #[instrument(skip(self), fields(root = %self.root.display()))]
    pub async fn clear(&self) -> Result<ClearReport, ArchiveError> {
        let _guard = self.lock.write().await;
        let mut report = ClearReport::default();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(report),
            Err(e) => return Err(ArchiveError::io(&self.root, e)),
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to read archive entry");
                    break;
                }
            };

            let path = entry.path();
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                debug!(path = %path.display(), "Skipping non-file archive entry");
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted frame");
                    report.removed += 1;
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to delete frame");
                    report
                        .failed
                        .push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }

        metrics::counter!("snapvault_archive_cleared_files_total").increment(report.removed as u64);

        info!(
            removed = report.removed,
            failed = report.failed.len(),
            "Archive cleared"
        );

        Ok(report)
    }

    /// Raw bytes of one archived file
    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, ArchiveError> {
        if !is_plain_filename(filename) {
            return Err(ArchiveError::NotFound(filename.to_string()));
        }

        let path = self.root.join(filename);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ArchiveError::NotFound(filename.to_string()))
            }
            // Reading a directory entry fails with an OS-specific kind
            Err(_) if path.is_dir() => Err(ArchiveError::NotFound(filename.to_string())),
            Err(e) => Err(ArchiveError::io(path, e)),
        }
    }
}

/// Consistent, ordered view of the archive used by exports.
pub struct ArchiveSnapshot<'a> {
    _guard: RwLockReadGuard<'a, ()>,
    root: &'a Path,
    filenames: Vec<String>,
}

impl ArchiveSnapshot<'_> {
    pub fn is_empty(&self) -> bool {
        self.filenames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.filenames.len()
    }

    /// Ordered (filename, path) pairs
    pub fn paths(&self) -> Vec<(String, PathBuf)> {
        self.filenames
            .iter()
            .map(|name| (name.clone(), self.root.join(name)))
            .collect()
    }
}

async fn list_files(root: &Path) -> Result<Vec<String>, ArchiveError> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ArchiveError::io(root, e)),
    };

    let mut filenames = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ArchiveError::io(root, e))?
    {
        let is_file = entry
            .file_type()
            .await
            .map(|t| t.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }

        match entry.file_name().into_string() {
            Ok(name) => filenames.push(name),
            Err(name) => warn!(name = ?name, "Skipping non UTF-8 archive entry"),
        }
    }

    // read_dir order is unspecified
    filenames.sort();
    Ok(filenames)
}

/// Reject anything that could escape the archive directory
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}
