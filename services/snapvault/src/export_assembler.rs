//! Turns the ordered archive into downloadable artifacts.
//!
//! Every export walks the archive listing in filename order, which is capture
//! order. Artifacts are built in full, written under a unique temporary name
//! in the export directory and renamed over the fixed artifact name, so a
//! failed export never leaves a truncated file behind.

use crate::archive_store::{ArchiveError, ArchiveSnapshot, ArchiveStore};
use crate::video_encoder::{VideoEncoder, VideoError, VideoWriter};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, RgbImage};
use std::fmt;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Lowest accepted export frame rate
pub const MIN_FRAME_RATE: u32 = 1;
/// Highest accepted export frame rate
pub const MAX_FRAME_RATE: u32 = 30;

/// GIF colour quantization speed (1 = best quality, 30 = fastest)
const GIF_QUANTIZE_SPEED: i32 = 10;

/// Errors raised while assembling an export
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Archive is empty, nothing to export")]
    EmptyArchive,

    #[error("Frame {filename} is {actual_width}x{actual_height}, expected {expected_width}x{expected_height}")]
    DimensionMismatch {
        filename: String,
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("Archived frame {filename} could not be decoded: {message}")]
    Decode { filename: String, message: String },

    #[error("Failed to encode {format} export: {message}")]
    Encode { format: ExportFormat, message: String },

    #[error("Failed to write export artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

impl ExportError {
    /// Short label used in metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ExportError::EmptyArchive => "empty_archive",
            ExportError::DimensionMismatch { .. } => "dimension_mismatch",
            ExportError::Decode { .. } => "decode",
            ExportError::Encode { .. } => "encode",
            ExportError::Io { .. } => "io",
            ExportError::Archive(_) => "archive",
        }
    }

    fn encode(format: ExportFormat, message: impl fmt::Display) -> Self {
        ExportError::Encode {
            format,
            message: message.to_string(),
        }
    }
}

/// Export frame rate, always within [`MIN_FRAME_RATE`, `MAX_FRAME_RATE`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameRate(u32);

impl FrameRate {
    /// Clamp any requested rate into the accepted range
    pub fn clamp(requested: i64) -> Self {
        let clamped = requested.clamp(MIN_FRAME_RATE as i64, MAX_FRAME_RATE as i64);
        Self(clamped as u32)
    }

    /// Rate from a raw request parameter. Missing or non-integer values fall
    /// back to `default`.
    pub fn from_param(raw: Option<&str>, default: i64) -> Self {
        let requested = raw
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(default);
        Self::clamp(requested)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// How long each frame stays on screen
    pub fn frame_delay(self) -> Delay {
        Delay::from_numer_denom_ms(1000, self.0)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self(MIN_FRAME_RATE)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}fps", self.0)
    }
}

/// Export container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    Zip,
    Gif,
    Video,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Zip => "zip",
            ExportFormat::Gif => "gif",
            ExportFormat::Video => "video",
        }
    }

    /// Fixed artifact name, overwritten by every export
    pub fn artifact_name(&self) -> &'static str {
        match self {
            ExportFormat::Zip => "saved_images.zip",
            ExportFormat::Gif => "animated.gif",
            ExportFormat::Video => "video.avi",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Zip => "application/zip",
            ExportFormat::Gif => "image/gif",
            ExportFormat::Video => "video/x-msvideo",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One export call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub frame_rate: FrameRate,
}

impl ExportRequest {
    pub fn new(format: ExportFormat, frame_rate: FrameRate) -> Self {
        Self { format, frame_rate }
    }
}

/// A finished export
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub format: ExportFormat,
    pub bytes: Vec<u8>,
    pub frame_count: usize,
    pub path: PathBuf,
}

impl ExportArtifact {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn filename(&self) -> &'static str {
        self.format.artifact_name()
    }
}

/// Builds ZIP, GIF and video exports from the archive
pub struct ExportAssembler {
    store: Arc<ArchiveStore>,
    export_dir: PathBuf,
    video: Arc<dyn VideoEncoder>,
}

impl ExportAssembler {
    pub fn new(
        store: Arc<ArchiveStore>,
        export_dir: impl Into<PathBuf>,
        video: Arc<dyn VideoEncoder>,
    ) -> Self {
        Self {
            store,
            export_dir: export_dir.into(),
            video,
        }
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    /// Run one export and record its outcome
    #[instrument(skip(self), fields(format = %request.format, frame_rate = %request.frame_rate))]
    pub async fn export(&self, request: ExportRequest) -> Result<ExportArtifact, ExportError> {
        let started = Instant::now();
        let result = match request.format {
            ExportFormat::Zip => self.build_zip().await,
            ExportFormat::Gif => self.build_gif(request.frame_rate).await,
            ExportFormat::Video => self.build_video(request.frame_rate).await,
        };

        let format = request.format.as_str();
        match &result {
            Ok(artifact) => {
                metrics::counter!(
                    "snapvault_exports_total",
                    "format" => format,
                    "outcome" => "success"
                )
                .increment(1);
                metrics::histogram!("snapvault_export_frames", "format" => format)
                    .record(artifact.frame_count as f64);
                info!(
                    frames = artifact.frame_count,
                    size_bytes = artifact.bytes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Export complete"
                );
            }
            Err(e) => {
                metrics::counter!(
                    "snapvault_exports_total",
                    "format" => format,
                    "outcome" => e.kind()
                )
                .increment(1);
                warn!(error = %e, "Export failed");
            }
        }

        result
    }

    /// Every archived file, under its stored name, in a deflate ZIP.
    /// An empty archive gives a valid empty ZIP.
    pub async fn build_zip(&self) -> Result<ExportArtifact, ExportError> {
        let snapshot = self.store.snapshot().await?;
        let frame_count = snapshot.len();
        let entries = snapshot.paths();

        let bytes = tokio::task::spawn_blocking(move || zip_files(&entries))
            .await
            .map_err(|e| ExportError::encode(ExportFormat::Zip, e))??;

        let path = self.commit(ExportFormat::Zip, &bytes).await?;
        drop(snapshot);

        Ok(ExportArtifact {
            format: ExportFormat::Zip,
            bytes,
            frame_count,
            path,
        })
    }

    /// Animated GIF, one archived frame per `1 / frame_rate` seconds, looping
    pub async fn build_gif(&self, frame_rate: FrameRate) -> Result<ExportArtifact, ExportError> {
        let snapshot = self.store.snapshot().await?;
        if snapshot.is_empty() {
            return Err(ExportError::EmptyArchive);
        }
        let frame_count = snapshot.len();
        let entries = snapshot.paths();

        let bytes = tokio::task::spawn_blocking(move || encode_gif(&entries, frame_rate))
            .await
            .map_err(|e| ExportError::encode(ExportFormat::Gif, e))??;

        let path = self.commit(ExportFormat::Gif, &bytes).await?;
        drop(snapshot);

        Ok(ExportArtifact {
            format: ExportFormat::Gif,
            bytes,
            frame_count,
            path,
        })
    }

    /// Video at `frame_rate`, sized by the first archived frame. Every later
    /// frame must match that size.
    pub async fn build_video(&self, frame_rate: FrameRate) -> Result<ExportArtifact, ExportError> {
        let snapshot = self.store.snapshot().await?;
        if snapshot.is_empty() {
            return Err(ExportError::EmptyArchive);
        }

        fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| io_error(&self.export_dir, e))?;
        let staging = self.staging_path(ExportFormat::Video);

        let result = self.encode_video(&snapshot, &staging, frame_rate).await;
        if let Err(e) = result {
            discard(&staging).await;
            return Err(e);
        }

        let path = self.export_dir.join(ExportFormat::Video.artifact_name());
        if let Err(e) = fs::rename(&staging, &path).await {
            discard(&staging).await;
            return Err(io_error(&path, e));
        }

        let bytes = fs::read(&path).await.map_err(|e| io_error(&path, e))?;
        let frame_count = snapshot.len();
        drop(snapshot);

        Ok(ExportArtifact {
            format: ExportFormat::Video,
            bytes,
            frame_count,
            path,
        })
    }

    async fn encode_video(
        &self,
        snapshot: &ArchiveSnapshot<'_>,
        output: &Path,
        frame_rate: FrameRate,
    ) -> Result<(), ExportError> {
        let mut entries = snapshot.paths().into_iter();
        let (first_name, first_path) = entries.next().ok_or(ExportError::EmptyArchive)?;

        let first = decode_rgb(first_name, first_path).await?;
        let (width, height) = first.dimensions();

        let mut writer = self
            .video
            .open(output, width, height, frame_rate.get())
            .await
            .map_err(|e| ExportError::encode(ExportFormat::Video, e))?;

        debug!(width, height, frame_rate = frame_rate.get(), "Video encoder opened");

        if let Err(e) = write_video_frame(writer.as_mut(), &first).await {
            writer.abort().await;
            return Err(e);
        }

        for (filename, path) in entries {
            let frame = match decode_rgb(filename.clone(), path).await {
                Ok(frame) => frame,
                Err(e) => {
                    writer.abort().await;
                    return Err(e);
                }
            };

            if frame.dimensions() != (width, height) {
                writer.abort().await;
                return Err(ExportError::DimensionMismatch {
                    filename,
                    expected_width: width,
                    expected_height: height,
                    actual_width: frame.width(),
                    actual_height: frame.height(),
                });
            }

            if let Err(e) = write_video_frame(writer.as_mut(), &frame).await {
                writer.abort().await;
                return Err(e);
            }
        }

        writer
            .finish()
            .await
            .map_err(|e| ExportError::encode(ExportFormat::Video, e))
    }

    fn staging_path(&self, format: ExportFormat) -> PathBuf {
        self.export_dir.join(format!(
            ".{}.{}.tmp",
            format.artifact_name(),
            Uuid::new_v4().simple()
        ))
    }

    /// Write the finished artifact and move it over the fixed name
    async fn commit(&self, format: ExportFormat, bytes: &[u8]) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.export_dir)
            .await
            .map_err(|e| io_error(&self.export_dir, e))?;

        let staging = self.staging_path(format);
        let path = self.export_dir.join(format.artifact_name());

        if let Err(e) = write_synced(&staging, bytes).await {
            discard(&staging).await;
            return Err(io_error(&staging, e));
        }

        if let Err(e) = fs::rename(&staging, &path).await {
            discard(&staging).await;
            return Err(io_error(&path, e));
        }

        debug!(path = %path.display(), size_bytes = bytes.len(), "Export artifact written");
        Ok(path)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> ExportError {
    ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

async fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove staged export");
        }
    }
}

async fn write_video_frame(
    writer: &mut dyn VideoWriter,
    frame: &RgbImage,
) -> Result<(), ExportError> {
    writer
        .write_frame(frame.as_raw())
        .await
        .map_err(|e: VideoError| ExportError::encode(ExportFormat::Video, e))
}

async fn decode_rgb(filename: String, path: PathBuf) -> Result<RgbImage, ExportError> {
    let name = filename.clone();
    tokio::task::spawn_blocking(move || load_image(&filename, &path).map(|img| img.to_rgb8()))
        .await
        .map_err(|e| ExportError::Decode {
            filename: name,
            message: e.to_string(),
        })?
}

fn load_image(filename: &str, path: &Path) -> Result<image::DynamicImage, ExportError> {
    let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;
    image::load_from_memory(&bytes).map_err(|e| ExportError::Decode {
        filename: filename.to_string(),
        message: e.to_string(),
    })
}

fn zip_files(entries: &[(String, PathBuf)]) -> Result<Vec<u8>, ExportError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, path) in entries {
        let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| ExportError::encode(ExportFormat::Zip, e))?;
        zip.write_all(&bytes)
            .map_err(|e| ExportError::encode(ExportFormat::Zip, e))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| ExportError::encode(ExportFormat::Zip, e))?;
    Ok(cursor.into_inner())
}

fn encode_gif(
    entries: &[(String, PathBuf)],
    frame_rate: FrameRate,
) -> Result<Vec<u8>, ExportError> {
    let mut out = Vec::new();
    let delay = frame_rate.frame_delay();
    let mut expected: Option<(u32, u32)> = None;

    {
        let mut encoder = GifEncoder::new_with_speed(&mut out, GIF_QUANTIZE_SPEED);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|e| ExportError::encode(ExportFormat::Gif, e))?;

        for (filename, path) in entries {
            let rgba = load_image(filename, path)?.to_rgba8();

            // The GIF canvas is sized by the first frame
            let dimensions = rgba.dimensions();
            let (width, height) = *expected.get_or_insert(dimensions);
            if dimensions != (width, height) {
                return Err(ExportError::DimensionMismatch {
                    filename: filename.clone(),
                    expected_width: width,
                    expected_height: height,
                    actual_width: dimensions.0,
                    actual_height: dimensions.1,
                });
            }

            encoder
                .encode_frame(image::Frame::from_parts(rgba, 0, 0, delay))
                .map_err(|e| ExportError::encode(ExportFormat::Gif, e))?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive_store::test_support::TempDir;
    use crate::frame_fetcher::test_support::frame_at_second;
    use crate::video_encoder::test_support::RecordingEncoder;
    use image::codecs::gif::GifDecoder;
    use image::AnimationDecoder;
    use std::io::Read;
    use tokio_test::assert_err;

    struct Fixture {
        _dir: TempDir,
        store: Arc<ArchiveStore>,
        video: RecordingEncoder,
        assembler: ExportAssembler,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new();
        let store = Arc::new(ArchiveStore::new(dir.join("saved_images"), 90));
        let video = RecordingEncoder::default();
        let assembler =
            ExportAssembler::new(store.clone(), dir.join("exports"), Arc::new(video.clone()));
        Fixture {
            _dir: dir,
            store,
            video,
            assembler,
        }
    }

    async fn save_seconds(store: &ArchiveStore, seconds: &[u32], width: u32, height: u32) {
        for &second in seconds {
            store.save(&frame_at_second(second, width, height)).await.unwrap();
        }
    }

    fn staged_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .filter(|name| name.ends_with(".tmp"))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn test_frame_rate_clamp() {
        assert_eq!(FrameRate::clamp(1).get(), 1);
        assert_eq!(FrameRate::clamp(15).get(), 15);
        assert_eq!(FrameRate::clamp(30).get(), 30);
        assert_eq!(FrameRate::clamp(0).get(), 1);
        assert_eq!(FrameRate::clamp(-7).get(), 1);
        assert_eq!(FrameRate::clamp(31).get(), 30);
        assert_eq!(FrameRate::clamp(i64::MAX).get(), 30);
        assert_eq!(FrameRate::clamp(i64::MIN).get(), 1);
    }

    #[test]
    fn test_frame_rate_from_param() {
        assert_eq!(FrameRate::from_param(None, 1).get(), 1);
        assert_eq!(FrameRate::from_param(Some("12"), 1).get(), 12);
        assert_eq!(FrameRate::from_param(Some(" 100 "), 1).get(), 30);
        assert_eq!(FrameRate::from_param(Some("fast"), 4).get(), 4);
        assert_eq!(FrameRate::from_param(Some("2.5"), 1).get(), 1);
        assert_eq!(FrameRate::default().get(), 1);
    }

    #[test]
    fn test_export_format_metadata() {
        assert_eq!(ExportFormat::Zip.content_type(), "application/zip");
        assert_eq!(ExportFormat::Video.artifact_name(), "video.avi");
    }

    #[tokio::test]
    async fn test_zip_contains_archive_byte_for_byte() {
        let fx = fixture();
        save_seconds(&fx.store, &[2, 1], 8, 8).await;

        let artifact = fx.assembler.build_zip().await.unwrap();
        assert_eq!(artifact.frame_count, 2);
        assert_eq!(artifact.filename(), "saved_images.zip");
        assert_eq!(std::fs::read(&artifact.path).unwrap(), artifact.bytes);

        let mut archive = zip::ZipArchive::new(Cursor::new(artifact.bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        for (index, name) in ["20240101_000001.jpg", "20240101_000002.jpg"].iter().enumerate() {
            let mut entry = archive.by_index(index).unwrap();
            assert_eq!(entry.name(), *name);
            assert_eq!(entry.compression(), CompressionMethod::Deflated);

            let mut contents = Vec::new();
            entry.read_to_end(&mut contents).unwrap();
            assert_eq!(contents, fx.store.read(name).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_zip_of_empty_archive_is_valid() {
        let fx = fixture();

        let artifact = fx.assembler.build_zip().await.unwrap();

        assert_eq!(artifact.frame_count, 0);
        let archive = zip::ZipArchive::new(Cursor::new(artifact.bytes)).unwrap();
        assert_eq!(archive.len(), 0);
    }

    #[tokio::test]
    async fn test_gif_three_frames_at_three_fps() {
        let fx = fixture();
        save_seconds(&fx.store, &[1, 2, 3], 12, 10).await;

        let artifact = fx.assembler.build_gif(FrameRate::clamp(3)).await.unwrap();
        assert_eq!(artifact.frame_count, 3);
        assert_eq!(artifact.content_type(), "image/gif");

        let decoder = GifDecoder::new(Cursor::new(artifact.bytes)).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();
        assert_eq!(frames.len(), 3);

        for frame in &frames {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let millis = numer as f64 / denom as f64;
            // GIF delays are stored in hundredths of a second
            assert!((millis - 1000.0 / 3.0).abs() <= 10.0, "delay was {}ms", millis);
            assert_eq!(frame.buffer().dimensions(), (12, 10));
        }
    }

    #[tokio::test]
    async fn test_gif_frames_follow_capture_order() {
        let fx = fixture();
        // Saved out of order; frame colour encodes the capture second
        save_seconds(&fx.store, &[3, 1, 2], 4, 4).await;

        let artifact = fx.assembler.build_gif(FrameRate::clamp(10)).await.unwrap();
        let decoder = GifDecoder::new(Cursor::new(artifact.bytes)).unwrap();
        let frames = decoder.into_frames().collect_frames().unwrap();

        let reds: Vec<u8> = frames.iter().map(|f| f.buffer().get_pixel(1, 1)[0]).collect();
        assert!(reds[0] < reds[1] && reds[1] < reds[2], "reds out of order: {:?}", reds);
    }

    #[tokio::test]
    async fn test_gif_empty_archive() {
        let fx = fixture();
        let err = assert_err!(fx.assembler.build_gif(FrameRate::default()).await);
        assert!(matches!(err, ExportError::EmptyArchive));
        assert!(!fx.assembler.export_dir().join("animated.gif").exists());
    }

    #[tokio::test]
    async fn test_video_empty_archive() {
        let fx = fixture();
        let err = assert_err!(fx.assembler.build_video(FrameRate::default()).await);
        assert!(matches!(err, ExportError::EmptyArchive));
        assert!(fx.video.snapshot().opened.is_none());
    }

    #[tokio::test]
    async fn test_video_writes_every_frame_in_order() {
        let fx = fixture();
        save_seconds(&fx.store, &[1, 2, 3, 4], 20, 10).await;

        let artifact = fx.assembler.build_video(FrameRate::clamp(45)).await.unwrap();

        let recording = fx.video.snapshot();
        assert_eq!(recording.opened, Some((20, 10, 30)));
        assert_eq!(recording.frames, vec![20 * 10 * 3; 4]);
        assert!(recording.finished);
        assert_eq!(artifact.bytes, b"FFFF");
        assert_eq!(artifact.path, fx.assembler.export_dir().join("video.avi"));
        assert!(staged_files(fx.assembler.export_dir()).is_empty());
    }

    #[tokio::test]
    async fn test_video_dimension_mismatch() {
        let fx = fixture();
        save_seconds(&fx.store, &[1, 2], 20, 10).await;
        save_seconds(&fx.store, &[3], 24, 10).await;

        let err = assert_err!(fx.assembler.build_video(FrameRate::clamp(5)).await);

        match err {
            ExportError::DimensionMismatch {
                filename,
                expected_width,
                actual_width,
                ..
            } => {
                assert_eq!(filename, "20240101_000003.jpg");
                assert_eq!(expected_width, 20);
                assert_eq!(actual_width, 24);
            }
            other => panic!("Expected DimensionMismatch, got {:?}", other),
        }

        let recording = fx.video.snapshot();
        assert_eq!(recording.frames.len(), 2);
        assert!(recording.aborted);
        assert!(!recording.finished);
        assert!(!fx.assembler.export_dir().join("video.avi").exists());
        assert!(staged_files(fx.assembler.export_dir()).is_empty());
    }

    #[tokio::test]
    async fn test_failed_export_keeps_previous_artifact() {
        let fx = fixture();
        save_seconds(&fx.store, &[1, 2], 8, 8).await;
        let first = fx.assembler.build_gif(FrameRate::clamp(2)).await.unwrap();

        save_seconds(&fx.store, &[3], 16, 16).await;
        let err = assert_err!(fx.assembler.build_gif(FrameRate::clamp(2)).await);
        assert!(matches!(err, ExportError::DimensionMismatch { .. }));

        assert_eq!(std::fs::read(&first.path).unwrap(), first.bytes);
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_decode_error() {
        let fx = fixture();
        save_seconds(&fx.store, &[1], 8, 8).await;
        std::fs::write(fx.store.root().join("20240101_000002.jpg"), b"not a jpeg").unwrap();

        let err = assert_err!(fx.assembler.build_gif(FrameRate::default()).await);
        assert!(matches!(
            err,
            ExportError::Decode { ref filename, .. } if filename == "20240101_000002.jpg"
        ));
    }

    #[tokio::test]
    async fn test_export_dispatch_overwrites_artifact() {
        let fx = fixture();
        save_seconds(&fx.store, &[1], 8, 8).await;

        let request = ExportRequest::new(ExportFormat::Zip, FrameRate::default());
        let first = fx.assembler.export(request).await.unwrap();

        save_seconds(&fx.store, &[2], 8, 8).await;
        let second = fx.assembler.export(request).await.unwrap();

        assert_eq!(first.path, second.path);
        assert_eq!(second.frame_count, 2);
        assert_eq!(std::fs::read(&second.path).unwrap(), second.bytes);
        assert!(staged_files(fx.assembler.export_dir()).is_empty());
    }
}
