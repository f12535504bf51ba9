use crate::acceptance_filter::{CaptureDecision, InvalidTime, TimeWindow};
use crate::archive_store::{ArchiveError, ArchiveStore, ArchivedFrame, ClearReport};
use crate::export_assembler::{ExportArtifact, ExportAssembler, ExportError, ExportRequest};
use crate::frame_fetcher::{snapshot_url, FetchError, SnapshotSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};

/// Errors raised by the capture path
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    InvalidTime(#[from] InvalidTime),

    #[error(transparent)]
    Archive(#[from] ArchiveError),
}

/// Result of one capture
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    /// The captured frame as JPEG, whether or not it was archived
    pub image_jpeg: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    pub decision: CaptureDecision,
    /// Set when the frame was written to the archive
    pub archived: Option<ArchivedFrame>,
}

impl CaptureOutcome {
    pub fn saved(&self) -> bool {
        self.archived.is_some()
    }
}

/// Request/response surface over the fetch, filter, archive and export components
pub struct CaptureService {
    source: Arc<dyn SnapshotSource>,
    store: Arc<ArchiveStore>,
    assembler: ExportAssembler,
    snapshot_path: String,
}

impl CaptureService {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        store: Arc<ArchiveStore>,
        assembler: ExportAssembler,
        snapshot_path: impl Into<String>,
    ) -> Self {
        Self {
            source,
            store,
            assembler,
            snapshot_path: snapshot_path.into(),
        }
    }

    /// Fetch one frame from `address` and archive it if the window allows
    #[instrument(skip(self))]
    pub async fn capture(
        &self,
        address: &str,
        window: Option<TimeWindow>,
    ) -> Result<CaptureOutcome, CaptureError> {
        let url = snapshot_url(address, &self.snapshot_path);

        let frame = match self.source.fetch(&url).await {
            Ok(frame) => frame,
            Err(e) => {
                metrics::counter!("snapvault_fetch_errors_total", "kind" => e.kind()).increment(1);
                return Err(e.into());
            }
        };

        let captured_at = frame.captured_at();
        let image_jpeg = self.store.encode_jpeg(frame.image()).await?;

        let decision = window
            .as_ref()
            .map_or(CaptureDecision::Accept, |w| w.evaluate(captured_at));

        let archived = match &decision {
            CaptureDecision::Accept => Some(self.store.save_jpeg(captured_at, &image_jpeg).await?),
            CaptureDecision::Reject { reason } => {
                debug!(reason = %reason, "Frame outside capture window, not saved");
                None
            }
        };

        let outcome = if archived.is_some() { "saved" } else { "skipped" };
        metrics::counter!("snapvault_captures_total", "outcome" => outcome).increment(1);
        info!(
            url = %url,
            captured_at = %captured_at,
            size_bytes = image_jpeg.len(),
            outcome,
            "Capture complete"
        );

        Ok(CaptureOutcome {
            image_jpeg,
            captured_at,
            decision,
            archived,
        })
    }

    /// Capture with the window given as raw request parameters
    pub async fn capture_with_bounds(
        &self,
        address: &str,
        start_time: Option<&str>,
        end_time: Option<&str>,
    ) -> Result<CaptureOutcome, CaptureError> {
        let window = TimeWindow::parse(start_time, end_time)?;
        self.capture(address, window).await
    }

    pub async fn list(&self) -> Result<Vec<String>, ArchiveError> {
        self.store.list().await
    }

    pub async fn export(&self, request: ExportRequest) -> Result<ExportArtifact, ExportError> {
        self.assembler.export(request).await
    }

    pub async fn clear(&self) -> Result<ClearReport, ArchiveError> {
        self.store.clear().await
    }

    pub async fn read(&self, filename: &str) -> Result<Vec<u8>, ArchiveError> {
        self.store.read(filename).await
    }
}
