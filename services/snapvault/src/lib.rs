//! Snapvault
//!
//! Camera snapshot archiver. Each capture request pulls a single still image
//! from a network camera, returns it to the caller, and archives it on disk
//! under a timestamp-derived name when the capture instant falls inside the
//! requested time window. The archive can be listed, cleared, or exported as
//! a ZIP bundle, an animated GIF, or an AVI video.
//!
//! ## Features
//!
//! - **Window-Gated Archiving**: Optional inclusive start/end bounds decide
//!   whether a captured frame is kept
//! - **Chronological Archive**: Frames are named `YYYYMMDD_HHMMSS.jpg` so
//!   lexicographic order is capture order
//! - **Exports**: ZIP of the raw files, GIF and video at a frame rate clamped
//!   to 1-30 fps
//!
//! ## Architecture
//!
//! ```text
//!  Camera (HTTP)
//! ┌──────────────┐
//! │ /snapshot.jpg│
//! └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐    ┌──────────────┐
//! │ Frame        │───▶│ Acceptance   │
//! │ Fetcher      │    │ Filter       │
//! └──────────────┘    └──────────────┘
//!                            │ accept
//!                            ▼
//!                     ┌──────────────┐    ┌──────────────┐
//!                     │ Archive      │───▶│ Export       │──▶ zip / gif / avi
//!                     │ Store        │    │ Assembler    │
//!                     └──────────────┘    └──────────────┘
//!                            ▲                   ▲
//!                            └─────────┬─────────┘
//!                               ┌──────────────┐
//!                               │ Capture      │
//!                               │ Service/API  │
//!                               └──────────────┘
//! ```

pub mod acceptance_filter;
pub mod api;
pub mod archive_store;
pub mod capture_service;
pub mod config;
pub mod export_assembler;
pub mod frame_fetcher;
pub mod video_encoder;

pub use acceptance_filter::{accepts, CaptureDecision, TimeWindow};
pub use api::{create_router, start_api_server, AppState};
pub use archive_store::{ArchiveError, ArchiveStore, ArchivedFrame, ClearReport};
pub use capture_service::{CaptureError, CaptureOutcome, CaptureService};
pub use config::Config;
pub use export_assembler::{
    ExportArtifact, ExportAssembler, ExportError, ExportFormat, ExportRequest, FrameRate,
};
pub use frame_fetcher::{Frame, HttpFrameFetcher, SnapshotSource};
pub use video_encoder::{FfmpegEncoder, VideoEncoder, VideoWriter};
