//! Edge Capture
//!
//! Turntable capture pipeline for a single edge device: a rotating object is
//! photographed at fixed angular intervals, the frame set is trimmed to the
//! requested count, described by a manifest, packaged and forwarded to a
//! remote ingestion core.
//!
//! # Pipeline
//!
//! 1. **Schedule**: rpm + frame count become a timelapse interval (200 ms floor)
//!    and a device timeout.
//! 2. **Capture**: a still-capture binary runs under a watchdog; without one,
//!    simulation mode can synthesize frames.
//! 3. **Normalize**: uniform subsampling down to the requested count.
//! 4. **Manifest**: job metadata written next to the frames.
//! 5. **Package / Upload**: on request, a deterministic zip is streamed to the
//!    core with bearer authentication.
//!
//! # Module Structure
//!
//! - `schedule`, `normalize`, `manifest`: pure-ish building blocks
//! - `capture`: backend probe, scoped subprocess, session controller
//! - `package`, `upload`: archive and transfer
//! - `job`: directory layout, identifier validation, per-job locks
//! - `pipeline`: the composed entry point used by `api` and the binaries

pub mod api;
pub mod capture;
pub mod config;
pub mod error;
pub mod job;
pub mod manifest;
pub mod normalize;
pub mod package;
pub mod pipeline;
pub mod schedule;
pub mod upload;

pub use capture::{
    CaptureBackend, CaptureController, CaptureOutcome, CaptureRequest, CaptureSettings,
    SessionState,
};
pub use config::EdgeConfig;
pub use error::{PipelineError, Result};
pub use job::{validate_identifier, JobDir, JobLocks, JobStore};
pub use manifest::Manifest;
pub use normalize::{normalize_frames, select_indices, NormalizeOutcome};
pub use package::{package_job, PackagedJob};
pub use pipeline::EdgePipeline;
pub use schedule::{CaptureSchedule, MIN_FRAME_INTERVAL_MS};
pub use upload::{UploadReceipt, UploadSettings, Uploader};

/// Builds the pipeline described by `cfg`. Upload stays disabled until both
/// core URL and token are configured.
pub fn pipeline_from_config(cfg: &EdgeConfig) -> EdgePipeline {
    let uploader = match cfg.upload.settings() {
        Ok(settings) => Some(Uploader::new(settings)),
        Err(err) => {
            log::warn!("upload disabled: {}", err);
            None
        }
    };
    EdgePipeline::new(
        JobStore::new(cfg.jobs_root.clone()),
        CaptureController::new(cfg.capture.clone()),
        uploader,
    )
}
