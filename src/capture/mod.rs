//! Capture session control.
//!
//! This module drives one turntable capture from request to manifest:
//! - probing for a still-capture binary (or falling back to simulation)
//! - running the binary under a watchdog in its own process group
//! - normalizing the frames it wrote and recording the manifest
//!
//! The device is commanded by wall-clock timing only; there is no hardware
//! trigger. Frame counts are reconciled after the fact by `normalize`.

pub mod backend;
pub mod process;
pub mod session;

pub use backend::{BackendProbe, CaptureBackend, StillBinary, DEFAULT_STILL_BINARIES};
pub use process::{ExitOutcome, ScopedChild};
pub use session::{CaptureController, CaptureOutcome, CaptureRequest, SessionState};

/// Device and timing settings shared by every capture.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    /// Frame file extension written by the device ("jpg").
    pub ext: String,
    /// Binary names probed in order; first one found wins.
    pub backends: Vec<String>,
    /// Added to the nominal capture duration for the device timeout.
    pub slack_ms: u64,
    /// Extra time past the device timeout before the watchdog kills it.
    pub kill_grace_ms: u64,
    /// Synthesize frames when no binary is available.
    pub simulate: bool,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            ext: "jpg".to_string(),
            backends: DEFAULT_STILL_BINARIES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            slack_ms: 2_000,
            kill_grace_ms: 3_000,
            simulate: false,
        }
    }
}
