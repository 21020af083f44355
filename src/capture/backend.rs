use std::path::{Path, PathBuf};

use crate::schedule::CaptureSchedule;

use super::CaptureSettings;

/// Still-capture binaries understood by the controller, in preference order.
pub const DEFAULT_STILL_BINARIES: &[&str] = &["rpicam-still", "libcamera-still"];

/// A still-capture executable resolved on PATH.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StillBinary {
    pub name: String,
    pub path: PathBuf,
}

impl StillBinary {
    /// Arguments for a timelapse run writing `frame_%03d.{ext}` into `seq_dir`.
    pub fn args(
        &self,
        settings: &CaptureSettings,
        schedule: &CaptureSchedule,
        seq_dir: &Path,
    ) -> Vec<String> {
        let pattern = seq_dir.join(format!("frame_%03d.{}", settings.ext));
        vec![
            "--width".to_string(),
            settings.width.to_string(),
            "--height".to_string(),
            settings.height.to_string(),
            "--timeout".to_string(),
            schedule.process_timeout_ms.to_string(),
            "--timelapse".to_string(),
            schedule.frame_interval_ms.to_string(),
            "-o".to_string(),
            pattern.to_string_lossy().to_string(),
            "-n".to_string(),
        ]
    }
}

/// How a session gets its frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureBackend {
    Still(StillBinary),
    Simulated,
}

/// Ordered capability probe over executable names.
#[derive(Clone, Debug)]
pub struct BackendProbe {
    candidates: Vec<String>,
}

impl BackendProbe {
    pub fn new(candidates: Vec<String>) -> Self {
        Self { candidates }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// First candidate found on PATH (or given as a path that exists).
    pub fn find(&self) -> Option<StillBinary> {
        self.candidates.iter().find_map(|name| match which::which(name) {
            Ok(path) => Some(StillBinary {
                name: name.clone(),
                path,
            }),
            Err(_) => {
                log::debug!("capture backend {} not found", name);
                None
            }
        })
    }
}
