use crate::error::{PipelineError, Result};

/// Hard floor on the device timelapse interval.
pub const MIN_FRAME_INTERVAL_MS: u64 = 200;

/// Timing for one capture run, derived from turntable speed and frame count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureSchedule {
    pub rpm: f64,
    pub target_frames: u32,
    /// One full revolution in seconds (60 / rpm).
    pub revolution_secs: f64,
    pub frame_interval_ms: u64,
    /// Value handed to the device as its own run time.
    pub process_timeout_ms: u64,
}

impl CaptureSchedule {
    /// Computes the schedule. `slack_ms` (> 0) is added on top of the nominal
    /// capture duration to absorb device startup and shutdown.
    ///
    /// The interval never drops below [`MIN_FRAME_INTERVAL_MS`]; when that
    /// floor applies the device yields fewer frames than requested and the
    /// normalizer keeps whatever is available.
    pub fn compute(rpm: f64, target_frames: u32, slack_ms: u64) -> Result<Self> {
        if !rpm.is_finite() || rpm <= 0.0 {
            return Err(PipelineError::InvalidInput(format!(
                "rpm must be a positive number, got {}",
                rpm
            )));
        }
        if target_frames == 0 {
            return Err(PipelineError::InvalidInput(
                "frame count must be at least 1".to_string(),
            ));
        }
        if slack_ms == 0 {
            return Err(PipelineError::InvalidInput(
                "timeout slack must be greater than zero".to_string(),
            ));
        }
        let revolution_secs = 60.0 / rpm;
        let naive_ms = (revolution_secs / target_frames as f64 * 1000.0).floor();
        // saturating float->int cast keeps absurdly slow turntables bounded
        let frame_interval_ms = (naive_ms as u64).max(MIN_FRAME_INTERVAL_MS);
        let process_timeout_ms = (target_frames as u64)
            .saturating_mul(frame_interval_ms)
            .saturating_add(slack_ms);
        Ok(Self {
            rpm,
            target_frames,
            revolution_secs,
            frame_interval_ms,
            process_timeout_ms,
        })
    }

    /// Frames the device can actually produce inside one revolution.
    pub fn expected_frames(&self) -> u32 {
        let window_ms = self.revolution_secs * 1000.0;
        let fit = (window_ms / self.frame_interval_ms as f64).floor() as u32;
        fit.clamp(1, self.target_frames)
    }

    /// True when the interval floor made the request unreachable.
    pub fn is_floored(&self) -> bool {
        self.expected_frames() < self.target_frames
    }
}
