use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::job::{frame_file_name, JobDir};
use crate::manifest::Manifest;
use crate::normalize::normalize_frames;
use crate::schedule::CaptureSchedule;

use super::backend::{BackendProbe, CaptureBackend, StillBinary};
use super::process::{describe_exit, ExitOutcome, ScopedChild};
use super::CaptureSettings;

/// Minimal JPEG (SOI + EOI) written for simulated frames.
const PLACEHOLDER_JPEG: [u8; 4] = [0xff, 0xd8, 0xff, 0xd9];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CaptureRequest {
    #[serde(rename = "car_code")]
    pub identifier: String,
    pub rpm: f64,
    pub frames: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl SessionState {
    fn can_enter(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Completed)
                | (Starting, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::TimedOut
        )
    }
}

/// Result of a completed capture.
#[derive(Clone, Debug)]
pub struct CaptureOutcome {
    pub identifier: String,
    /// Frames on disk after normalization. May be below the request.
    pub frames: u32,
    pub manifest: Manifest,
    pub schedule: CaptureSchedule,
    pub backend: CaptureBackend,
    /// Fewer frames than requested were available.
    pub partial: bool,
    pub note: Option<String>,
}

/// Runs capture sessions with a fixed set of device settings.
#[derive(Clone, Debug)]
pub struct CaptureController {
    settings: CaptureSettings,
    probe: BackendProbe,
}

impl CaptureController {
    pub fn new(settings: CaptureSettings) -> Self {
        let probe = BackendProbe::new(settings.backends.clone());
        Self { settings, probe }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Runs one capture for `job`. The caller must hold the job lock.
    pub fn run(&self, job: &JobDir, request: &CaptureRequest) -> Result<CaptureOutcome> {
        let schedule =
            CaptureSchedule::compute(request.rpm, request.frames, self.settings.slack_ms)?;
        let mut session = Session::new(job.identifier());
        let result = self.drive(&mut session, job, &schedule);
        if let Err(err) = &result {
            let failed = match err {
                PipelineError::CaptureTimedOut { .. } => SessionState::TimedOut,
                _ => SessionState::Failed,
            };
            if !session.state.is_terminal() {
                session.enter(failed);
            }
            log::error!("capture {} failed: {}", job.identifier(), err);
        }
        result
    }

    fn drive(
        &self,
        session: &mut Session,
        job: &JobDir,
        schedule: &CaptureSchedule,
    ) -> Result<CaptureOutcome> {
        session.enter(SessionState::Starting);
        job.prepare()?;
        log::info!(
            "capture {}: rpm={} frames={} interval={}ms timeout={}ms",
            job.identifier(),
            schedule.rpm,
            schedule.target_frames,
            schedule.frame_interval_ms,
            schedule.process_timeout_ms
        );
        if schedule.is_floored() {
            log::warn!(
                "capture {}: interval floored to {} ms; expect ~{} of {} frames",
                job.identifier(),
                schedule.frame_interval_ms,
                schedule.expected_frames(),
                schedule.target_frames
            );
        }

        let backend = match self.probe.find() {
            Some(binary) => CaptureBackend::Still(binary),
            None if self.settings.simulate => CaptureBackend::Simulated,
            None => {
                return Err(PipelineError::BackendUnavailable {
                    candidates: self.probe.candidates().to_vec(),
                })
            }
        };

        let stale = job.clear_frames(&self.settings.ext)?;
        if stale > 0 {
            log::info!(
                "capture {}: removed {} frames from a previous capture",
                job.identifier(),
                stale
            );
        }

        let note = match &backend {
            CaptureBackend::Simulated => {
                self.simulate_frames(job, schedule.target_frames)?;
                Some("MOCK frames generated".to_string())
            }
            CaptureBackend::Still(binary) => {
                session.enter(SessionState::Running);
                self.run_binary(job, binary, schedule)?;
                None
            }
        };

        let frames = job.list_frames(&self.settings.ext)?;
        let normalized = normalize_frames(&frames, schedule.target_frames)?;
        let count = normalized.kept.len() as u32;

        let manifest = Manifest::build(
            job.identifier(),
            count,
            &self.settings.ext,
            (self.settings.width, self.settings.height),
            schedule,
            Utc::now(),
        );
        manifest.write_to(&job.manifest_path())?;
        session.enter(SessionState::Completed);

        let partial = count < schedule.target_frames;
        if partial {
            log::warn!(
                "capture {}: partial result, {} of {} frames",
                job.identifier(),
                count,
                schedule.target_frames
            );
        }
        Ok(CaptureOutcome {
            identifier: job.identifier().to_string(),
            frames: count,
            manifest,
            schedule: *schedule,
            backend,
            partial,
            note,
        })
    }

    fn run_binary(
        &self,
        job: &JobDir,
        binary: &StillBinary,
        schedule: &CaptureSchedule,
    ) -> Result<()> {
        let args = binary.args(&self.settings, schedule, &job.seq_dir());
        log::info!("[capture] bin={} args={:?}", binary.name, args);

        let mut child = ScopedChild::spawn("capture", &binary.path, &args)?;
        let watchdog = Duration::from_millis(
            schedule
                .process_timeout_ms
                .saturating_add(self.settings.kill_grace_ms),
        );
        match child.wait_with_deadline(watchdog)? {
            ExitOutcome::Exited(status) if status.success() => Ok(()),
            ExitOutcome::Exited(status) => {
                let (code, signal) = describe_exit(&status);
                Err(PipelineError::CaptureProcessFailed { code, signal })
            }
            ExitOutcome::TimedOut => Err(PipelineError::CaptureTimedOut {
                timeout_ms: watchdog.as_millis() as u64,
            }),
        }
    }

    fn simulate_frames(&self, job: &JobDir, count: u32) -> Result<()> {
        let seq = job.seq_dir();
        for index in 1..=count {
            let path = seq.join(frame_file_name(index, &self.settings.ext));
            std::fs::write(&path, PLACEHOLDER_JPEG)
                .map_err(|e| PipelineError::storage(format!("write {}", path.display()), e))?;
        }
        log::info!("capture {}: wrote {} simulated frames", job.identifier(), count);
        Ok(())
    }
}

struct Session {
    identifier: String,
    state: SessionState,
}

impl Session {
    fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            state: SessionState::Idle,
        }
    }

    fn enter(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_enter(next),
            "illegal capture transition {:?} -> {:?}",
            self.state,
            next
        );
        log::debug!("capture {}: {:?} -> {:?}", self.identifier, self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStore;

    fn controller(simulate: bool) -> CaptureController {
        CaptureController::new(CaptureSettings {
            backends: vec!["edge-capture-no-such-camera".to_string()],
            simulate,
            ..CaptureSettings::default()
        })
    }

    fn request(frames: u32) -> CaptureRequest {
        CaptureRequest {
            identifier: "CAR-1".to_string(),
            rpm: 2.0,
            frames,
        }
    }

    #[test]
    fn transitions_follow_lifecycle() {
        use SessionState::*;
        assert!(Idle.can_enter(Starting));
        assert!(Starting.can_enter(Completed));
        assert!(Running.can_enter(TimedOut));
        assert!(!Idle.can_enter(Running));
        assert!(!Completed.can_enter(Running));
        assert!(!Starting.can_enter(TimedOut));
    }

    #[test]
    fn simulation_writes_requested_frames_and_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job = JobStore::new(dir.path()).job("CAR-1").expect("job");

        let outcome = controller(true).run(&job, &request(12)).expect("capture");

        assert_eq!(outcome.frames, 12);
        assert_eq!(outcome.backend, CaptureBackend::Simulated);
        assert!(!outcome.partial);
        assert!(outcome.note.is_some());
        assert_eq!(job.list_frames("jpg").expect("list").len(), 12);
        let manifest = Manifest::read_from(&job.manifest_path()).expect("manifest");
        assert_eq!(manifest.frame_count, 12);
        assert_eq!(manifest.shot.interval_ms, 2_500);
    }

    #[test]
    fn no_backend_without_simulation_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job = JobStore::new(dir.path()).job("CAR-1").expect("job");

        let err = controller(false).run(&job, &request(12)).unwrap_err();

        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
        assert!(!job.manifest_path().exists());
    }

    #[test]
    fn invalid_schedule_touches_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job = JobStore::new(dir.path()).job("CAR-1").expect("job");
        let mut bad = request(12);
        bad.rpm = 0.0;

        let err = controller(true).run(&job, &bad).unwrap_err();

        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(!job.path().exists());
    }
}
