use crate::capture::{CaptureController, CaptureOutcome, CaptureRequest};
use crate::error::{PipelineError, Result};
use crate::job::{acquire, JobDir, JobLocks, JobStore};
use crate::package::{package_job, PackagedJob};
use crate::upload::{UploadReceipt, Uploader};

/// Capture, package and upload for jobs under one root.
///
/// Steps for the same identifier are serialized by an in-process lock;
/// different identifiers run independently.
pub struct EdgePipeline {
    store: JobStore,
    capture: CaptureController,
    uploader: Option<Uploader>,
    locks: JobLocks,
}

impl EdgePipeline {
    pub fn new(store: JobStore, capture: CaptureController, uploader: Option<Uploader>) -> Self {
        Self {
            store,
            capture,
            uploader,
            locks: JobLocks::new(),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn capture_controller(&self) -> &CaptureController {
        &self.capture
    }

    pub fn capture(&self, request: &CaptureRequest) -> Result<CaptureOutcome> {
        let job = self.store.job(&request.identifier)?;
        self.locked(&job, || self.capture.run(&job, request))
    }

    /// Packages the job without uploading it.
    pub fn package(&self, identifier: &str) -> Result<PackagedJob> {
        let job = self.store.job(identifier)?;
        self.locked(&job, || package_job(&job))
    }

    /// Packages then uploads; nothing goes on the wire unless packaging succeeded.
    pub fn upload(&self, identifier: &str) -> Result<UploadReceipt> {
        let job = self.store.job(identifier)?;
        let uploader = self.uploader.as_ref().ok_or_else(|| {
            PipelineError::InvalidInput(
                "upload is not configured (CORE_URL / UPLOAD_TOKEN)".to_string(),
            )
        })?;
        self.locked(&job, || {
            let packaged = package_job(&job)?;
            uploader.upload(&packaged.archive)
        })
    }

    /// Runs `step` holding the job lock, then prunes the lock if idle.
    fn locked<T>(&self, job: &JobDir, step: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.locks.lock_for(job.identifier());
        let result = {
            let _guard = acquire(&lock);
            step()
        };
        drop(lock);
        self.locks.prune(job.identifier());
        result
    }

    /// Identifiers with a capture, package or upload step in flight.
    pub fn active_jobs(&self) -> usize {
        self.locks.len()
    }

    /// Frame files currently on disk for `identifier`.
    pub fn progress(&self, identifier: &str) -> Result<usize> {
        let job = self.store.job(identifier)?;
        job.progress(&self.capture.settings().ext)
    }
}
