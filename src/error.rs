//! Typed failures surfaced by every pipeline stage.
//!
//! Each variant maps to a stable code string (for logs and the command
//! surface) and an HTTP status. Binaries fold these into `anyhow::Error`;
//! callers that need the kind can `downcast_ref::<PipelineError>()`.

use std::fmt;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Longest response body prefix retained for a rejected upload.
pub const MAX_REJECTION_BODY_CHARS: usize = 500;

#[derive(Debug)]
pub enum PipelineError {
    /// Bad rpm, frame count or identifier. Caller error, never retried.
    InvalidInput(String),
    /// No capture binary on PATH and simulation is disabled.
    BackendUnavailable { candidates: Vec<String> },
    /// The capture binary could not be started at all.
    SpawnFailed {
        program: String,
        source: std::io::Error,
    },
    /// The capture binary ran and exited unsuccessfully.
    CaptureProcessFailed {
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The watchdog fired and the process group was killed.
    CaptureTimedOut { timeout_ms: u64 },
    /// Packaging or upload attempted without the artifacts of a capture.
    InvalidJobState(String),
    ArchiveFailed(String),
    TransportError(String),
    RemoteRejected { status: u16, body: String },
    ResponseParseError(String),
    /// Filesystem failure while preparing or pruning a job directory.
    Storage {
        context: String,
        source: std::io::Error,
    },
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::InvalidInput(_) => "INVALID_INPUT",
            PipelineError::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            PipelineError::SpawnFailed { .. } => "CAPTURE_SPAWN_FAILED",
            PipelineError::CaptureProcessFailed { .. } => "CAPTURE_PROCESS_FAILED",
            PipelineError::CaptureTimedOut { .. } => "CAPTURE_TIMED_OUT",
            PipelineError::InvalidJobState(_) => "INVALID_JOB_STATE",
            PipelineError::ArchiveFailed(_) => "ARCHIVE_FAILED",
            PipelineError::TransportError(_) => "TRANSPORT_ERROR",
            PipelineError::RemoteRejected { .. } => "REMOTE_REJECTED",
            PipelineError::ResponseParseError(_) => "RESPONSE_PARSE_ERROR",
            PipelineError::Storage { .. } => "STORAGE_ERROR",
        }
    }

    /// Status the command surface answers with for this kind.
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::InvalidJobState(_) => 400,
            PipelineError::CaptureTimedOut { .. } => 504,
            PipelineError::TransportError(_)
            | PipelineError::RemoteRejected { .. }
            | PipelineError::ResponseParseError(_) => 502,
            _ => 500,
        }
    }

    pub(crate) fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Storage {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn rejected(status: u16, body: &str) -> Self {
        PipelineError::RemoteRejected {
            status,
            body: body.chars().take(MAX_REJECTION_BODY_CHARS).collect(),
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InvalidInput(msg) => write!(f, "{}: {}", self.code(), msg),
            PipelineError::BackendUnavailable { candidates } => write!(
                f,
                "{}: no still-capture binary found (tried {}); enable simulation to run without a camera",
                self.code(),
                candidates.join(", ")
            ),
            PipelineError::SpawnFailed { program, source } => {
                write!(f, "{}: failed to start {}: {}", self.code(), program, source)
            }
            PipelineError::CaptureProcessFailed { code, signal } => match (code, signal) {
                (Some(code), _) => write!(f, "{}: capture exited with code {}", self.code(), code),
                (None, Some(signal)) => {
                    write!(f, "{}: capture killed by signal {}", self.code(), signal)
                }
                (None, None) => write!(f, "{}: capture exited abnormally", self.code()),
            },
            PipelineError::CaptureTimedOut { timeout_ms } => write!(
                f,
                "{}: capture did not finish within {} ms and was killed",
                self.code(),
                timeout_ms
            ),
            PipelineError::InvalidJobState(msg)
            | PipelineError::ArchiveFailed(msg)
            | PipelineError::TransportError(msg)
            | PipelineError::ResponseParseError(msg) => write!(f, "{}: {}", self.code(), msg),
            PipelineError::RemoteRejected { status, body } => write!(
                f,
                "{}: remote answered {} ({})",
                self.code(),
                status,
                body
            ),
            PipelineError::Storage { context, source } => {
                write!(f, "{}: {}: {}", self.code(), context, source)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::SpawnFailed { source, .. } | PipelineError::Storage { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}
