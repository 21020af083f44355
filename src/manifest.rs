use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::schedule::CaptureSchedule;

/// Job metadata stored as `manifest.json` and shipped at the archive root.
///
/// Field names on the wire are the ones the ingestion core reads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(rename = "car_code")]
    pub identifier: String,
    #[serde(rename = "frames")]
    pub frame_count: u32,
    #[serde(rename = "ext")]
    pub image_format: String,
    pub width: u32,
    pub height: u32,
    pub shot: ShotInfo,
    pub meta: ManifestMeta,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ShotInfo {
    pub rpm: f64,
    #[serde(rename = "duration_sec")]
    pub revolution_secs: f64,
    pub interval_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ManifestMeta {
    /// RFC 3339, UTC, millisecond precision.
    pub taken_at: String,
}

impl Manifest {
    pub fn build(
        identifier: &str,
        frame_count: u32,
        image_format: &str,
        (width, height): (u32, u32),
        schedule: &CaptureSchedule,
        taken_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            frame_count,
            image_format: image_format.to_string(),
            width,
            height,
            shot: ShotInfo {
                rpm: schedule.rpm,
                revolution_secs: schedule.revolution_secs,
                interval_ms: schedule.frame_interval_ms,
            },
            meta: ManifestMeta {
                taken_at: taken_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            },
        }
    }

    /// Writes the manifest, replacing any previous one for the job.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| {
            PipelineError::storage(
                "serialize manifest",
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        std::fs::write(path, json)
            .map_err(|e| PipelineError::storage(format!("write {}", path.display()), e))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| PipelineError::storage(format!("read {}", path.display()), e))?;
        serde_json::from_slice(&raw).map_err(|e| {
            PipelineError::InvalidJobState(format!("invalid manifest {}: {}", path.display(), e))
        })
    }
}
