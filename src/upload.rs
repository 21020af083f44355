//! Archive upload to the ingestion core.
//!
//! One POST per call, body streamed from disk with an explicit length. No
//! retries here; re-sending is up to the caller.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde_json::Value;

use crate::error::{PipelineError, Result, MAX_REJECTION_BODY_CHARS};

pub const INGEST_PATH: &str = "/ingest/upload";
const MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct UploadSettings {
    /// Base URL of the ingestion core, e.g. `https://core.example`.
    pub core_url: String,
    pub token: String,
    pub timeout: Duration,
}

impl UploadSettings {
    pub fn endpoint(&self) -> String {
        format!("{}{}", self.core_url.trim_end_matches('/'), INGEST_PATH)
    }
}

/// Parsed success response from the ingestion core.
#[derive(Clone, Debug, PartialEq)]
pub struct UploadReceipt {
    pub success: bool,
    pub remote_job_id: Option<String>,
    pub viewer_urls: Vec<String>,
    /// Full JSON body as returned.
    pub body: Value,
}

impl UploadReceipt {
    /// Extracts the known fields; anything else stays available in `body`.
    pub fn from_body(body: Value) -> Self {
        let success = ["ok", "success"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_bool))
            .unwrap_or(false);
        let remote_job_id = ["job_id", "jobId", "id"]
            .iter()
            .find_map(|key| match body.get(*key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            });
        let mut viewer_urls = Vec::new();
        for key in ["viewer_url", "viewerUrl", "url"] {
            if let Some(url) = body.get(key).and_then(Value::as_str) {
                push_unique(&mut viewer_urls, url);
            }
        }
        for key in ["viewer_urls", "viewerUrls", "urls"] {
            if let Some(list) = body.get(key).and_then(Value::as_array) {
                for url in list.iter().filter_map(Value::as_str) {
                    push_unique(&mut viewer_urls, url);
                }
            }
        }
        Self {
            success,
            remote_job_id,
            viewer_urls,
            body,
        }
    }
}

fn push_unique(urls: &mut Vec<String>, url: &str) {
    if !urls.iter().any(|u| u == url) {
        urls.push(url.to_string());
    }
}

pub struct Uploader {
    settings: UploadSettings,
    agent: ureq::Agent,
}

impl Uploader {
    pub fn new(settings: UploadSettings) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(settings.timeout).build();
        Self { settings, agent }
    }

    pub fn endpoint(&self) -> String {
        self.settings.endpoint()
    }

    /// Streams `archive` to the ingestion endpoint.
    pub fn upload(&self, archive: &Path) -> Result<UploadReceipt> {
        let file = File::open(archive).map_err(|e| {
            PipelineError::InvalidJobState(format!(
                "archive {} unavailable: {}",
                archive.display(),
                e
            ))
        })?;
        let len = file
            .metadata()
            .map_err(|e| {
                PipelineError::InvalidJobState(format!("stat {}: {}", archive.display(), e))
            })?
            .len();

        let url = self.endpoint();
        log::info!("uploading {} ({} bytes) to {}", archive.display(), len, url);
        let response = self
            .agent
            .post(&url)
            .set("Authorization", &format!("Bearer {}", self.settings.token))
            .set("Content-Type", "application/zip")
            .set("Accept", "application/json")
            .set("Content-Length", &len.to_string())
            .send(file);

        match response {
            Ok(response) => {
                let status = response.status();
                let text = read_capped(response)?;
                parse_success(status, &text)
            }
            Err(ureq::Error::Status(status, response)) => {
                let text = match read_capped(response) {
                    Ok(text) => text,
                    Err(err) => {
                        log::debug!("rejection body from {} unreadable: {}", url, err);
                        String::new()
                    }
                };
                log::warn!("upload rejected by {}: status {}", url, status);
                Err(PipelineError::rejected(status, &text))
            }
            Err(ureq::Error::Transport(transport)) => {
                log::warn!("upload to {} failed: {}", url, transport);
                Err(PipelineError::TransportError(transport.to_string()))
            }
        }
    }
}

fn read_capped(response: ureq::Response) -> Result<String> {
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(MAX_RESPONSE_BYTES)
        .read_to_end(&mut bytes)
        .map_err(|e| PipelineError::TransportError(format!("read response body: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn parse_success(status: u16, text: &str) -> Result<UploadReceipt> {
    let text = if text.trim().is_empty() { "{}" } else { text };
    let body: Value = serde_json::from_str(text).map_err(|e| {
        let prefix: String = text.chars().take(MAX_REJECTION_BODY_CHARS).collect();
        PipelineError::ResponseParseError(format!(
            "status {} body is not JSON ({}): {}",
            status, e, prefix
        ))
    })?;
    let receipt = UploadReceipt::from_body(body);
    log::info!(
        "upload accepted: success={} job_id={:?} viewers={}",
        receipt.success,
        receipt.remote_job_id,
        receipt.viewer_urls.len()
    );
    Ok(receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_joins_base_url() {
        let settings = UploadSettings {
            core_url: "https://core.example/".to_string(),
            token: "t".to_string(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(settings.endpoint(), "https://core.example/ingest/upload");
    }

    #[test]
    fn receipt_reads_common_field_spellings() {
        let receipt = UploadReceipt::from_body(json!({
            "ok": true,
            "job_id": 42,
            "viewer_url": "https://v.example/42",
            "viewer_urls": ["https://v.example/42", "https://v.example/42/embed"]
        }));
        assert!(receipt.success);
        assert_eq!(receipt.remote_job_id.as_deref(), Some("42"));
        assert_eq!(
            receipt.viewer_urls,
            vec!["https://v.example/42", "https://v.example/42/embed"]
        );
    }

    #[test]
    fn empty_success_body_is_an_empty_object() {
        let receipt = parse_success(200, "").expect("parse");
        assert!(!receipt.success);
        assert_eq!(receipt.body, json!({}));
    }

    #[test]
    fn non_json_success_body_is_a_parse_error() {
        let err = parse_success(200, "<html>ok</html>").unwrap_err();
        assert!(matches!(err, PipelineError::ResponseParseError(_)));
    }
}
