use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::capture::{CaptureSettings, DEFAULT_STILL_BINARIES};
use crate::upload::UploadSettings;

const DEFAULT_API_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_EXT: &str = "jpg";
const DEFAULT_RPM: f64 = 2.0;
const DEFAULT_FRAMES: u32 = 36;
const DEFAULT_SLACK_MS: u64 = 2_000;
const DEFAULT_KILL_GRACE_MS: u64 = 3_000;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Deserialize, Default)]
struct EdgeConfigFile {
    jobs_root: Option<PathBuf>,
    mock: Option<bool>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    defaults: Option<DefaultsConfigFile>,
    timing: Option<TimingConfigFile>,
    upload: Option<UploadConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    ext: Option<String>,
    backends: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct DefaultsConfigFile {
    rpm: Option<f64>,
    frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TimingConfigFile {
    slack_ms: Option<u64>,
    kill_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct UploadConfigFile {
    core_url: Option<String>,
    token: Option<String>,
    timeout_secs: Option<u64>,
}

/// Explicit configuration for every component; nothing below reads the
/// environment on its own.
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    pub jobs_root: PathBuf,
    pub api_addr: String,
    pub capture: CaptureSettings,
    pub defaults: RequestDefaults,
    pub upload: UploadConfig,
}

/// Values used when a capture request omits rpm or frame count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestDefaults {
    pub rpm: f64,
    pub frames: u32,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub core_url: Option<String>,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl UploadConfig {
    /// Settings for the uploader, or an error naming what is missing.
    pub fn settings(&self) -> Result<UploadSettings> {
        let core_url = self
            .core_url
            .clone()
            .ok_or_else(|| anyhow!("CORE_URL is not configured"))?;
        let token = self
            .token
            .clone()
            .ok_or_else(|| anyhow!("UPLOAD_TOKEN is not configured"))?;
        Ok(UploadSettings {
            core_url,
            token,
            timeout: self.timeout,
        })
    }
}

impl EdgeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var_os("EDGE_CAPTURE_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as [`EdgeConfig::load`] with an explicit config file path.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EdgeConfigFile) -> Self {
        let jobs_root = file.jobs_root.unwrap_or_else(default_jobs_root);
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let camera = file.camera.unwrap_or_default();
        let timing = file.timing.unwrap_or_default();
        let capture = CaptureSettings {
            width: camera.width.unwrap_or(DEFAULT_WIDTH),
            height: camera.height.unwrap_or(DEFAULT_HEIGHT),
            ext: camera.ext.unwrap_or_else(|| DEFAULT_EXT.to_string()),
            backends: camera.backends.unwrap_or_else(|| {
                DEFAULT_STILL_BINARIES
                    .iter()
                    .map(|name| name.to_string())
                    .collect()
            }),
            slack_ms: timing.slack_ms.unwrap_or(DEFAULT_SLACK_MS),
            kill_grace_ms: timing.kill_grace_ms.unwrap_or(DEFAULT_KILL_GRACE_MS),
            simulate: file.mock.unwrap_or(false),
        };
        let defaults = file.defaults.unwrap_or_default();
        let defaults = RequestDefaults {
            rpm: defaults.rpm.unwrap_or(DEFAULT_RPM),
            frames: defaults.frames.unwrap_or(DEFAULT_FRAMES),
        };
        let upload = file.upload.unwrap_or_default();
        let upload = UploadConfig {
            core_url: upload.core_url,
            token: upload.token,
            timeout: Duration::from_secs(
                upload.timeout_secs.unwrap_or(DEFAULT_UPLOAD_TIMEOUT_SECS),
            ),
        };
        Self {
            jobs_root,
            api_addr,
            capture,
            defaults,
            upload,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(root) = non_empty_env("EDGE_CAPTURE_ROOT") {
            self.jobs_root = PathBuf::from(root);
        }
        if let Some(addr) = non_empty_env("EDGE_CAPTURE_ADDR") {
            self.api_addr = addr;
        }
        if let Some(width) = non_empty_env("WIDTH") {
            self.capture.width = parse_env("WIDTH", &width)?;
        }
        if let Some(height) = non_empty_env("HEIGHT") {
            self.capture.height = parse_env("HEIGHT", &height)?;
        }
        if let Some(backends) = non_empty_env("EDGE_CAPTURE_BACKENDS") {
            let parsed = split_csv(&backends);
            if !parsed.is_empty() {
                self.capture.backends = parsed;
            }
        }
        if let Some(slack) = non_empty_env("EDGE_CAPTURE_SLACK_MS") {
            self.capture.slack_ms = parse_env("EDGE_CAPTURE_SLACK_MS", &slack)?;
        }
        if let Some(grace) = non_empty_env("EDGE_CAPTURE_KILL_GRACE_MS") {
            self.capture.kill_grace_ms = parse_env("EDGE_CAPTURE_KILL_GRACE_MS", &grace)?;
        }
        if let Some(mock) = non_empty_env("MOCK") {
            self.capture.simulate = mock == "1" || mock.eq_ignore_ascii_case("true");
        }
        if let Some(rpm) = non_empty_env("DEFAULT_RPM") {
            self.defaults.rpm = parse_env("DEFAULT_RPM", &rpm)?;
        }
        if let Some(frames) = non_empty_env("DEFAULT_FRAMES") {
            self.defaults.frames = parse_env("DEFAULT_FRAMES", &frames)?;
        }
        if let Some(url) = non_empty_env("CORE_URL") {
            self.upload.core_url = Some(url);
        }
        if let Some(token) = non_empty_env("UPLOAD_TOKEN") {
            self.upload.token = Some(token);
        }
        if let Some(timeout) = non_empty_env("UPLOAD_TIMEOUT_SECS") {
            let seconds: u64 = parse_env("UPLOAD_TIMEOUT_SECS", &timeout)?;
            self.upload.timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.ext.trim().is_empty() || self.capture.ext.contains('/') {
            return Err(anyhow!("capture ext must be a plain file extension"));
        }
        self.capture.ext = self.capture.ext.trim_start_matches('.').to_lowercase();
        if self.capture.backends.is_empty() {
            return Err(anyhow!("at least one capture backend must be listed"));
        }
        if self.capture.slack_ms == 0 {
            return Err(anyhow!("timeout slack_ms must be greater than zero"));
        }
        if !self.defaults.rpm.is_finite() || self.defaults.rpm <= 0.0 {
            return Err(anyhow!("default rpm must be greater than zero"));
        }
        if self.defaults.frames == 0 {
            return Err(anyhow!("default frame count must be at least 1"));
        }
        if self.upload.timeout.as_secs() == 0 {
            return Err(anyhow!("upload timeout must be greater than zero"));
        }
        if let Some(core_url) = &self.upload.core_url {
            let parsed =
                Url::parse(core_url).map_err(|e| anyhow!("invalid CORE_URL {}: {}", core_url, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!(
                    "CORE_URL must be http(s), got scheme '{}'",
                    parsed.scheme()
                ));
            }
        }
        Ok(())
    }
}

/// `$HOME/edge-capture/jobs`, falling back to the working directory.
fn default_jobs_root() -> PathBuf {
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    home.join("edge-capture").join("jobs")
}

fn read_config_file(path: &Path) -> Result<EdgeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow!("{} has an invalid value '{}'", key, value))
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
