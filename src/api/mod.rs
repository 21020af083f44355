//! Thin HTTP command surface over the pipeline.
//!
//! Routes:
//! - `GET /healthz`
//! - `POST /capture/start` `{car_code, rpm?, frames?}`
//! - `POST /capture/upload` `{car_code}`
//! - `GET /capture/progress?car_code=...`
//!
//! Each connection is served on its own thread so captures of different jobs
//! can overlap; the pipeline serializes work on the same job.

use crate::capture::CaptureRequest;
use crate::config::RequestDefaults;
use crate::error::PipelineError;
use crate::pipeline::EdgePipeline;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub defaults: RequestDefaults,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            defaults: RequestDefaults {
                rpm: 2.0,
                frames: 36,
            },
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    pipeline: Arc<EdgePipeline>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, pipeline: Arc<EdgePipeline>) -> Self {
        Self { cfg, pipeline }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg.clone();
        let pipeline = self.pipeline.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, cfg, pipeline, shutdown_thread) {
                log::error!("capture api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    pipeline: Arc<EdgePipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let cfg = cfg.clone();
                let pipeline = pipeline.clone();
                std::thread::spawn(move || {
                    if let Err(err) = handle_connection(stream, &cfg, &pipeline) {
                        log::warn!("capture api request rejected: {}", err);
                    }
                });
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct StartBody {
    car_code: Option<String>,
    rpm: Option<f64>,
    frames: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct UploadBody {
    car_code: Option<String>,
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    pipeline: &EdgePipeline,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = read_request(&mut stream)?;
    log::info!("{} {}", request.method, request.raw_path);

    let (status, body) = route(&request, cfg, pipeline);
    let payload = serde_json::to_vec(&body)?;
    write_response(&mut stream, status, "application/json", &payload)
}

fn route(request: &HttpRequest, cfg: &ApiConfig, pipeline: &EdgePipeline) -> (u16, Value) {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/healthz") => (
            200,
            json!({ "ok": true, "now": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true) }),
        ),
        ("POST", "/capture/start") => match parse_body::<StartBody>(request) {
            Ok(StartBody {
                car_code: Some(car_code),
                rpm,
                frames,
            }) => {
                let capture = CaptureRequest {
                    identifier: car_code,
                    rpm: rpm.unwrap_or(cfg.defaults.rpm),
                    frames: frames.unwrap_or(cfg.defaults.frames),
                };
                match pipeline.capture(&capture) {
                    Ok(outcome) => {
                        let mut body = json!({
                            "ok": true,
                            "car_code": outcome.identifier,
                            "frames": outcome.frames,
                            "partial": outcome.partial,
                            "manifest": outcome.manifest,
                        });
                        if let Some(note) = outcome.note {
                            body["note"] = Value::String(note);
                        }
                        (200, body)
                    }
                    Err(err) => error_response(&err),
                }
            }
            Ok(_) => missing_car_code(),
            Err(err) => bad_request(&err),
        },
        ("POST", "/capture/upload") => match parse_body::<UploadBody>(request) {
            Ok(UploadBody {
                car_code: Some(car_code),
            }) => match pipeline.upload(&car_code) {
                Ok(receipt) => (200, receipt.body),
                Err(err) => error_response(&err),
            },
            Ok(_) => missing_car_code(),
            Err(err) => bad_request(&err),
        },
        ("GET", "/capture/progress") => match request.query.get("car_code") {
            Some(car_code) => match pipeline.progress(car_code) {
                Ok(frames) => (200, json!({ "ok": true, "frames": frames })),
                Err(err) => error_response(&err),
            },
            None => missing_car_code(),
        },
        (_, "/healthz") | (_, "/capture/start") | (_, "/capture/upload")
        | (_, "/capture/progress") => (405, json!({ "error": "method_not_allowed" })),
        _ => (404, json!({ "error": "not_found" })),
    }
}

fn error_response(err: &PipelineError) -> (u16, Value) {
    let mut body = json!({ "error": err.code(), "detail": err.to_string() });
    match err {
        PipelineError::RemoteRejected { status, body: remote } => {
            body["status"] = json!(status);
            body["body"] = Value::String(remote.clone());
        }
        PipelineError::CaptureProcessFailed { code, .. } => {
            body["code"] = json!(code);
        }
        _ => {}
    }
    (err.http_status(), body)
}

fn missing_car_code() -> (u16, Value) {
    (400, json!({ "error": "car_code required" }))
}

fn bad_request(err: &anyhow::Error) -> (u16, Value) {
    (400, json!({ "error": "invalid_body", "detail": err.to_string() }))
}

fn parse_body<T: serde::de::DeserializeOwned>(request: &HttpRequest) -> Result<T> {
    let body: &[u8] = if request.body.is_empty() {
        b"{}"
    } else {
        &request.body
    };
    serde_json::from_slice(body).map_err(|e| anyhow!("invalid json body: {}", e))
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_HEADER_BYTES + MAX_BODY_BYTES {
            return Err(anyhow!("request too large"));
        }
    };

    let text = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length: usize = match headers.get("content-length") {
        Some(value) => value
            .parse()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before end of body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (raw_path.to_string(), HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        query,
        body,
        raw_path: raw_path.to_string(),
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), percent_decode(v)))
        .collect()
}

fn percent_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={}", value).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        502 => "HTTP/1.1 502 Bad Gateway",
        504 => "HTTP/1.1 504 Gateway Timeout",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
    raw_path: String,
}
