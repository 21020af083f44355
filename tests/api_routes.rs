use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use edge_capture::api::{ApiConfig, ApiHandle, ApiServer};
use edge_capture::config::RequestDefaults;
use edge_capture::{
    CaptureController, CaptureSettings, EdgePipeline, JobStore, UploadSettings, Uploader,
};
use serde_json::{json, Value};

fn simulated_settings() -> CaptureSettings {
    CaptureSettings {
        backends: vec!["edge-capture-test-no-such-camera".to_string()],
        simulate: true,
        ..CaptureSettings::default()
    }
}

fn spawn_api(jobs: &std::path::Path, uploader: Option<Uploader>) -> ApiHandle {
    let pipeline = EdgePipeline::new(
        JobStore::new(jobs),
        CaptureController::new(simulated_settings()),
        uploader,
    );
    ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            defaults: RequestDefaults {
                rpm: 2.0,
                frames: 12,
            },
        },
        Arc::new(pipeline),
    )
    .spawn()
    .expect("spawn api")
}

/// Returns status and JSON body, including for non-2xx answers.
fn call(request: ureq::Request, body: Option<Value>) -> (u16, Value) {
    let result = match body {
        Some(body) => request
            .set("Content-Type", "application/json")
            .send_string(&body.to_string()),
        None => request.call(),
    };
    let response = match result {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(err) => panic!("transport error: {err}"),
    };
    let status = response.status();
    let text = response.into_string().expect("body");
    let value: Value = serde_json::from_str(&text).expect("json body");
    (status, value)
}

/// Mock ingestion core: accepts one upload and answers with a job id.
fn mock_core() -> (String, JoinHandle<(String, usize)>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind core");
    let url = format!("http://{}", listener.local_addr().expect("addr"));
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("timeout");
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        let header_end = loop {
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos;
            }
            let n = stream.read(&mut buf).expect("read");
            assert!(n > 0);
            data.extend_from_slice(&buf[..n]);
        };
        let head = String::from_utf8_lossy(&data[..header_end]).to_string();
        let length: usize = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, v)| v.trim().parse().ok())
            .unwrap_or(0);
        let mut received = data.len() - header_end - 4;
        while received < length {
            let n = stream.read(&mut buf).expect("read body");
            assert!(n > 0);
            received += n;
        }
        let reply = r#"{"ok":true,"job_id":"core-42"}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            reply.len(),
            reply
        );
        stream.write_all(response.as_bytes()).expect("write");
        (head, received)
    });
    (url, handle)
}

#[test]
fn healthz_reports_ok() {
    let jobs = tempfile::tempdir().expect("jobs");
    let api = spawn_api(jobs.path(), None);

    let (status, body) = call(ureq::get(&format!("http://{}/healthz", api.addr)), None);

    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert!(body["now"].as_str().is_some());
    api.stop().expect("stop");
}

#[test]
fn start_uses_defaults_and_reports_progress() {
    let jobs = tempfile::tempdir().expect("jobs");
    let api = spawn_api(jobs.path(), None);
    let base = format!("http://{}", api.addr);

    let (status, body) = call(
        ureq::post(&format!("{base}/capture/start")),
        Some(json!({ "car_code": "SIM-1" })),
    );

    assert_eq!(status, 200);
    assert_eq!(body["ok"], true);
    assert_eq!(body["car_code"], "SIM-1");
    assert_eq!(body["frames"], 12);
    assert_eq!(body["partial"], false);
    assert_eq!(body["note"], "MOCK frames generated");
    assert_eq!(body["manifest"]["car_code"], "SIM-1");
    assert_eq!(body["manifest"]["shot"]["interval_ms"], 2500);
    assert!(jobs.path().join("SIM-1").join("manifest.json").exists());

    let (status, body) = call(
        ureq::get(&format!("{base}/capture/progress")).query("car_code", "SIM-1"),
        None,
    );
    assert_eq!(status, 200);
    assert_eq!(body["frames"], 12);
    api.stop().expect("stop");
}

#[test]
fn upload_forwards_archive_to_core() {
    let jobs = tempfile::tempdir().expect("jobs");
    let (core_url, core) = mock_core();
    let uploader = Uploader::new(UploadSettings {
        core_url,
        token: "route-token".to_string(),
        timeout: Duration::from_secs(10),
    });
    let api = spawn_api(jobs.path(), Some(uploader));
    let base = format!("http://{}", api.addr);

    let (status, _) = call(
        ureq::post(&format!("{base}/capture/start")),
        Some(json!({ "car_code": "UP-1", "frames": 6 })),
    );
    assert_eq!(status, 200);

    let (status, body) = call(
        ureq::post(&format!("{base}/capture/upload")),
        Some(json!({ "car_code": "UP-1" })),
    );

    assert_eq!(status, 200);
    assert_eq!(body["job_id"], "core-42");
    let (head, received) = core.join().expect("core");
    assert!(head.to_lowercase().contains("authorization: bearer route-token"));
    let archive = jobs.path().join("UP-1").join("payload.zip");
    assert_eq!(received as u64, std::fs::metadata(archive).expect("archive").len());
    api.stop().expect("stop");
}

#[test]
fn upload_without_core_is_rejected() {
    let jobs = tempfile::tempdir().expect("jobs");
    let api = spawn_api(jobs.path(), None);

    let (status, body) = call(
        ureq::post(&format!("http://{}/capture/upload", api.addr)),
        Some(json!({ "car_code": "NOPE" })),
    );

    assert_eq!(status, 400);
    assert_eq!(body["error"], "INVALID_INPUT");
    api.stop().expect("stop");
}

#[test]
fn malformed_requests_are_rejected() {
    let jobs = tempfile::tempdir().expect("jobs");
    let api = spawn_api(jobs.path(), None);
    let base = format!("http://{}", api.addr);

    let (status, body) = call(
        ureq::post(&format!("{base}/capture/start")),
        Some(json!({ "rpm": 2.0 })),
    );
    assert_eq!(status, 400);
    assert_eq!(body["error"], "car_code required");

    let (status, body) = call(
        ureq::post(&format!("{base}/capture/start")),
        Some(json!({ "car_code": "../escape" })),
    );
    assert_eq!(status, 400);
    assert_eq!(body["error"], "INVALID_INPUT");

    let (status, body) = call(
        ureq::post(&format!("{base}/capture/start")),
        Some(json!({ "car_code": "ZERO", "rpm": 0.0 })),
    );
    assert_eq!(status, 400);
    assert_eq!(body["error"], "INVALID_INPUT");
    assert!(!jobs.path().join("ZERO").exists());

    let (status, _) = call(ureq::get(&format!("{base}/capture/progress")), None);
    assert_eq!(status, 400);

    let (status, body) = call(ureq::get(&format!("{base}/nowhere")), None);
    assert_eq!(status, 404);
    assert_eq!(body["error"], "not_found");

    let (status, _) = call(ureq::get(&format!("{base}/capture/start")), None);
    assert_eq!(status, 405);
    api.stop().expect("stop");
}
