use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use edge_capture::config::EdgeConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "EDGE_CAPTURE_CONFIG",
        "EDGE_CAPTURE_ROOT",
        "EDGE_CAPTURE_ADDR",
        "EDGE_CAPTURE_BACKENDS",
        "EDGE_CAPTURE_SLACK_MS",
        "EDGE_CAPTURE_KILL_GRACE_MS",
        "WIDTH",
        "HEIGHT",
        "MOCK",
        "DEFAULT_RPM",
        "DEFAULT_FRAMES",
        "CORE_URL",
        "UPLOAD_TOKEN",
        "UPLOAD_TIMEOUT_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "jobs_root": "/var/lib/edge-capture/jobs",
        "mock": false,
        "api": { "addr": "127.0.0.1:9000" },
        "camera": {
            "width": 4056,
            "height": 3040,
            "ext": "JPG",
            "backends": ["rpicam-still"]
        },
        "defaults": { "rpm": 1.5, "frames": 72 },
        "timing": { "slack_ms": 1000, "kill_grace_ms": 5000 },
        "upload": {
            "core_url": "https://core.example",
            "token": "file-token",
            "timeout_secs": 30
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("EDGE_CAPTURE_CONFIG", file.path());
    std::env::set_var("WIDTH", "1920");
    std::env::set_var("MOCK", "1");
    std::env::set_var("UPLOAD_TOKEN", "env-token");
    std::env::set_var("EDGE_CAPTURE_BACKENDS", "libcamera-still, rpicam-still");

    let cfg = EdgeConfig::load().expect("load config");

    assert_eq!(
        cfg.jobs_root,
        std::path::PathBuf::from("/var/lib/edge-capture/jobs")
    );
    assert_eq!(cfg.api_addr, "127.0.0.1:9000");
    assert_eq!(cfg.capture.width, 1920);
    assert_eq!(cfg.capture.height, 3040);
    assert_eq!(cfg.capture.ext, "jpg");
    assert_eq!(
        cfg.capture.backends,
        vec!["libcamera-still", "rpicam-still"]
    );
    assert!(cfg.capture.simulate);
    assert_eq!(cfg.capture.slack_ms, 1000);
    assert_eq!(cfg.capture.kill_grace_ms, 5000);
    assert_eq!(cfg.defaults.rpm, 1.5);
    assert_eq!(cfg.defaults.frames, 72);
    assert_eq!(cfg.upload.core_url.as_deref(), Some("https://core.example"));
    assert_eq!(cfg.upload.token.as_deref(), Some("env-token"));
    assert_eq!(cfg.upload.timeout, Duration::from_secs(30));

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();
    std::env::set_var("EDGE_CAPTURE_ROOT", "/tmp/edge-jobs");

    let cfg = EdgeConfig::load().expect("load config");

    assert_eq!(cfg.jobs_root, std::path::PathBuf::from("/tmp/edge-jobs"));
    assert_eq!(cfg.api_addr, "0.0.0.0:8080");
    assert_eq!((cfg.capture.width, cfg.capture.height), (1920, 1080));
    assert_eq!(
        cfg.capture.backends,
        vec!["rpicam-still", "libcamera-still"]
    );
    assert!(!cfg.capture.simulate);
    assert_eq!(cfg.defaults.rpm, 2.0);
    assert_eq!(cfg.defaults.frames, 36);
    assert!(cfg.upload.settings().is_err());

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("DEFAULT_RPM", "0"),
        ("DEFAULT_FRAMES", "0"),
        ("WIDTH", "wide"),
        ("EDGE_CAPTURE_SLACK_MS", "0"),
        ("CORE_URL", "ftp://core.example"),
        ("CORE_URL", "not a url"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            EdgeConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }

    clear_env();
}

#[test]
fn zero_slack_in_file_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "timing": { "slack_ms": 0 } }"#)
        .expect("write config");
    std::env::set_var("EDGE_CAPTURE_CONFIG", file.path());

    let err = EdgeConfig::load().unwrap_err();
    assert!(err.to_string().contains("slack_ms"));

    clear_env();
}
