use std::sync::Mutex;

use tempfile::NamedTempFile;

use campuswatch::AppConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAMPUSWATCH_CONFIG",
        "CAMPUSWATCH_ADDR",
        "CAMPUSWATCH_VIDEO_PATH",
        "CAMPUSWATCH_STREAM_URL",
        "CAMPUSWATCH_MODEL_PATH",
        "CAMPUSWATCH_COOLDOWN_MS",
        "CAMPUSWATCH_REFRESH_SECS",
        "CAMPUSWATCH_EXEMPTION_URL",
        "CAMPUSWATCH_EVENT_LOG_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [server]
        addr = "0.0.0.0:9000"

        [video]
        path = "stub://lobby"
        target_fps = 15

        [stream]
        url = "stub://camera-2"
        max_reconnect_attempts = 5
        backoff_ms = 250
        backoff_cap_ms = 4000

        [detector]
        confidence_threshold = 0.6
        max_detections = 20
        jpeg_quality = 70

        [events]
        cooldown_ms = 1500
        log_url = "http://logs.internal/api/events"

        [exemptions]
        store_url = "http://policy.internal/api/windows"
        refresh_secs = 30

        [location]
        building_number = 4
        floor_number = 2
        camera_number = 7
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("CAMPUSWATCH_CONFIG", file.path());
    std::env::set_var("CAMPUSWATCH_COOLDOWN_MS", "2000");
    std::env::set_var("CAMPUSWATCH_STREAM_URL", "stub://override");

    let cfg = AppConfig::load().expect("load config");
    clear_env();

    // File values.
    assert_eq!(cfg.addr, "0.0.0.0:9000");
    assert_eq!(cfg.video.path, "stub://lobby");
    assert_eq!(cfg.video.target_fps, 15);
    assert_eq!(cfg.stream.reconnect.max_attempts, 5);
    assert_eq!(cfg.stream.reconnect.backoff.as_millis(), 250);
    assert_eq!(cfg.stream.reconnect.backoff_cap.as_millis(), 4000);
    assert_eq!(cfg.confidence_threshold, 0.6);
    assert_eq!(cfg.max_detections, 20);
    assert_eq!(cfg.jpeg_quality, 70);
    assert_eq!(
        cfg.event_log_url.as_deref(),
        Some("http://logs.internal/api/events")
    );
    assert_eq!(
        cfg.exemption_store_url.as_deref(),
        Some("http://policy.internal/api/windows")
    );
    assert_eq!(cfg.refresh_interval.as_secs(), 30);
    assert_eq!(cfg.location.building_number, 4);
    assert_eq!(cfg.location.floor_number, 2);
    assert_eq!(cfg.location.camera_number, 7);

    // Env overrides win over the file.
    assert_eq!(cfg.cooldown.as_millis(), 2000);
    assert_eq!(cfg.stream.url, "stub://override");
}

#[test]
fn defaults_boot_without_any_configuration() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AppConfig::load().expect("load defaults");
    assert_eq!(cfg.video.path, "stub://recording");
    assert_eq!(cfg.stream.url, "stub://camera");
    assert_eq!(cfg.confidence_threshold, 0.5);
    assert_eq!(cfg.cooldown.as_millis(), 1000);
    assert_eq!(cfg.refresh_interval.as_secs(), 10);
    assert!(cfg.model_path.is_none());
    assert!(cfg.event_log_url.is_none());
    // Retry-forever stays the default; bounding it is an explicit opt-in.
    assert_eq!(cfg.stream.reconnect.max_attempts, 0);
}

#[test]
fn invalid_threshold_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [detector]
        confidence_threshold = 1.5
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("CAMPUSWATCH_CONFIG", file.path());

    let result = AppConfig::load();
    clear_env();
    assert!(result.is_err());
}

#[test]
fn zero_cooldown_is_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("CAMPUSWATCH_COOLDOWN_MS", "0");
    let result = AppConfig::load();
    clear_env();
    assert!(result.is_err());
}
