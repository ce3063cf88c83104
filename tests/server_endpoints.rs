//! End-to-end checks against a running server with stub sources and a
//! scripted detector.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use campuswatch::{
    AppConfig, AppState, ClassKind, Detection, Detector, DetectorConfig, LatestEventSlot,
    LocationTag, MemoryEventSink, ExemptionCache, Server, ServerHandle, StubBackend, TaskGroup,
};

struct TestServer {
    handle: Option<ServerHandle>,
    tasks: Arc<TaskGroup>,
    sink: Arc<MemoryEventSink>,
    slot: Arc<LatestEventSlot>,
    addr: std::net::SocketAddr,
}

impl TestServer {
    fn start(script: Vec<Vec<Detection>>) -> Self {
        Self::start_with(AppConfig::default(), script)
    }

    fn start_with(mut config: AppConfig, script: Vec<Vec<Detection>>) -> Self {
        config.addr = "127.0.0.1:0".to_string();
        config.video.target_fps = 0;
        config.stream.target_fps = 0;
        config.cooldown = Duration::from_millis(50);

        let tasks = Arc::new(TaskGroup::new());
        let sink = Arc::new(MemoryEventSink::new());
        let slot = Arc::new(LatestEventSlot::new());
        let state = Arc::new(AppState {
            config,
            detector: Detector::new(StubBackend::with_script(script), DetectorConfig::default()),
            cache: Arc::new(ExemptionCache::new()),
            slot: slot.clone(),
            sink: sink.clone(),
            tasks: tasks.clone(),
            file_source_open: AtomicBool::new(true),
            stream_source_open: AtomicBool::new(true),
        });

        let handle = Server::new(state).spawn().expect("spawn server");
        let addr = handle.addr;
        Self {
            handle: Some(handle),
            tasks,
            sink,
            slot,
            addr,
        }
    }

    fn get(&self, path: &str) -> (u16, Vec<String>, String) {
        let mut stream = TcpStream::connect(self.addr).expect("connect");
        write!(stream, "GET {} HTTP/1.1\r\nHost: test\r\n\r\n", path).expect("request");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");

        let mut reader = BufReader::new(stream);
        let mut status_line = String::new();
        reader.read_line(&mut status_line).expect("status line");
        let status: u16 = status_line
            .split_whitespace()
            .nth(1)
            .expect("status code")
            .parse()
            .expect("numeric status");

        let mut headers = Vec::new();
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).expect("header line");
            let line = line.trim_end().to_string();
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.to_lowercase().strip_prefix("content-length:") {
                content_length = value.trim().parse().unwrap_or(0);
            }
            headers.push(line);
        }

        let mut body = vec![0u8; content_length];
        if content_length > 0 {
            reader.read_exact(&mut body).expect("body");
        }
        (status, headers, String::from_utf8_lossy(&body).to_string())
    }

    fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop().expect("stop server");
        }
        self.tasks.shutdown();
    }
}

fn cap_detection() -> Detection {
    Detection::new(
        1,
        0.9,
        campuswatch::BoundingBox {
            x: 0.2,
            y: 0.2,
            w: 0.3,
            h: 0.3,
        },
    )
}

#[test]
fn live_feed_redirects_to_primary_stream() {
    let server = TestServer::start(Vec::new());
    let (status, headers, _) = server.get("/live-feed");
    assert_eq!(status, 302);
    assert!(headers
        .iter()
        .any(|h| h.eq_ignore_ascii_case("location: /api/stream")));
    server.stop();
}

#[test]
fn status_reports_running_with_device_info() {
    let server = TestServer::start(Vec::new());
    let (status, _, body) = server.get("/status");
    assert_eq!(status, 200);

    let json: serde_json::Value = serde_json::from_str(&body).expect("status json");
    assert_eq!(json["status"], "running");
    assert_eq!(json["sourceOpen"], true);
    assert_eq!(json["modelLoaded"], true);
    assert_eq!(json["usingAcceleratedCompute"], false);
    assert_eq!(json["computeDeviceName"], "stub");
    server.stop();
}

#[test]
fn detection_endpoint_returns_sentinel_then_latest_event() {
    let server = TestServer::start(Vec::new());

    let (status, _, body) = server.get("/api/detection");
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).expect("sentinel json");
    assert_eq!(json["status"], "no detection");

    // An event published by a dispatch unit becomes visible to polling.
    let event = campuswatch::DetectionEvent::new(
        ClassKind::Violation,
        "Cap",
        LocationTag::default(),
        chrono::Local::now(),
    );
    server.slot.publish(event.clone());

    let (status, _, body) = server.get("/api/detection");
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_str(&body).expect("event json");
    assert_eq!(json["eventId"], event.event_id);
    assert_eq!(json["classLabel"], "Cap");
    server.stop();
}

#[test]
fn unknown_path_is_404_and_post_is_405() {
    let server = TestServer::start(Vec::new());
    let (status, _, _) = server.get("/nope");
    assert_eq!(status, 404);

    let mut stream = TcpStream::connect(server.addr).expect("connect");
    write!(stream, "POST /status HTTP/1.1\r\nHost: test\r\n\r\n").expect("request");
    let mut response = String::new();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");
    let mut reader = BufReader::new(stream);
    reader.read_line(&mut response).expect("status line");
    assert!(response.contains("405"));
    server.stop();
}

#[test]
fn stream_endpoint_emits_multipart_jpeg_parts() {
    let server = TestServer::start(vec![vec![cap_detection()]]);

    let mut stream = TcpStream::connect(server.addr).expect("connect");
    write!(stream, "GET /api/stream HTTP/1.1\r\nHost: test\r\n\r\n").expect("request");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");

    // Read enough bytes to cover the response header and at least two parts.
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    while collected.len() < 512 * 1024 {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    drop(stream); // client disconnect ends the pipeline

    let text = String::from_utf8_lossy(&collected);
    assert!(text.contains("multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("Cache-Control: no-cache"));
    let boundaries = text.matches("--frame\r\nContent-Type: image/jpeg").count();
    assert!(boundaries >= 2, "expected >=2 parts, saw {}", boundaries);
    // JPEG magic appears in the payload.
    assert!(collected.windows(2).any(|w| w == [0xFF, 0xD8]));

    // The scripted cap detection produced at least one dispatched event.
    std::thread::sleep(Duration::from_millis(100));
    let events = server.sink.events();
    assert!(!events.is_empty());
    assert_eq!(events[0].class_label, "Cap");
    server.stop();
}

#[test]
fn unusable_recording_path_returns_source_unavailable() {
    let mut config = AppConfig::default();
    // FileSource refuses URL schemes outright; the client still deserves an
    // HTTP error rather than a dropped connection.
    config.video.path = "ftp://nvr/clip.mjpeg".to_string();
    let server = TestServer::start_with(config, Vec::new());

    let (status, _, body) = server.get("/api/stream");
    assert_eq!(status, 500);
    assert!(body.contains("source_unavailable"));
    server.stop();
}

#[test]
fn rtsp_stream_endpoint_serves_synthetic_camera() {
    let server = TestServer::start(Vec::new());

    let mut stream = TcpStream::connect(server.addr).expect("connect");
    write!(stream, "GET /api/rtsp-stream HTTP/1.1\r\nHost: test\r\n\r\n").expect("request");
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("timeout");

    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    while collected.len() < 32 * 1024 {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => collected.extend_from_slice(&chunk[..n]),
            Err(_) => break,
        }
    }
    drop(stream);

    let text = String::from_utf8_lossy(&collected);
    assert!(text.contains("200 OK"));
    assert!(text.contains("--frame"));
    server.stop();
}
