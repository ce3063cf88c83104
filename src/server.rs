//! HTTP surface.
//!
//! A hand-rolled server on `TcpListener`: the accept loop runs nonblocking
//! under a shutdown flag and hands each connection to its own thread.
//! Streaming connections are long-lived; each one builds a private pipeline
//! (own source handle, own debounce state) and writes multipart JPEG parts
//! until the client goes away or the source gives up.
//!
//! Endpoints:
//! - `GET /live-feed`        302 redirect to the primary stream
//! - `GET /api/stream`       looping recording, multipart/x-mixed-replace
//! - `GET /api/rtsp-stream`  live camera feed, multipart/x-mixed-replace
//! - `GET /status`           source/model/compute health JSON
//! - `GET /api/detection`    latest event JSON or a no-detection sentinel

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::AppConfig;
use crate::detect::Detector;
use crate::events::{EventDebouncer, EventDispatcher, EventSink, LatestEventSlot};
use crate::exempt::ExemptionCache;
use crate::ingest::{FileSource, FrameSource, NetStreamSource};
use crate::pipeline::Pipeline;
use crate::tasks::TaskGroup;

const MAX_REQUEST_BYTES: usize = 8192;
const MULTIPART_BOUNDARY: &str = "frame";

/// Everything a connection handler needs, injected explicitly; there is no
/// ambient process state.
pub struct AppState {
    pub config: AppConfig,
    pub detector: Detector,
    pub cache: Arc<ExemptionCache>,
    pub slot: Arc<LatestEventSlot>,
    pub sink: Arc<dyn EventSink>,
    pub tasks: Arc<TaskGroup>,
    /// Health of the two source variants, updated by their pipelines.
    pub file_source_open: AtomicBool,
    pub stream_source_open: AtomicBool,
}

impl AppState {
    pub fn source_open(&self) -> bool {
        self.file_source_open.load(Ordering::SeqCst)
            && self.stream_source_open.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join().map_err(|_| anyhow!("server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr: SocketAddr = self.state.config.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        // Server shutdown rides the task group flag so streaming threads see
        // one coherent signal.
        let shutdown = self.state.tasks.shutdown_flag();
        let shutdown_thread = Arc::clone(&shutdown);
        let state = Arc::clone(&self.state);
        let join = std::thread::Builder::new()
            .name("http-accept".to_string())
            .spawn(move || {
                if let Err(err) = run_accept_loop(listener, state, shutdown_thread) {
                    log::error!("http server stopped: {}", err);
                }
            })
            .map_err(|e| anyhow!("failed to spawn http server: {}", e))?;

        Ok(ServerHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_accept_loop(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = Arc::clone(&state);
                let shutdown = Arc::clone(&shutdown);
                let spawned = std::thread::Builder::new()
                    .name(format!("http-conn-{}", peer))
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state, &shutdown) {
                            log::warn!("connection from {} ended with error: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn connection thread: {}", err);
                }
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

fn handle_connection(
    mut stream: TcpStream,
    state: &Arc<AppState>,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    let request = read_request(&mut stream)?;
    if request.method != "GET" {
        return write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#);
    }

    match request.path.as_str() {
        "/live-feed" => write_redirect(&mut stream, "/api/stream"),
        "/api/stream" => match FileSource::new(state.config.video.clone()) {
            Ok(source) => {
                serve_stream(stream, state, shutdown, Box::new(source), SourceVariant::File)
            }
            Err(err) => {
                log::error!("recording source rejected: {:#}", err);
                write_json_response(&mut stream, 500, r#"{"error":"source_unavailable"}"#)
            }
        },
        "/api/rtsp-stream" => match NetStreamSource::new(state.config.stream.clone()) {
            Ok(source) => serve_stream(
                stream,
                state,
                shutdown,
                Box::new(source),
                SourceVariant::Stream,
            ),
            Err(err) => {
                log::error!("camera source rejected: {:#}", err);
                write_json_response(&mut stream, 500, r#"{"error":"source_unavailable"}"#)
            }
        },
        "/status" => serve_status(&mut stream, state),
        "/api/detection" => serve_latest_detection(&mut stream, state),
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

#[derive(Clone, Copy)]
enum SourceVariant {
    File,
    Stream,
}

impl SourceVariant {
    fn health_flag<'a>(&self, state: &'a AppState) -> &'a AtomicBool {
        match self {
            SourceVariant::File => &state.file_source_open,
            SourceVariant::Stream => &state.stream_source_open,
        }
    }
}

/// Long-lived multipart response: one pipeline instance per connection,
/// unbounded parts until disconnect, source exhaustion, or shutdown.
fn serve_stream(
    mut stream: TcpStream,
    state: &Arc<AppState>,
    shutdown: &Arc<AtomicBool>,
    source: Box<dyn FrameSource>,
    variant: SourceVariant,
) -> Result<()> {
    let dispatcher = EventDispatcher::new(
        Arc::clone(&state.sink),
        Arc::clone(&state.slot),
        state.config.location,
        Arc::clone(&state.tasks),
    );
    let mut pipeline = Pipeline::new(
        source,
        state.detector.clone(),
        Arc::clone(&state.cache),
        dispatcher,
        EventDebouncer::new(state.config.cooldown),
        state.config.jpeg_quality,
    );

    if let Err(err) = pipeline.open() {
        variant.health_flag(state).store(false, Ordering::SeqCst);
        log::error!("stream pipeline failed to open: {:#}", err);
        return write_json_response(&mut stream, 500, r#"{"error":"source_unavailable"}"#);
    }
    variant.health_flag(state).store(true, Ordering::SeqCst);

    let header = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace; boundary={boundary}\r\n\
         Cache-Control: no-cache\r\n\
         Connection: keep-alive\r\n\
         Access-Control-Allow-Origin: *\r\n\r\n",
        boundary = MULTIPART_BOUNDARY
    );
    stream.write_all(header.as_bytes())?;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::debug!("stream connection closing: shutdown");
            break;
        }
        let jpeg = match pipeline.run_step() {
            Ok(jpeg) => jpeg,
            Err(err) => {
                // Source gave up (e.g. reconnect policy exhausted). Surface it
                // through /status and end this stream.
                variant.health_flag(state).store(false, Ordering::SeqCst);
                log::error!("stream pipeline ended: {:#}", err);
                break;
            }
        };

        let part_header = format!(
            "--{boundary}\r\nContent-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n",
            boundary = MULTIPART_BOUNDARY,
            len = jpeg.len()
        );
        if stream.write_all(part_header.as_bytes()).is_err()
            || stream.write_all(&jpeg).is_err()
            || stream.write_all(b"\r\n").is_err()
        {
            // Client disconnected; normal end of stream.
            log::debug!(
                "stream client disconnected after {} frames",
                pipeline.state().frames_processed
            );
            break;
        }
    }

    pipeline.close();
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    status: &'static str,
    source_open: bool,
    model_loaded: bool,
    using_accelerated_compute: bool,
    compute_device_name: String,
}

fn serve_status(stream: &mut TcpStream, state: &Arc<AppState>) -> Result<()> {
    let body = StatusBody {
        status: "running",
        source_open: state.source_open(),
        model_loaded: true,
        using_accelerated_compute: state.detector.is_accelerated(),
        compute_device_name: state.detector.device_name().to_string(),
    };
    let payload = serde_json::to_vec(&body)?;
    write_response(stream, 200, "application/json", &payload)
}

fn serve_latest_detection(stream: &mut TcpStream, state: &Arc<AppState>) -> Result<()> {
    match state.slot.snapshot() {
        Some(event) => {
            let payload = serde_json::to_vec(&event)?;
            write_response(stream, 200, "application/json", &payload)
        }
        None => write_json_response(stream, 200, r#"{"status":"no detection"}"#),
    }
}

// ----------------------------------------------------------------------------
// Minimal HTTP plumbing
// ----------------------------------------------------------------------------

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let request_line = text
        .split("\r\n")
        .next()
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
    })
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
}

fn write_redirect(stream: &mut TcpStream, location: &str) -> Result<()> {
    let header = format!(
        "HTTP/1.1 302 Found\r\nLocation: {location}\r\nContent-Length: 0\r\nCache-Control: no-cache\r\n\r\n"
    );
    stream.write_all(header.as_bytes())?;
    Ok(())
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &str) -> Result<()> {
    write_response(stream, status, "application/json", body.as_bytes())
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nAccess-Control-Allow-Origin: *\r\nCache-Control: no-cache\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}
