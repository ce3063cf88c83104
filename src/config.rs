//! Daemon configuration.
//!
//! Layered the same way everywhere: optional TOML file named by
//! `CAMPUSWATCH_CONFIG`, then environment overrides, then validation.
//! Every field has a default so a bare environment still boots (with stub
//! sources and no external stores).

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::events::LocationTag;
use crate::ingest::{FileConfig, NetStreamConfig, ReconnectPolicy};

const DEFAULT_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_VIDEO_PATH: &str = "stub://recording";
const DEFAULT_STREAM_URL: &str = "stub://camera";
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_MAX_DETECTIONS: usize = 50;
const DEFAULT_COOLDOWN_MS: u64 = 1_000;
const DEFAULT_REFRESH_SECS: u64 = 10;
const DEFAULT_BACKOFF_MS: u64 = 500;
const DEFAULT_BACKOFF_CAP_MS: u64 = 10_000;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    server: Option<ServerSection>,
    video: Option<VideoSection>,
    stream: Option<StreamSection>,
    detector: Option<DetectorSection>,
    events: Option<EventsSection>,
    exemptions: Option<ExemptionsSection>,
    location: Option<LocationSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerSection {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoSection {
    path: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamSection {
    url: Option<String>,
    target_fps: Option<u32>,
    max_reconnect_attempts: Option<u32>,
    backoff_ms: Option<u64>,
    backoff_cap_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorSection {
    model_path: Option<String>,
    confidence_threshold: Option<f32>,
    max_detections: Option<usize>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsSection {
    cooldown_ms: Option<u64>,
    log_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ExemptionsSection {
    store_url: Option<String>,
    refresh_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LocationSection {
    building_number: Option<u32>,
    floor_number: Option<u32>,
    camera_number: Option<u32>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub addr: String,
    pub video: FileConfig,
    pub stream: NetStreamConfig,
    /// ONNX model path; `None` runs the stub backend.
    pub model_path: Option<String>,
    pub confidence_threshold: f32,
    pub max_detections: usize,
    pub jpeg_quality: u8,
    pub cooldown: Duration,
    /// Event-log append endpoint; `None` keeps events in memory only.
    pub event_log_url: Option<String>,
    /// Exemption store query endpoint; `None` means no exemptions.
    pub exemption_store_url: Option<String>,
    pub refresh_interval: Duration,
    pub location: LocationTag,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            video: FileConfig {
                path: DEFAULT_VIDEO_PATH.to_string(),
                target_fps: DEFAULT_TARGET_FPS,
            },
            stream: NetStreamConfig {
                url: DEFAULT_STREAM_URL.to_string(),
                target_fps: DEFAULT_TARGET_FPS,
                reconnect: ReconnectPolicy::default(),
            },
            model_path: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
            jpeg_quality: crate::render::DEFAULT_JPEG_QUALITY,
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            event_log_url: None,
            exemption_store_url: None,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            location: LocationTag::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let file_cfg = match std::env::var("CAMPUSWATCH_CONFIG").ok().as_deref() {
            Some(path) if !path.trim().is_empty() => read_config_file(Path::new(path))?,
            _ => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ConfigFile) -> Self {
        let mut cfg = Self::default();
        if let Some(server) = file.server {
            if let Some(addr) = server.addr {
                cfg.addr = addr;
            }
        }
        if let Some(video) = file.video {
            if let Some(path) = video.path {
                cfg.video.path = path;
            }
            if let Some(fps) = video.target_fps {
                cfg.video.target_fps = fps;
            }
        }
        if let Some(stream) = file.stream {
            if let Some(url) = stream.url {
                cfg.stream.url = url;
            }
            if let Some(fps) = stream.target_fps {
                cfg.stream.target_fps = fps;
            }
            if let Some(attempts) = stream.max_reconnect_attempts {
                cfg.stream.reconnect.max_attempts = attempts;
            }
            if let Some(ms) = stream.backoff_ms {
                cfg.stream.reconnect.backoff = Duration::from_millis(ms);
            }
            if let Some(ms) = stream.backoff_cap_ms {
                cfg.stream.reconnect.backoff_cap = Duration::from_millis(ms);
            }
        }
        if let Some(detector) = file.detector {
            if detector.model_path.is_some() {
                cfg.model_path = detector.model_path;
            }
            if let Some(threshold) = detector.confidence_threshold {
                cfg.confidence_threshold = threshold;
            }
            if let Some(max) = detector.max_detections {
                cfg.max_detections = max;
            }
            if let Some(quality) = detector.jpeg_quality {
                cfg.jpeg_quality = quality;
            }
        }
        if let Some(events) = file.events {
            if let Some(ms) = events.cooldown_ms {
                cfg.cooldown = Duration::from_millis(ms);
            }
            if events.log_url.is_some() {
                cfg.event_log_url = events.log_url;
            }
        }
        if let Some(exemptions) = file.exemptions {
            if exemptions.store_url.is_some() {
                cfg.exemption_store_url = exemptions.store_url;
            }
            if let Some(secs) = exemptions.refresh_secs {
                cfg.refresh_interval = Duration::from_secs(secs);
            }
        }
        if let Some(location) = file.location {
            if let Some(n) = location.building_number {
                cfg.location.building_number = n;
            }
            if let Some(n) = location.floor_number {
                cfg.location.floor_number = n;
            }
            if let Some(n) = location.camera_number {
                cfg.location.camera_number = n;
            }
        }
        cfg
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("CAMPUSWATCH_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr;
            }
        }
        if let Ok(path) = std::env::var("CAMPUSWATCH_VIDEO_PATH") {
            if !path.trim().is_empty() {
                self.video.path = path;
            }
        }
        if let Ok(url) = std::env::var("CAMPUSWATCH_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Ok(path) = std::env::var("CAMPUSWATCH_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model_path = Some(path);
            }
        }
        if let Ok(ms) = std::env::var("CAMPUSWATCH_COOLDOWN_MS") {
            let ms: u64 = ms
                .parse()
                .map_err(|_| anyhow!("CAMPUSWATCH_COOLDOWN_MS must be milliseconds"))?;
            self.cooldown = Duration::from_millis(ms);
        }
        if let Ok(secs) = std::env::var("CAMPUSWATCH_REFRESH_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| anyhow!("CAMPUSWATCH_REFRESH_SECS must be seconds"))?;
            self.refresh_interval = Duration::from_secs(secs);
        }
        if let Ok(url) = std::env::var("CAMPUSWATCH_EXEMPTION_URL") {
            if !url.trim().is_empty() {
                self.exemption_store_url = Some(url);
            }
        }
        if let Ok(url) = std::env::var("CAMPUSWATCH_EVENT_LOG_URL") {
            if !url.trim().is_empty() {
                self.event_log_url = Some(url);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within 0..=1, got {}",
                self.confidence_threshold
            ));
        }
        if self.max_detections == 0 {
            return Err(anyhow!("max_detections must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            ));
        }
        if self.cooldown.is_zero() {
            return Err(anyhow!("events.cooldown_ms must be greater than zero"));
        }
        if self.refresh_interval.is_zero() {
            return Err(anyhow!("exemptions.refresh_secs must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
