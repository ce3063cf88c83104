//! Reconnecting live camera source.
//!
//! Consumes an HTTP MJPEG camera feed. Any read or connect failure closes the
//! handle, waits out an exponential backoff, and reopens. The retry budget is
//! an explicit policy: `max_attempts = 0` retries forever, anything else
//! surfaces exhaustion as an error so the stream (and the status endpoint)
//! can report a dead camera instead of looping silently.

use anyhow::{anyhow, Context, Result};
use std::time::Duration;

use super::file::{FramePacer, SyntheticSource};
use super::mjpeg::{decode_to_frame, MjpegStream};
use super::FrameSource;
use crate::frame::Frame;

/// Reconnect policy for the live camera feed.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up. 0 = retry forever.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub backoff: Duration,
    /// Cap on the exponentially growing delay.
    pub backoff_cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            backoff: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (1-based): `backoff * 2^(attempt-1)`,
    /// capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.backoff.saturating_mul(1u32 << shift);
        delay.min(self.backoff_cap)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts != 0 && attempts >= self.max_attempts
    }
}

/// Configuration for the live camera source.
#[derive(Clone, Debug)]
pub struct NetStreamConfig {
    /// Stream URL (`http(s)://...` MJPEG), or `stub://` for synthetic frames.
    pub url: String,
    /// Frame decimation target. 0 disables pacing.
    pub target_fps: u32,
    pub reconnect: ReconnectPolicy,
}

impl Default for NetStreamConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 30,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Live camera frame source.
pub struct NetStreamSource {
    config: NetStreamConfig,
    backend: Option<NetBackend>,
    /// Consecutive failed connect/read attempts since the last good frame.
    attempts: u32,
    exhausted: bool,
}

enum NetBackend {
    Synthetic(SyntheticSource),
    Http(HttpStreamState),
}

struct HttpStreamState {
    stream: MjpegStream,
    pacer: FramePacer,
}

impl NetStreamSource {
    pub fn new(config: NetStreamConfig) -> Result<Self> {
        let url = config.url.trim();
        if url.is_empty() {
            return Err(anyhow!("stream source requires a url"));
        }
        if !url.starts_with("stub://") && !url.starts_with("http://") && !url.starts_with("https://")
        {
            return Err(anyhow!(
                "unsupported stream url '{}'; expected http(s) or stub",
                url
            ));
        }
        Ok(Self {
            config,
            backend: None,
            attempts: 0,
            exhausted: false,
        })
    }

    fn connect_http(&self) -> Result<HttpStreamState> {
        let response = ureq::get(&self.config.url)
            .call()
            .with_context(|| format!("connect to camera stream {}", self.config.url))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if !content_type.to_lowercase().contains("multipart") {
            return Err(anyhow!(
                "camera stream {} is not multipart mjpeg (Content-Type: {})",
                self.config.url,
                content_type
            ));
        }
        Ok(HttpStreamState {
            stream: MjpegStream::new(response.into_reader()),
            pacer: FramePacer::new(self.config.target_fps),
        })
    }

    /// Close, back off, reopen. Returns an error only when the policy is
    /// exhausted.
    fn reconnect(&mut self, cause: &anyhow::Error) -> Result<()> {
        self.backend = None;
        self.attempts += 1;
        if self.config.reconnect.exhausted(self.attempts) {
            self.exhausted = true;
            return Err(anyhow!(
                "camera stream {} unreachable after {} attempts (last error: {})",
                self.config.url,
                self.attempts,
                cause
            ));
        }
        let delay = self.config.reconnect.delay_for(self.attempts);
        log::warn!(
            "NetStreamSource: {} read failed (attempt {}), reconnecting in {:?}: {}",
            self.config.url,
            self.attempts,
            delay,
            cause
        );
        std::thread::sleep(delay);
        Ok(())
    }
}

impl FrameSource for NetStreamSource {
    fn open(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        if self.config.url.starts_with("stub://") {
            log::info!("NetStreamSource: connected to {} (synthetic)", self.config.url);
            self.backend = Some(NetBackend::Synthetic(SyntheticSource::new(
                self.config.target_fps,
            )));
            return Ok(());
        }

        loop {
            match self.connect_http() {
                Ok(state) => {
                    log::info!("NetStreamSource: connected to {}", self.config.url);
                    self.backend = Some(NetBackend::Http(state));
                    return Ok(());
                }
                Err(err) => self.reconnect(&err)?,
            }
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        loop {
            match self.backend.as_mut() {
                None => self.open()?,
                Some(NetBackend::Synthetic(source)) => return source.next_frame(),
                Some(NetBackend::Http(state)) => {
                    let result = state
                        .stream
                        .read_next_jpeg()
                        .and_then(|jpeg| decode_to_frame(&jpeg));
                    match result {
                        Ok(frame) => {
                            self.attempts = 0;
                            state.pacer.pace();
                            return Ok(frame);
                        }
                        Err(err) => self.reconnect(&err)?,
                    }
                }
            }
        }
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            log::debug!("NetStreamSource: closed {}", self.config.url);
        }
    }

    fn describe(&self) -> String {
        format!("stream:{}", self.config.url)
    }

    fn is_healthy(&self) -> bool {
        !self.exhausted
    }
}
