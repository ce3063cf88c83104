//! Looping local recording source.
//!
//! Reads a local MJPEG recording and never terminates: when the last frame
//! has been served the cursor seeks back to byte zero and the recording plays
//! again. A missing or undecodable file is fatal at open time; a decode error
//! mid-stream re-seeks and continues.

use anyhow::{anyhow, Context, Result};
use std::time::{Duration, Instant};

use super::mjpeg::{decode_to_frame, find_jpeg_bounds};
use super::FrameSource;
use crate::frame::Frame;

/// Configuration for a local recording source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local recording path, or `stub://` for the synthetic generator.
    pub path: String,
    /// Playback pacing in frames per second. 0 disables pacing.
    pub target_fps: u32,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            target_fps: 30,
        }
    }
}

/// Looping file frame source.
pub struct FileSource {
    config: FileConfig,
    backend: Option<FileBackend>,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    Mjpeg(MjpegFileSource),
}

impl FileSource {
    pub fn new(config: FileConfig) -> Result<Self> {
        if config.path.trim().is_empty() {
            return Err(anyhow!("file source requires a recording path"));
        }
        if config.path.contains("://") && !config.path.starts_with("stub://") {
            return Err(anyhow!(
                "file source only supports local paths (no URL schemes)"
            ));
        }
        Ok(Self {
            config,
            backend: None,
        })
    }
}

impl FrameSource for FileSource {
    fn open(&mut self) -> Result<()> {
        if self.backend.is_some() {
            return Ok(());
        }
        let backend = if self.config.path.starts_with("stub://") {
            log::info!("FileSource: opened {} (synthetic)", self.config.path);
            FileBackend::Synthetic(SyntheticSource::new(self.config.target_fps))
        } else {
            let source = MjpegFileSource::open(&self.config)?;
            log::info!(
                "FileSource: opened {} ({} bytes)",
                self.config.path,
                source.bytes.len()
            );
            FileBackend::Mjpeg(source)
        };
        self.backend = Some(backend);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        let backend = self
            .backend
            .as_mut()
            .ok_or_else(|| anyhow!("file source not opened; call open() first"))?;
        match backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            FileBackend::Mjpeg(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        if self.backend.take().is_some() {
            log::debug!("FileSource: closed {}", self.config.path);
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.config.path)
    }

    fn is_healthy(&self) -> bool {
        self.backend.is_some()
    }
}

// ----------------------------------------------------------------------------
// MJPEG recording playback
// ----------------------------------------------------------------------------

struct MjpegFileSource {
    bytes: Vec<u8>,
    cursor: usize,
    pacer: FramePacer,
    path: String,
}

impl MjpegFileSource {
    fn open(config: &FileConfig) -> Result<Self> {
        let bytes = std::fs::read(&config.path)
            .with_context(|| format!("open recording {}", config.path))?;
        // The first frame must decode, or the recording is unusable and the
        // process should refuse to serve it.
        let (start, end) = find_jpeg_bounds(&bytes).ok_or_else(|| {
            anyhow!("recording {} contains no decodable frames", config.path)
        })?;
        decode_to_frame(&bytes[start..end])
            .with_context(|| format!("recording {} first frame is corrupt", config.path))?;
        Ok(Self {
            bytes,
            cursor: 0,
            pacer: FramePacer::new(config.target_fps),
            path: config.path.clone(),
        })
    }

    fn next_frame(&mut self) -> Result<Frame> {
        loop {
            let (start, end) = match find_jpeg_bounds(&self.bytes[self.cursor..]) {
                Some((start, end)) => (self.cursor + start, self.cursor + end),
                None => {
                    // End of recording: rewind and play again.
                    log::debug!("FileSource: {} reached end, restarting", self.path);
                    self.cursor = 0;
                    continue;
                }
            };
            self.cursor = end;

            match decode_to_frame(&self.bytes[start..end]) {
                Ok(frame) => {
                    self.pacer.pace();
                    return Ok(frame);
                }
                Err(err) => {
                    // Transient decode fault: skip the frame, keep playing.
                    log::warn!("FileSource: {} skipping bad frame: {}", self.path, err);
                    continue;
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and model-less runs
// ----------------------------------------------------------------------------

pub(crate) struct SyntheticSource {
    frame_count: u64,
    pacer: FramePacer,
}

impl SyntheticSource {
    pub(crate) fn new(target_fps: u32) -> Self {
        Self {
            frame_count: 0,
            pacer: FramePacer::new(target_fps),
        }
    }

    pub(crate) fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let width = crate::frame::FRAME_WIDTH;
        let height = crate::frame::FRAME_HEIGHT;
        let mut pixels = vec![0u8; (width * height * 3) as usize];
        // Sliding gradient so consecutive frames differ.
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count * 7) % 256) as u8;
        }
        self.pacer.pace();
        Frame::from_raw(pixels, width, height)
    }
}

/// Sleeps between frames to approximate a target rate.
pub(crate) struct FramePacer {
    interval: Duration,
    last_frame_at: Option<Instant>,
}

impl FramePacer {
    pub(crate) fn new(target_fps: u32) -> Self {
        let interval = if target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis((1000 / target_fps).max(1) as u64)
        };
        Self {
            interval,
            last_frame_at: None,
        }
    }

    pub(crate) fn pace(&mut self) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }
}
