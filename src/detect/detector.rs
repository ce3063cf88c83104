use std::sync::{Arc, Mutex};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Fixed inference configuration, set once at construction.
#[derive(Clone, Copy, Debug)]
pub struct DetectorConfig {
    /// Detections below this confidence are dropped.
    pub confidence_threshold: f32,
    /// Hard cap on detections per frame, highest confidence first.
    pub max_detections: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_detections: 50,
        }
    }
}

/// Shared detector facade.
///
/// The backend is wrapped in `Mutex` because `DetectorBackend::detect` takes
/// `&mut self`; one loaded model serves every concurrent stream pipeline.
/// A backend failure on a single frame is logged and reported as zero
/// detections so that a transient inference fault never stalls a stream.
#[derive(Clone)]
pub struct Detector {
    backend: Arc<Mutex<dyn DetectorBackend>>,
    config: DetectorConfig,
    name: &'static str,
    device_name: String,
    accelerated: bool,
}

impl Detector {
    pub fn new<B: DetectorBackend + 'static>(backend: B, config: DetectorConfig) -> Self {
        let name = backend.name();
        let device_name = backend.device_name();
        let accelerated = backend.is_accelerated();
        Self {
            backend: Arc::new(Mutex::new(backend)),
            config,
            name,
            device_name,
            accelerated,
        }
    }

    /// Run detection on a frame. Never fails: backend errors collapse to an
    /// empty result for that frame.
    pub fn detect(&self, frame: &Frame) -> Vec<Detection> {
        let mut backend = match self.backend.lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::error!("detector '{}' lock poisoned; skipping frame", self.name);
                return Vec::new();
            }
        };
        let mut detections = match backend.detect(&frame.pixels, frame.width, frame.height) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!(
                    "detector '{}' failed on frame; treating as no detections: {}",
                    self.name,
                    err
                );
                return Vec::new();
            }
        };
        drop(backend);

        detections.retain(|d| d.confidence >= self.config.confidence_threshold);
        detections.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        detections.truncate(self.config.max_detections);
        detections
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerated
    }
}
