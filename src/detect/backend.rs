use anyhow::Result;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// Backends may block for model latency; each pipeline calls `detect`
/// synchronously from its own stream thread, so blocking here is acceptable.
/// Backends report every candidate above zero confidence; thresholding and
/// the max-detections cap are applied by the `Detector` facade.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one RGB frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Human-readable compute device, surfaced by the status endpoint.
    fn device_name(&self) -> String {
        "cpu".to_string()
    }

    /// Whether inference runs on accelerated hardware.
    fn is_accelerated(&self) -> bool {
        false
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
