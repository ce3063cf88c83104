//! Raw frame container.
//!
//! Frames are ephemeral: a pipeline iteration owns exactly one `Frame`,
//! annotates and encodes it, and drops it. Nothing downstream of the encoder
//! ever sees raw pixels again.
//!
//! All sources normalize to `FRAME_WIDTH` x `FRAME_HEIGHT` before handing a
//! frame downstream, so the renderer and encoder never branch on shape.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::imageops::FilterType;
use image::RgbImage;

/// Fixed output width (16:9).
pub const FRAME_WIDTH: u32 = 854;
/// Fixed output height.
pub const FRAME_HEIGHT: u32 = 480;

/// A decoded RGB frame tagged with its capture timestamp.
pub struct Frame {
    /// RGB24, row-major, no padding.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Local capture time. Exemption checks and event records both derive
    /// their date from this, so a frame and its event always agree.
    pub captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap raw RGB bytes captured now.
    pub fn from_raw(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at: Local::now(),
        })
    }

    /// Resize to the fixed output resolution. No-op when already there.
    pub fn fit_to_output(self) -> Result<Self> {
        if self.width == FRAME_WIDTH && self.height == FRAME_HEIGHT {
            return Ok(self);
        }
        let captured_at = self.captured_at;
        let img = RgbImage::from_raw(self.width, self.height, self.pixels)
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
        let resized = image::imageops::resize(&img, FRAME_WIDTH, FRAME_HEIGHT, FilterType::Nearest);
        Ok(Self {
            pixels: resized.into_raw(),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            captured_at,
        })
    }

}
