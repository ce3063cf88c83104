//! Detection overlay and JPEG encoding.
//!
//! Draws a box outline plus a label bar for each surviving detection, then
//! encodes the frame for the multipart stream. Encoding must never stall the
//! stream: if the annotated frame fails to encode, the raw frame is encoded
//! instead, and only a double failure propagates (the pipeline then skips
//! that one frame).

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::detect::{ClassInfo, ClassKind, Detection};
use crate::frame::Frame;

/// JPEG quality for stream parts.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

const VIOLATION_COLOR: [u8; 3] = [220, 40, 40];
const UNIFORM_COLOR: [u8; 3] = [40, 180, 70];
const OUTLINE_PX: u32 = 2;
const LABEL_BAR_PX: u32 = 14;

fn color_for(kind: ClassKind) -> [u8; 3] {
    match kind {
        ClassKind::Violation => VIOLATION_COLOR,
        ClassKind::Uniform => UNIFORM_COLOR,
        // Ignored classes are filtered before rendering; neutral grey if one
        // ever slips through.
        ClassKind::Ignored => [128, 128, 128],
    }
}

fn put_pixel(pixels: &mut [u8], width: u32, height: u32, x: u32, y: u32, color: [u8; 3]) {
    if x >= width || y >= height {
        return;
    }
    let idx = ((y * width + x) * 3) as usize;
    pixels[idx..idx + 3].copy_from_slice(&color);
}

fn fill_rect(frame: &mut Frame, x0: u32, y0: u32, x1: u32, y1: u32, color: [u8; 3]) {
    let (w, h) = (frame.width, frame.height);
    for y in y0..y1.min(h) {
        for x in x0..x1.min(w) {
            put_pixel(&mut frame.pixels, w, h, x, y, color);
        }
    }
}

/// Draw overlays for the surviving (non-exempt) detections in place.
pub fn draw_detections(frame: &mut Frame, hits: &[(Detection, ClassInfo)]) {
    let (w, h) = (frame.width as f32, frame.height as f32);
    for (detection, info) in hits {
        let color = color_for(info.kind);
        let bbox = detection.bbox;
        let x0 = (bbox.x.clamp(0.0, 1.0) * w) as u32;
        let y0 = (bbox.y.clamp(0.0, 1.0) * h) as u32;
        let x1 = ((bbox.x + bbox.w).clamp(0.0, 1.0) * w) as u32;
        let y1 = ((bbox.y + bbox.h).clamp(0.0, 1.0) * h) as u32;
        if x1 <= x0 || y1 <= y0 {
            continue;
        }

        // Outline.
        fill_rect(frame, x0, y0, x1, (y0 + OUTLINE_PX).min(y1), color);
        fill_rect(frame, x0, y1.saturating_sub(OUTLINE_PX).max(y0), x1, y1, color);
        fill_rect(frame, x0, y0, (x0 + OUTLINE_PX).min(x1), y1, color);
        fill_rect(frame, x1.saturating_sub(OUTLINE_PX).max(x0), y0, x1, y1, color);

        // Label bar above the box (inside it when flush with the top edge),
        // width proportional to confidence so the overlay shows both class
        // color and score at a glance.
        let bar_y1 = y0;
        let bar_y0 = bar_y1.saturating_sub(LABEL_BAR_PX);
        let bar_w = ((x1 - x0) as f32 * detection.confidence.clamp(0.0, 1.0)) as u32;
        if bar_y0 < bar_y1 {
            fill_rect(frame, x0, bar_y0, x0 + bar_w.max(OUTLINE_PX), bar_y1, color);
        } else {
            fill_rect(
                frame,
                x0,
                y0,
                x0 + bar_w.max(OUTLINE_PX),
                (y0 + LABEL_BAR_PX).min(y1),
                color,
            );
        }
    }
}

/// Encode a frame's pixels as JPEG.
pub fn encode_jpeg(pixels: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(64 * 1024);
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(pixels, width, height, ExtendedColorType::Rgb8)
        .context("jpeg encode failed")?;
    Ok(out)
}

/// Annotate and encode one frame, falling back to the unannotated pixels if
/// the annotated encode fails.
pub fn render_frame(
    frame: Frame,
    hits: &[(Detection, ClassInfo)],
    quality: u8,
) -> Result<Vec<u8>> {
    render_frame_with(frame, hits, quality, encode_jpeg)
}

fn render_frame_with<E>(
    mut frame: Frame,
    hits: &[(Detection, ClassInfo)],
    quality: u8,
    encode: E,
) -> Result<Vec<u8>>
where
    E: Fn(&[u8], u32, u32, u8) -> Result<Vec<u8>>,
{
    let raw = if hits.is_empty() {
        None
    } else {
        Some(frame.pixels.clone())
    };

    draw_detections(&mut frame, hits);
    match encode(&frame.pixels, frame.width, frame.height, quality) {
        Ok(bytes) => Ok(bytes),
        Err(err) => {
            log::warn!("annotated frame encode failed, sending raw frame: {}", err);
            let pixels = raw.as_deref().unwrap_or(&frame.pixels);
            encode(pixels, frame.width, frame.height, quality)
                .context("raw frame fallback encode failed")
        }
    }
}
