//! Shared MJPEG scanning and decoding helpers.

use anyhow::{anyhow, Context, Result};
use image::GenericImageView;
use std::io::Read;

use crate::frame::Frame;

/// Upper bound on a single encoded frame. Anything larger is a corrupt or
/// hostile stream.
pub(crate) const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Find the byte range `[start, end)` of the first complete JPEG in `buffer`.
pub(crate) fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == SOI)?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == EOI)
        .map(|pos| start + 2 + pos + 2)?;
    Some((start, end))
}

/// Decode a JPEG, then normalize to the fixed output resolution.
pub(crate) fn decode_to_frame(jpeg_bytes: &[u8]) -> Result<Frame> {
    let img = image::load_from_memory(jpeg_bytes).context("decode jpeg frame")?;
    let (width, height) = img.dimensions();
    let rgb = img.into_rgb8();
    Frame::from_raw(rgb.into_raw(), width, height)?.fit_to_output()
}

/// Incremental scanner over a live MJPEG byte stream.
///
/// Reads in small chunks to bias toward latency over throughput and drops
/// leading garbage when the buffer grows without a complete frame.
pub(crate) struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    pub(crate) fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    pub(crate) fn read_next_jpeg(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let jpeg = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(jpeg);
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Err(anyhow!("mjpeg stream ended"));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_jpeg() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
        let mut out = Vec::new();
        let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85);
        encoder
            .encode(img.as_raw(), 4, 4, image::ExtendedColorType::Rgb8)
            .expect("encode test jpeg");
        out
    }

    #[test]
    fn finds_bounds_with_leading_garbage() {
        let jpeg = tiny_jpeg();
        let mut stream = vec![0x00, 0x11, 0x22];
        stream.extend_from_slice(&jpeg);
        stream.extend_from_slice(b"trailing");

        let (start, end) = find_jpeg_bounds(&stream).expect("bounds");
        assert_eq!(&stream[start..end], jpeg.as_slice());
    }

    #[test]
    fn no_bounds_for_incomplete_frame() {
        let jpeg = tiny_jpeg();
        let truncated = &jpeg[..jpeg.len() - 2];
        assert!(find_jpeg_bounds(truncated).is_none());
    }

    #[test]
    fn stream_scanner_yields_consecutive_frames() {
        let jpeg = tiny_jpeg();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&jpeg);
        bytes.extend_from_slice(&jpeg);

        let mut stream = MjpegStream::new(Box::new(std::io::Cursor::new(bytes)));
        assert_eq!(stream.read_next_jpeg().expect("first"), jpeg);
        assert_eq!(stream.read_next_jpeg().expect("second"), jpeg);
        assert!(stream.read_next_jpeg().is_err());
    }

    #[test]
    fn decode_normalizes_resolution() {
        let frame = decode_to_frame(&tiny_jpeg()).expect("decode");
        assert_eq!(frame.width, crate::frame::FRAME_WIDTH);
        assert_eq!(frame.height, crate::frame::FRAME_HEIGHT);
    }
}
