//! Frame ingestion sources.
//!
//! Two interchangeable sources feed the pipeline:
//! - `FileSource`: loops a local recording forever; end-of-stream rewinds to
//!   the first frame.
//! - `NetStreamSource`: live camera feed over HTTP MJPEG; read failures
//!   trigger close / backoff / reopen under a configurable reconnect policy.
//!
//! Both accept `stub://` paths that swap in a synthetic generator, so tests
//! and model-less deployments run without media files or a camera.
//!
//! Every source resizes its output to the fixed 854x480 resolution before
//! handing a frame downstream.

pub mod file;
mod mjpeg;
pub mod net;

pub use file::{FileConfig, FileSource};
pub use net::{NetStreamConfig, NetStreamSource, ReconnectPolicy};

use anyhow::Result;

use crate::frame::Frame;

/// Common contract over frame origins.
///
/// `next_frame` never returns end-of-stream: the file variant rewinds and the
/// network variant reconnects. An `Err` from `next_frame` means the source
/// has given up (e.g. reconnect policy exhausted) and the owning pipeline
/// should terminate its stream.
pub trait FrameSource: Send {
    /// Acquire the underlying handle. Must be called before `next_frame`.
    fn open(&mut self) -> Result<()>;

    /// Produce the next frame, blocking as needed.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the underlying handle. Idempotent.
    fn close(&mut self);

    /// Identity for logs and diagnostics.
    fn describe(&self) -> String;

    /// Whether the source currently considers itself able to produce frames.
    fn is_healthy(&self) -> bool;
}
