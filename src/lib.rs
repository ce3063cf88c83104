//! Campus dress-code monitoring pipeline.
//!
//! Continuously ingests video from a looping local recording or a
//! reconnecting live camera feed, runs each frame through an object-detection
//! backend, republishes the annotated frames as a live multipart HTTP stream,
//! and surfaces discrete detection events (violations and compliant-uniform
//! sightings) through a polling endpoint.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (looping file, reconnecting network stream)
//! - `detect`: detection boundary (backends, class taxonomy, threshold facade)
//! - `exempt`: exemption policy cache with periodic snapshot refresh
//! - `events`: debouncer, dispatcher, event sinks, latest-event slot
//! - `render`: detection overlays + JPEG encoding
//! - `pipeline`: the per-connection read-detect-filter-render loop
//! - `server`: multipart streaming server and status/polling endpoints
//! - `tasks`: supervised background workers (refresh, dispatch units)
//!
//! Two invariants shape the concurrency model: the frame loop never waits on
//! background work (policy refresh and event dispatch are detached, tracked
//! units), and the outgoing stream is never interrupted by a recoverable
//! fault (source hiccups, inference errors, and encode failures all degrade
//! per-frame instead of propagating).

pub mod config;
pub mod detect;
pub mod events;
pub mod exempt;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod tasks;

pub use config::AppConfig;
pub use detect::{
    classify, BoundingBox, ClassInfo, ClassKind, Detection, Detector, DetectorBackend,
    DetectorConfig, StubBackend,
};
#[cfg(feature = "backend-tract")]
pub use detect::TractBackend;
pub use events::{
    DetectionEvent, EventDebouncer, EventDispatcher, EventSink, HttpEventSink, LatestEventSlot,
    LocationTag, MemoryEventSink,
};
pub use exempt::{
    ExemptionCache, ExemptionStore, ExemptionWindow, HttpExemptionStore, StaticExemptionStore,
};
pub use frame::{Frame, FRAME_HEIGHT, FRAME_WIDTH};
pub use ingest::{
    FileConfig, FileSource, FrameSource, NetStreamConfig, NetStreamSource, ReconnectPolicy,
};
pub use pipeline::{Pipeline, PipelineState};
pub use server::{AppState, Server, ServerHandle};
pub use tasks::TaskGroup;
