//! Object detection boundary.
//!
//! The detection model is an opaque external capability: given a frame it
//! returns class ids, confidences, and bounding boxes. Everything else
//! (thresholding, the class taxonomy, error swallowing) lives here so the
//! pipeline never depends on a particular model runtime.

mod backend;
mod backends;
mod classes;
mod detector;
mod result;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::StubBackend;
pub use classes::{class_id_for_violation, classify, ClassInfo, ClassKind};
pub use detector::{Detector, DetectorConfig};
pub use result::{BoundingBox, Detection};
