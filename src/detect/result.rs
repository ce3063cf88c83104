/// Bounding box in normalized 0..1 coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// A single raw detection produced by a backend for one frame.
///
/// Detections are never persisted; they either become a `DetectionEvent`
/// through the debouncer or are dropped with the frame.
#[derive(Clone, Debug)]
pub struct Detection {
    pub class_id: u32,
    /// 0..=1
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}
