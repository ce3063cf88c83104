//! Per-connection stream pipeline.
//!
//! Each client connection owns one `Pipeline`: its own source handle, its own
//! debounce state. One `run_step` is one frame: read, detect, classify, drop
//! ignored and exempt classes, maybe dispatch an event, render and encode.
//! The step blocks on source I/O and inference; it never waits on policy
//! refreshes or event dispatch.

use anyhow::{Context, Result};
use std::time::Instant;

use crate::detect::{classify, ClassInfo, ClassKind, Detection, Detector};
use crate::events::{EventDebouncer, EventDispatcher};
use crate::exempt::ExemptionCache;
use crate::ingest::FrameSource;
use crate::render::render_frame;
use std::sync::Arc;

/// Bookkeeping for one running stream instance.
#[derive(Debug, Default)]
pub struct PipelineState {
    pub frames_processed: u64,
    pub events_dispatched: u64,
    pub last_error: Option<String>,
}

pub struct Pipeline {
    source: Box<dyn FrameSource>,
    detector: Detector,
    cache: Arc<ExemptionCache>,
    dispatcher: EventDispatcher,
    debouncer: EventDebouncer,
    jpeg_quality: u8,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Detector,
        cache: Arc<ExemptionCache>,
        dispatcher: EventDispatcher,
        debouncer: EventDebouncer,
        jpeg_quality: u8,
    ) -> Self {
        Self {
            source,
            detector,
            cache,
            dispatcher,
            debouncer,
            jpeg_quality,
            state: PipelineState::default(),
        }
    }

    /// Acquire the source handle. Fails the stream before any frame is sent
    /// when the source cannot open at all.
    pub fn open(&mut self) -> Result<()> {
        self.source
            .open()
            .with_context(|| format!("open source {}", self.source.describe()))
    }

    /// One frame through the whole pipeline; returns the encoded JPEG.
    /// An error means the stream is over (source gave up or encode failed
    /// both ways); the caller should close the connection.
    pub fn run_step(&mut self) -> Result<Vec<u8>> {
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                self.state.last_error = Some(err.to_string());
                return Err(err.context(format!("source {}", self.source.describe())));
            }
        };

        let detections = self.detector.detect(&frame);
        let hits = self.filter(detections, &frame);

        let now = Instant::now();
        for (detection, info) in &hits {
            if self.debouncer.allow(now) {
                self.dispatcher
                    .dispatch(info.kind, info.label, frame.captured_at);
                self.state.events_dispatched += 1;
            } else {
                log::debug!(
                    "debounced {} detection (confidence {:.2})",
                    info.label,
                    detection.confidence
                );
            }
        }

        self.state.frames_processed += 1;
        render_frame(frame, &hits, self.jpeg_quality)
    }

    /// Drop ignored classes outright and violations with an active exemption
    /// window on the frame's capture date. What remains is both rendered and
    /// offered to the debouncer.
    fn filter(
        &self,
        detections: Vec<Detection>,
        frame: &crate::frame::Frame,
    ) -> Vec<(Detection, ClassInfo)> {
        let capture_date = frame.captured_at.date_naive();
        detections
            .into_iter()
            .filter_map(|detection| {
                let info = classify(detection.class_id);
                match info.kind {
                    ClassKind::Ignored => None,
                    ClassKind::Violation if self.cache.is_exempt(detection.class_id, capture_date) => {
                        log::debug!("{} exempt on {}, suppressed", info.label, capture_date);
                        None
                    }
                    _ => Some((detection, info)),
                }
            })
            .collect()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn source_healthy(&self) -> bool {
        self.source.is_healthy()
    }

    pub fn close(&mut self) {
        self.source.close();
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Disconnect, error, or shutdown: the source handle is always released.
        self.source.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, DetectorConfig, StubBackend};
    use crate::events::{LatestEventSlot, LocationTag, MemoryEventSink};
    use crate::exempt::{ExemptionWindow, StaticExemptionStore};
    use crate::ingest::{FileConfig, FileSource};
    use crate::tasks::TaskGroup;
    use chrono::{Datelike, Local};
    use std::time::Duration;

    struct Fixture {
        sink: Arc<MemoryEventSink>,
        slot: Arc<LatestEventSlot>,
        tasks: Arc<TaskGroup>,
        cache: Arc<ExemptionCache>,
    }

    fn fixture() -> Fixture {
        Fixture {
            sink: Arc::new(MemoryEventSink::new()),
            slot: Arc::new(LatestEventSlot::new()),
            tasks: Arc::new(TaskGroup::new()),
            cache: Arc::new(ExemptionCache::new()),
        }
    }

    fn pipeline(fx: &Fixture, script: Vec<Vec<Detection>>, cooldown: Duration) -> Pipeline {
        let source = FileSource::new(FileConfig {
            path: "stub://test".into(),
            target_fps: 0,
        })
        .expect("source");
        let detector = Detector::new(StubBackend::with_script(script), DetectorConfig::default());
        let dispatcher = EventDispatcher::new(
            fx.sink.clone(),
            fx.slot.clone(),
            LocationTag::default(),
            fx.tasks.clone(),
        );
        let mut pipeline = Pipeline::new(
            Box::new(source),
            detector,
            fx.cache.clone(),
            dispatcher,
            EventDebouncer::new(cooldown),
            85,
        );
        pipeline.open().expect("open");
        pipeline
    }

    fn cap(confidence: f32) -> Detection {
        Detection::new(
            1,
            confidence,
            BoundingBox {
                x: 0.2,
                y: 0.2,
                w: 0.4,
                h: 0.4,
            },
        )
    }

    #[test]
    fn rapid_detections_collapse_to_one_event() {
        let fx = fixture();
        // Cap on every frame; frames are far faster than the cooldown.
        let mut p = pipeline(&fx, vec![vec![cap(0.9)]], Duration::from_secs(1));
        for _ in 0..5 {
            p.run_step().expect("step");
        }
        fx.tasks.shutdown();

        let events = fx.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].class_label, "Cap");
        assert_eq!(fx.slot.snapshot().unwrap().event_id, events[0].event_id);
    }

    #[test]
    fn events_resume_after_cooldown() {
        let fx = fixture();
        let mut p = pipeline(&fx, vec![vec![cap(0.9)]], Duration::from_millis(30));
        p.run_step().expect("step");
        std::thread::sleep(Duration::from_millis(40));
        p.run_step().expect("step");
        fx.tasks.shutdown();
        assert_eq!(fx.sink.events().len(), 2);
    }

    #[test]
    fn active_window_suppresses_violation_events() {
        let fx = fixture();
        let today = Local::now().date_naive();
        fx.cache
            .refresh(&StaticExemptionStore::new(vec![ExemptionWindow {
                class_id: 1,
                start_date: today,
                end_date: today,
                label: "Cap".into(),
            }]))
            .expect("refresh");

        let mut p = pipeline(&fx, vec![vec![cap(0.9)]], Duration::from_millis(1));
        for _ in 0..3 {
            p.run_step().expect("step");
        }
        fx.tasks.shutdown();
        assert!(fx.sink.events().is_empty());
        assert!(fx.slot.snapshot().is_none());
    }

    #[test]
    fn window_ending_yesterday_does_not_suppress() {
        let fx = fixture();
        let today = Local::now().date_naive();
        let yesterday = today.pred_opt().expect("yesterday");
        fx.cache
            .refresh(&StaticExemptionStore::new(vec![ExemptionWindow {
                class_id: 1,
                start_date: yesterday.with_day(1).unwrap_or(yesterday),
                end_date: yesterday,
                label: "Cap".into(),
            }]))
            .expect("refresh");

        let mut p = pipeline(&fx, vec![vec![cap(0.9)]], Duration::from_millis(1));
        p.run_step().expect("step");
        fx.tasks.shutdown();
        assert_eq!(fx.sink.events().len(), 1);
    }

    #[test]
    fn ignored_classes_never_reach_the_debouncer() {
        let fx = fixture();
        // Bag at very high confidence on every frame.
        let bag = Detection::new(6, 0.99, BoundingBox::default());
        let mut p = pipeline(&fx, vec![vec![bag]], Duration::from_millis(1));
        for _ in 0..3 {
            p.run_step().expect("step");
        }
        fx.tasks.shutdown();
        assert!(fx.sink.events().is_empty());
        assert_eq!(p.state().events_dispatched, 0);
    }

    #[test]
    fn uniform_sightings_dispatch_as_uniform_kind() {
        let fx = fixture();
        let uniform = Detection::new(3, 0.8, BoundingBox::default());
        let mut p = pipeline(&fx, vec![vec![uniform]], Duration::from_secs(1));
        p.run_step().expect("step");
        fx.tasks.shutdown();

        let events = fx.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ClassKind::Uniform);
        assert_eq!(events[0].class_label, "Uniform A");
    }

    #[test]
    fn detection_below_threshold_is_not_dispatched() {
        let fx = fixture();
        let mut p = pipeline(&fx, vec![vec![cap(0.3)]], Duration::from_millis(1));
        p.run_step().expect("step");
        fx.tasks.shutdown();
        assert!(fx.sink.events().is_empty());
    }
}
