//! Event debouncing and dispatch.
//!
//! Per-frame detections are noisy; the debouncer collapses them into discrete
//! events by enforcing one cooldown per pipeline instance (a violation and a
//! uniform sighting contend for the same slot). A detection that clears the
//! cooldown becomes a `DetectionEvent`, dispatched as a fire-and-forget unit
//! so event construction and the durable append never delay frame delivery.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::detect::ClassKind;
use crate::tasks::TaskGroup;

/// Where the reporting camera is mounted.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocationTag {
    pub building_number: u32,
    pub floor_number: u32,
    pub camera_number: u32,
}

impl Default for LocationTag {
    fn default() -> Self {
        Self {
            building_number: 1,
            floor_number: 1,
            camera_number: 1,
        }
    }
}

/// Discrete detection record. Immutable once built; its only destinations
/// are the external event log and the in-memory latest-event slot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionEvent {
    pub event_id: String,
    pub kind: ClassKind,
    pub class_label: String,
    pub location_tag: LocationTag,
    /// MM-DD-YYYY
    pub date: String,
    /// HH:MM:SS
    pub time: String,
}

impl DetectionEvent {
    pub fn new(
        kind: ClassKind,
        class_label: &str,
        location_tag: LocationTag,
        at: DateTime<Local>,
    ) -> Self {
        Self {
            event_id: generate_event_id(at),
            kind,
            class_label: class_label.to_string(),
            location_tag,
            date: at.format("%m-%d-%Y").to_string(),
            time: at.format("%H:%M:%S").to_string(),
        }
    }
}

/// Event log keys look like `VIO083025QKZR`: a fixed prefix, the date, and
/// four random uppercase letters for collision resistance within a day.
pub fn generate_event_id(at: DateTime<Local>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| char::from(rng.gen_range(b'A'..=b'Z')))
        .collect();
    format!("VIO{}{}", at.format("%m%d%y"), suffix)
}

/// One cooldown slot per pipeline instance, shared by every class.
pub struct EventDebouncer {
    cooldown: Duration,
    last_dispatch: Option<Instant>,
}

impl EventDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_dispatch: None,
        }
    }

    /// Returns true (and arms the cooldown) when a dispatch is allowed now.
    pub fn allow(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_dispatch {
            if now.duration_since(last) < self.cooldown {
                return false;
            }
        }
        self.last_dispatch = Some(now);
        true
    }
}

/// Durable destination for dispatched events.
pub trait EventSink: Send + Sync {
    fn append(&self, event: &DetectionEvent) -> Result<()>;
}

/// Append-only event log reached over HTTP.
pub struct HttpEventSink {
    url: String,
}

impl HttpEventSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl EventSink for HttpEventSink {
    fn append(&self, event: &DetectionEvent) -> Result<()> {
        ureq::post(&self.url)
            .send_json(event)
            .with_context(|| format!("append event {} to {}", event.event_id, self.url))?;
        Ok(())
    }
}

/// In-memory sink for tests and log-less deployments.
pub struct MemoryEventSink {
    events: Mutex<Vec<DetectionEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<DetectionEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for MemoryEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemoryEventSink {
    fn append(&self, event: &DetectionEvent) -> Result<()> {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        Ok(())
    }
}

/// Process-wide latest-event slot consulted by the polling endpoint.
/// Concurrent dispatch units race here; last write wins, which is fine
/// because only the most recent event is ever exposed.
pub struct LatestEventSlot {
    latest: Mutex<Option<DetectionEvent>>,
}

impl LatestEventSlot {
    pub fn new() -> Self {
        Self {
            latest: Mutex::new(None),
        }
    }

    pub fn publish(&self, event: DetectionEvent) {
        match self.latest.lock() {
            Ok(mut guard) => *guard = Some(event),
            Err(poisoned) => *poisoned.into_inner() = Some(event),
        }
    }

    pub fn snapshot(&self) -> Option<DetectionEvent> {
        match self.latest.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Default for LatestEventSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds events and hands them to the task group as short-lived units.
#[derive(Clone)]
pub struct EventDispatcher {
    sink: Arc<dyn EventSink>,
    slot: Arc<LatestEventSlot>,
    location: LocationTag,
    tasks: Arc<TaskGroup>,
}

impl EventDispatcher {
    pub fn new(
        sink: Arc<dyn EventSink>,
        slot: Arc<LatestEventSlot>,
        location: LocationTag,
        tasks: Arc<TaskGroup>,
    ) -> Self {
        Self {
            sink,
            slot,
            location,
            tasks,
        }
    }

    /// Fire-and-forget: the frame loop returns immediately; the unit writes
    /// the polling slot first, then the durable log. A log failure keeps the
    /// slot write and is only logged.
    pub fn dispatch(&self, kind: ClassKind, class_label: &str, at: DateTime<Local>) {
        let event = DetectionEvent::new(kind, class_label, self.location, at);
        let sink = Arc::clone(&self.sink);
        let slot = Arc::clone(&self.slot);
        let spawned = self.tasks.spawn("event-dispatch", move || {
            log::info!(
                "dispatching {:?} event {} ({})",
                event.kind,
                event.event_id,
                event.class_label
            );
            slot.publish(event.clone());
            if let Err(err) = sink.append(&event) {
                log::error!("event log append failed for {}: {}", event.event_id, err);
            }
        });
        if let Err(err) = spawned {
            log::warn!("event dispatch dropped: {}", err);
        }
    }
}
