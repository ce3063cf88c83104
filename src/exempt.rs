//! Exemption policy cache.
//!
//! The policy store configures date windows during which a violation class is
//! approved and must not generate events (spirit weeks, themed days). The
//! cache holds an immutable snapshot of those windows; a background refresher
//! rebuilds the whole snapshot on an interval and swaps it in atomically.
//! Readers clone the current `Arc` under a short read lock and never observe
//! a partially built snapshot. A failed refresh keeps the last-known-good
//! snapshot: a store outage must not flicker the policy to "nothing exempt".

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::detect::class_id_for_violation;

/// Date format used by the policy store wire format.
pub const STORE_DATE_FORMAT: &str = "%m-%d-%Y";

/// A period during which one violation class is policy-approved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExemptionWindow {
    pub class_id: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub label: String,
}

impl ExemptionWindow {
    /// Inclusive on both ends.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

/// Row shape returned by the policy store.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireExemption {
    status: String,
    dress_code: String,
    start_date: String,
    end_date: String,
}

/// Read access to the external policy store.
pub trait ExemptionStore: Send + Sync {
    fn fetch_windows(&self) -> Result<Vec<ExemptionWindow>>;
}

/// Policy store reached over HTTP, returning a JSON array of wire rows.
pub struct HttpExemptionStore {
    url: String,
}

impl HttpExemptionStore {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ExemptionStore for HttpExemptionStore {
    fn fetch_windows(&self) -> Result<Vec<ExemptionWindow>> {
        let rows: Vec<WireExemption> = ureq::get(&self.url)
            .call()
            .with_context(|| format!("query exemption store {}", self.url))?
            .into_json()
            .context("parse exemption store response")?;
        Ok(parse_wire_rows(rows))
    }
}

/// Fixed in-memory store for tests and store-less deployments.
pub struct StaticExemptionStore {
    windows: Vec<ExemptionWindow>,
}

impl StaticExemptionStore {
    pub fn new(windows: Vec<ExemptionWindow>) -> Self {
        Self { windows }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
}

impl ExemptionStore for StaticExemptionStore {
    fn fetch_windows(&self) -> Result<Vec<ExemptionWindow>> {
        Ok(self.windows.clone())
    }
}

/// Only rows the store marks "Allowed" are active policy; everything else
/// (pending, revoked, malformed) is skipped. Malformed rows are logged so a
/// misconfigured store is diagnosable.
fn parse_wire_rows(rows: Vec<WireExemption>) -> Vec<ExemptionWindow> {
    let mut windows = Vec::new();
    for row in rows {
        if row.status != "Allowed" {
            continue;
        }
        let Some(class_id) = class_id_for_violation(&row.dress_code) else {
            log::warn!(
                "exemption store: unknown dress code '{}', skipping",
                row.dress_code
            );
            continue;
        };
        let start = NaiveDate::parse_from_str(&row.start_date, STORE_DATE_FORMAT);
        let end = NaiveDate::parse_from_str(&row.end_date, STORE_DATE_FORMAT);
        match (start, end) {
            (Ok(start_date), Ok(end_date)) if start_date <= end_date => {
                windows.push(ExemptionWindow {
                    class_id,
                    start_date,
                    end_date,
                    label: row.dress_code,
                });
            }
            _ => {
                log::warn!(
                    "exemption store: bad window dates '{}'..'{}' for '{}', skipping",
                    row.start_date,
                    row.end_date,
                    row.dress_code
                );
            }
        }
    }
    windows
}

type Snapshot = HashMap<u32, ExemptionWindow>;

/// Atomically swappable snapshot of the active exemption windows.
pub struct ExemptionCache {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ExemptionCache {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Whether `class_id` is exempt on `date`. Lock-free against the snapshot
    /// contents; the read lock is held only long enough to clone the `Arc`.
    pub fn is_exempt(&self, class_id: u32, date: NaiveDate) -> bool {
        let snapshot = match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        };
        snapshot
            .get(&class_id)
            .map(|window| window.contains(date))
            .unwrap_or(false)
    }

    /// Rebuild the snapshot from the store and swap it in whole. On store
    /// failure the previous snapshot stays active.
    pub fn refresh(&self, store: &dyn ExemptionStore) -> Result<usize> {
        let windows = store.fetch_windows()?;
        let mut next: Snapshot = HashMap::with_capacity(windows.len());
        // Later rows win on class-id conflict: refresh is replace, not merge.
        for window in windows {
            next.insert(window.class_id, window);
        }
        let count = next.len();
        let next = Arc::new(next);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(count)
    }

    pub fn window_count(&self) -> usize {
        match self.snapshot.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for ExemptionCache {
    fn default() -> Self {
        Self::new()
    }
}
