//! Supervised background task group.
//!
//! Background work runs in two shapes: a periodic worker (the exemption
//! refresher) and short-lived one-shot units (event dispatches). Both are
//! tracked here so shutdown can cancel and join them, and a unit that died is
//! observed in the logs instead of vanishing.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// How finely periodic workers poll the shutdown flag while sleeping.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

pub struct TaskGroup {
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Handle for long-lived loops (e.g. the server accept loop) that want to
    /// observe group shutdown without registering a worker.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Spawn a short-lived unit. Completed units are reaped on the next spawn
    /// so dispatch-per-detection does not accumulate handles.
    pub fn spawn<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(anyhow!("task group is shut down"));
        }
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .map_err(|e| anyhow!("failed to spawn task '{}': {}", name, e))?;

        let mut workers = self
            .workers
            .lock()
            .map_err(|_| anyhow!("task group lock poisoned"))?;
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);
        Ok(())
    }

    /// Spawn a worker that runs `f` every `interval` until shutdown.
    pub fn spawn_periodic<F>(&self, name: &str, interval: Duration, f: F) -> Result<()>
    where
        F: Fn() + Send + 'static,
    {
        let shutdown = Arc::clone(&self.shutdown);
        self.spawn(name, move || {
            while !shutdown.load(Ordering::SeqCst) {
                f();
                let mut slept = Duration::ZERO;
                while slept < interval {
                    if shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                    let step = SHUTDOWN_POLL.min(interval - slept);
                    std::thread::sleep(step);
                    slept += step;
                }
            }
        })
    }

    /// Flip the shutdown flag and join every tracked worker. A worker that
    /// panicked is logged, not propagated.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let workers = match self.workers.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for worker in workers {
            let name = worker.thread().name().unwrap_or("<unnamed>").to_string();
            if worker.join().is_err() {
                log::error!("background task '{}' panicked", name);
            }
        }
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn one_shot_units_run_to_completion() -> Result<()> {
        let group = TaskGroup::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            group.spawn("unit", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })?;
        }
        group.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[test]
    fn periodic_worker_stops_on_shutdown() -> Result<()> {
        let group = TaskGroup::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&ticks);
        group.spawn_periodic("ticker", Duration::from_millis(5), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        })?;

        std::thread::sleep(Duration::from_millis(30));
        group.shutdown();
        let after_shutdown = ticks.load(Ordering::SeqCst);
        assert!(after_shutdown >= 1);

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_shutdown);
        Ok(())
    }

    #[test]
    fn spawn_after_shutdown_is_rejected() {
        let group = TaskGroup::new();
        group.shutdown();
        assert!(group.spawn("late", || {}).is_err());
    }
}
