//! campuswatchd - dress-code monitoring daemon
//!
//! Startup order matters: a source or model that cannot be opened is fatal
//! before the listener binds, so the process never serves traffic it cannot
//! back with frames.
//!
//! 1. Load configuration (file + env)
//! 2. Build the detector (fatal on model load failure)
//! 3. Probe the recording source (fatal if missing or undecodable)
//! 4. Start the exemption refresher and the HTTP server
//! 5. Wait for Ctrl-C, then shut down server and background tasks in order

use anyhow::Result;
use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};

use campuswatch::{
    AppConfig, AppState, Detector, DetectorConfig, EventSink, ExemptionCache, ExemptionStore,
    FileSource, FrameSource, HttpEventSink, HttpExemptionStore, LatestEventSlot, MemoryEventSink,
    Server, StaticExemptionStore, StubBackend, TaskGroup,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load()?;
    log::info!("campuswatchd {} starting", env!("CARGO_PKG_VERSION"));

    let detector = build_detector(&config)?;
    log::info!(
        "detector '{}' ready on {} (accelerated: {})",
        detector.name(),
        detector.device_name(),
        detector.is_accelerated()
    );

    // Startup probe: the recording must open now, not on first request.
    let mut probe = FileSource::new(config.video.clone())?;
    probe.open()?;
    probe.close();
    log::info!("recording source {} validated", config.video.path);

    let tasks = Arc::new(TaskGroup::new());
    let cache = Arc::new(ExemptionCache::new());
    let slot = Arc::new(LatestEventSlot::new());

    let sink: Arc<dyn EventSink> = match &config.event_log_url {
        Some(url) => Arc::new(HttpEventSink::new(url.clone())),
        None => {
            log::warn!("no event log configured; events kept in memory only");
            Arc::new(MemoryEventSink::new())
        }
    };

    let store: Arc<dyn ExemptionStore> = match &config.exemption_store_url {
        Some(url) => Arc::new(HttpExemptionStore::new(url.clone())),
        None => {
            log::warn!("no exemption store configured; no classes will be exempt");
            Arc::new(StaticExemptionStore::empty())
        }
    };

    // First refresh happens before traffic; a failure here is not fatal, the
    // cache simply starts empty and the refresher keeps trying.
    let refresh_cache = Arc::clone(&cache);
    let refresh_store = Arc::clone(&store);
    match refresh_cache.refresh(refresh_store.as_ref()) {
        Ok(count) => log::info!("exemption cache primed with {} windows", count),
        Err(err) => log::warn!("initial exemption refresh failed: {}", err),
    }
    tasks.spawn_periodic("exemption-refresh", config.refresh_interval, move || {
        match refresh_cache.refresh(refresh_store.as_ref()) {
            Ok(count) => log::debug!("exemption cache refreshed: {} windows", count),
            Err(err) => log::warn!("exemption refresh failed, keeping snapshot: {}", err),
        }
    })?;

    let state = Arc::new(AppState {
        config: config.clone(),
        detector,
        cache,
        slot,
        sink,
        tasks: Arc::clone(&tasks),
        file_source_open: AtomicBool::new(true),
        stream_source_open: AtomicBool::new(true),
    });

    let server = Server::new(Arc::clone(&state)).spawn()?;
    log::info!("listening on http://{}", server.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("campuswatchd running; Ctrl-C to stop");
    let _ = rx.recv();
    log::info!("shutdown signal received");

    server.stop()?;
    tasks.shutdown();
    log::info!("campuswatchd stopped");
    Ok(())
}

fn build_detector(config: &AppConfig) -> Result<Detector> {
    let detector_config = DetectorConfig {
        confidence_threshold: config.confidence_threshold,
        max_detections: config.max_detections,
    };

    match &config.model_path {
        #[cfg(feature = "backend-tract")]
        Some(path) => {
            use campuswatch::DetectorBackend;
            let mut backend = campuswatch::TractBackend::new(
                path,
                campuswatch::FRAME_WIDTH,
                campuswatch::FRAME_HEIGHT,
            )?;
            backend.warm_up()?;
            Ok(Detector::new(backend, detector_config))
        }
        #[cfg(not(feature = "backend-tract"))]
        Some(path) => Err(anyhow::anyhow!(
            "model_path '{}' configured but the backend-tract feature is not enabled",
            path
        )),
        None => {
            log::warn!("no model configured; running the stub detector");
            Ok(Detector::new(StubBackend::new(), detector_config))
        }
    }
}
