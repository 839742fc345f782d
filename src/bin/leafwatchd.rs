//! leafwatchd - live rice-leaf disease detection daemon
//!
//! This daemon:
//! 1. Loads configuration (LEAFWATCH_CONFIG file + environment)
//! 2. Opens the snapshot database
//! 3. Runs the stream session (capture -> detect -> annotate) on its own thread
//! 4. Serves the HTTP control surface
//! 5. Stops both on Ctrl-C

use anyhow::Result;
use std::sync::{mpsc, Arc, Mutex};

use leafwatch::api::{ApiServer, ApiState};
use leafwatch::explain::{ExplanationClient, GeminiClient};
use leafwatch::ingest::open_source;
use leafwatch::transport::{LatestFrame, LatestFrameSink};
use leafwatch::{
    AppConfig, BackendRegistry, FramePipeline, LabelTable, OverlayRenderer, SessionControl,
    SnapshotStore, SqliteSnapshotStore, StreamSession,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = AppConfig::load()?;
    log::info!(
        "leafwatchd {} starting: db={} detector={} stream={}",
        env!("CARGO_PKG_VERSION"),
        cfg.db_path,
        cfg.detector.backend,
        if cfg.stream.enabled {
            cfg.stream.url.as_str()
        } else {
            "disabled"
        }
    );

    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::open(&cfg.db_path)?);
    let labels = Arc::new(LabelTable::load_or_default(cfg.detector.labels_path.as_deref())?);
    log::info!("label table: {} classes", labels.len());

    let registry = BackendRegistry::with_builtin();
    let settings = cfg.detector_settings();
    let renderer = OverlayRenderer::new(cfg.overlay_style());
    let control = Arc::new(SessionControl::new(cfg.session)?);
    let latest_frame = LatestFrame::new();

    let session = if cfg.stream.enabled {
        let source = open_source(
            &cfg.stream.url,
            cfg.stream.target_fps,
            (cfg.stream.width, cfg.stream.height),
        )?;
        let pipeline = FramePipeline::from_registry(
            &registry,
            &settings,
            Arc::clone(&labels),
            renderer.clone(),
        )?;
        let sink = LatestFrameSink::new(latest_frame.clone());
        Some(StreamSession::spawn(
            source,
            Box::new(sink),
            pipeline,
            Arc::clone(&control),
        )?)
    } else {
        log::info!("stream disabled; serving uploads only");
        None
    };

    // Uploads get their own detector instance so they never contend with the stream.
    let upload_pipeline =
        FramePipeline::from_registry(&registry, &settings, Arc::clone(&labels), renderer)?;

    let explainer: Option<Arc<dyn ExplanationClient>> = match cfg.gemini_settings() {
        Some(settings) => Some(Arc::new(GeminiClient::new(settings)?)),
        None => {
            log::warn!("no explanation api key configured; explanations disabled");
            None
        }
    };

    let state = ApiState {
        control: Arc::clone(&control),
        stream: session.as_ref().map(|s| s.detections_view()),
        latest_frame,
        store,
        upload_pipeline: Arc::new(Mutex::new(upload_pipeline)),
        explainer,
    };
    let api_handle = ApiServer::new(cfg.api_addr.clone(), state).spawn()?;
    log::info!("control api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("leafwatchd waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping...");
    if let Some(session) = session {
        let stats = session.stats();
        session.stop()?;
        log::info!(
            "stream session stopped after {} frames ({} detector failures)",
            stats.frames_processed,
            stats.detector_failures
        );
    }
    api_handle.stop()?;

    Ok(())
}
