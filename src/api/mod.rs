//! Operator control surface over HTTP.
//!
//! Routes:
//! - `GET /health`
//! - `GET /config`, `POST /config` (`{"confidence_threshold": f32, "resize": "640x480"}`)
//! - `GET /detections/latest`, `GET /stream/latest.jpg`
//! - `POST /detect` (image body, optional `?confidence=`)
//! - `GET /snapshots`, `GET /snapshots/{id}`, `DELETE /snapshots`
//! - `GET /explain?label=`
//! - `GET /report?snapshot=&label=&confidence=`
//!
//! The server thread only accepts; each connection is handled on its own
//! thread, so a slow explanation call never holds up config updates or the
//! live stream routes. A failing request gets an error response and a log
//! line; it never stops the server.

mod http;

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::json;

use crate::analysis::analyze_upload;
use crate::explain::{explain_or_message, ExplanationClient};
use crate::frame::Frame;
use crate::pipeline::FramePipeline;
use crate::report::{build_report, report_file_name, ReportInput};
use crate::session::{DetectionsView, ResizeTarget, SessionControl};
use crate::storage::SnapshotStore;
use crate::transport::LatestFrame;

use http::{read_request, HttpRequest, HttpResponse, RequestError};

/// Shared handles the routes operate on.
#[derive(Clone)]
pub struct ApiState {
    pub control: Arc<SessionControl>,
    /// Live session output; `None` when streaming is disabled.
    pub stream: Option<DetectionsView>,
    pub latest_frame: LatestFrame,
    pub store: Arc<dyn SnapshotStore>,
    /// Detector instance reserved for uploaded images.
    pub upload_pipeline: Arc<Mutex<FramePipeline>>,
    pub explainer: Option<Arc<dyn ExplanationClient>>,
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(addr: impl Into<String>, state: ApiState) -> Self {
        Self {
            addr: addr.into(),
            state,
        }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid api address '{}': {}", self.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let state = self.state;
        let join = std::thread::Builder::new()
            .name("control-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, state, shutdown_thread) {
                    log::error!("control api stopped: {}", err);
                }
            })
            .map_err(|e| anyhow!("failed to spawn api thread: {}", e))?;
        log::info!("control api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(listener: TcpListener, state: ApiState, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let state = state.clone();
                let spawned = std::thread::Builder::new()
                    .name("control-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &state) {
                            log::warn!("api request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::error!("failed to spawn connection thread for {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, state: &ApiState) -> Result<()> {
    stream.set_nonblocking(false)?;
    let response = match read_request(&mut stream) {
        Ok(request) => {
            log::debug!("{} {}", request.method, request.path);
            route(state, &request)
        }
        Err(RequestError::TooLarge) => HttpResponse::error(413, "request_too_large"),
        Err(RequestError::Malformed(err)) => {
            log::warn!("malformed request: {:#}", err);
            HttpResponse::error(400, "bad_request")
        }
    };
    response.write_to(&mut stream)
}

fn route(state: &ApiState, request: &HttpRequest) -> HttpResponse {
    let method = request.method.as_str();
    let path = request.path.trim_end_matches('/');
    let result = match (method, path) {
        ("GET", "/health") => Ok(health(state)),
        ("GET", "/config") => Ok(get_config(state)),
        ("POST", "/config") => Ok(post_config(state, request)),
        ("GET", "/detections/latest") => Ok(latest_detections(state)),
        ("GET", "/stream/latest.jpg") => Ok(latest_frame(state)),
        ("POST", "/detect") => detect_upload(state, request),
        ("GET", "/snapshots") => list_snapshots(state),
        ("DELETE", "/snapshots") => clear_snapshots(state),
        ("GET", "/explain") => Ok(explain(state, request)),
        ("GET", "/report") => report(state, request),
        ("GET", p) if p.starts_with("/snapshots/") => get_snapshot(state, &p["/snapshots/".len()..]),
        (
            _,
            "/health" | "/config" | "/detections/latest" | "/stream/latest.jpg" | "/detect"
            | "/snapshots" | "/explain" | "/report",
        ) => Ok(HttpResponse::error(405, "method_not_allowed")),
        _ => Ok(HttpResponse::error(404, "not_found")),
    };
    result.unwrap_or_else(|err| {
        log::error!("{} {} failed: {:#}", method, path, err);
        HttpResponse::error_detail(500, "internal_error", &format!("{:#}", err))
    })
}

fn health(state: &ApiState) -> HttpResponse {
    let stream = state.stream.as_ref().map(|view| view.stats());
    HttpResponse::json(200, &json!({ "status": "ok", "stream": stream }))
}

fn get_config(state: &ApiState) -> HttpResponse {
    let config = state.control.snapshot();
    HttpResponse::json(
        200,
        &json!({
            "confidence_threshold": config.confidence_threshold,
            "resize": config.resize,
        }),
    )
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigUpdate {
    confidence_threshold: Option<f32>,
    resize: Option<String>,
}

fn post_config(state: &ApiState, request: &HttpRequest) -> HttpResponse {
    let update: ConfigUpdate = match serde_json::from_slice(&request.body) {
        Ok(update) => update,
        Err(err) => return HttpResponse::error_detail(400, "invalid_json", &err.to_string()),
    };
    let resize = match update.resize.as_deref().map(str::parse::<ResizeTarget>) {
        Some(Ok(resize)) => Some(resize),
        Some(Err(err)) => return HttpResponse::error_detail(400, "invalid_resize", &err.to_string()),
        None => None,
    };
    let applied = state.control.update(|config| {
        if let Some(threshold) = update.confidence_threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(resize) = resize {
            config.resize = resize;
        }
    });
    match applied {
        Ok(_) => get_config(state),
        Err(err) => HttpResponse::error_detail(400, "invalid_config", &format!("{:#}", err)),
    }
}

fn latest_detections(state: &ApiState) -> HttpResponse {
    match &state.stream {
        Some(view) => HttpResponse::json(200, &json!(view.latest())),
        None => HttpResponse::error(404, "stream_disabled"),
    }
}

fn latest_frame(state: &ApiState) -> HttpResponse {
    match state.latest_frame.get() {
        Some(jpeg) => HttpResponse::new(200, "image/jpeg", jpeg),
        None => HttpResponse::error(404, "no_frame"),
    }
}

fn detect_upload(state: &ApiState, request: &HttpRequest) -> Result<HttpResponse> {
    if request.body.is_empty() {
        return Ok(HttpResponse::error(400, "empty_body"));
    }
    let threshold = match request.query_param("confidence") {
        Some(raw) => match raw.parse::<f32>() {
            Ok(value) if (0.0..=1.0).contains(&value) => value,
            _ => return Ok(HttpResponse::error(400, "invalid_confidence")),
        },
        None => state.control.snapshot().confidence_threshold,
    };
    let mut pipeline = state
        .upload_pipeline
        .lock()
        .map_err(|_| anyhow!("upload pipeline lock poisoned"))?;
    let analysis = match analyze_upload(
        &mut pipeline,
        Some(state.store.as_ref()),
        &request.body,
        threshold,
        None,
    ) {
        Ok(analysis) => analysis,
        Err(err) => return Ok(HttpResponse::error_detail(422, "undecodable_image", &format!("{:#}", err))),
    };
    Ok(HttpResponse::json(
        200,
        &json!({
            "detections": analysis.detections,
            "snapshot_id": analysis.snapshot_id,
            "store_error": analysis.store_error,
            "detector_error": analysis.detector_error,
        }),
    ))
}

fn list_snapshots(state: &ApiState) -> Result<HttpResponse> {
    match state.store.list_meta() {
        Ok(meta) => Ok(HttpResponse::json(200, &json!(meta))),
        Err(err) => {
            log::error!("listing snapshots failed: {:#}", err);
            Ok(HttpResponse::error_detail(503, "store_unavailable", &format!("{:#}", err)))
        }
    }
}

fn get_snapshot(state: &ApiState, raw_id: &str) -> Result<HttpResponse> {
    let Ok(id) = raw_id.parse::<i64>() else {
        return Ok(HttpResponse::error(400, "invalid_snapshot_id"));
    };
    match state.store.get(id)? {
        Some(snapshot) => Ok(HttpResponse::new(200, "image/png", snapshot.image)),
        None => Ok(HttpResponse::error(404, "snapshot_not_found")),
    }
}

fn clear_snapshots(state: &ApiState) -> Result<HttpResponse> {
    match state.store.clear() {
        Ok(removed) => Ok(HttpResponse::json(200, &json!({ "removed": removed }))),
        Err(err) => {
            log::error!("clearing snapshots failed: {:#}", err);
            Ok(HttpResponse::error_detail(503, "store_unavailable", &format!("{:#}", err)))
        }
    }
}

fn explain(state: &ApiState, request: &HttpRequest) -> HttpResponse {
    let Some(label) = request.query_param("label").filter(|l| !l.trim().is_empty()) else {
        return HttpResponse::error(400, "missing_label");
    };
    let text = explain_or_message(state.explainer.as_deref(), label);
    HttpResponse::new(200, "text/plain; charset=utf-8", text.into_bytes())
}

fn report(state: &ApiState, request: &HttpRequest) -> Result<HttpResponse> {
    let Some(id) = request
        .query_param("snapshot")
        .and_then(|raw| raw.parse::<i64>().ok())
    else {
        return Ok(HttpResponse::error(400, "missing_snapshot"));
    };
    let Some(label) = request.query_param("label").filter(|l| !l.trim().is_empty()) else {
        return Ok(HttpResponse::error(400, "missing_label"));
    };
    let confidence = match request.query_param("confidence").map(str::parse::<f32>) {
        Some(Ok(value)) if (0.0..=1.0).contains(&value) => value,
        _ => return Ok(HttpResponse::error(400, "invalid_confidence")),
    };
    let Some(snapshot) = state.store.get(id)? else {
        return Ok(HttpResponse::error(404, "snapshot_not_found"));
    };
    let image = Frame::decode(&snapshot.image)?;
    let explanation = explain_or_message(state.explainer.as_deref(), label);
    let generated_at = chrono::Local::now().naive_local();
    let pdf = build_report(&ReportInput {
        image: &image,
        label,
        confidence,
        explanation: &explanation,
        generated_at,
    })?;
    let file_name = report_file_name(label, generated_at);
    Ok(HttpResponse::new(200, "application/pdf", pdf).with_header(
        "Content-Disposition",
        format!("attachment; filename=\"{}\"", file_name),
    ))
}
