use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde_json::Value;

use leafwatch::api::{ApiHandle, ApiServer, ApiState};
use leafwatch::detect::{StubBackend, StubBehavior};
use leafwatch::explain::ExplanationClient;
use leafwatch::ingest::SyntheticSource;
use leafwatch::storage::InMemorySnapshotStore;
use leafwatch::transport::{LatestFrame, LatestFrameSink};
use leafwatch::{
    Frame, FramePipeline, LabelTable, OverlayRenderer, RawDetection, SessionConfig,
    SessionControl, SessionHandle, SnapshotStore, StreamSession,
};

struct CannedExplainer;

impl ExplanationClient for CannedExplainer {
    fn explain(&self, disease_label: &str) -> Result<String> {
        Ok(format!(
            "EXPLANATION:\n{disease_label} is a fungal disease.\n\nIMPACT:\nYield loss.\n\nTREATMENT RECOMMENDATIONS:\n1. Remove infected leaves."
        ))
    }
}

struct SlowExplainer(Duration);

impl ExplanationClient for SlowExplainer {
    fn explain(&self, disease_label: &str) -> Result<String> {
        std::thread::sleep(self.0);
        Ok(format!("{disease_label}: eventually."))
    }
}

struct Response {
    head: String,
    body: Vec<u8>,
}

impl Response {
    fn json(&self) -> Result<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn read_response(stream: &mut TcpStream) -> Result<Response> {
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw)?;
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| anyhow!("response without header terminator"))?;
    Ok(Response {
        head: String::from_utf8_lossy(&raw[..split]).into_owned(),
        body: raw[split + 4..].to_vec(),
    })
}

struct TestApi {
    store: Arc<InMemorySnapshotStore>,
    control: Arc<SessionControl>,
    session: Option<SessionHandle>,
    api_handle: Option<ApiHandle>,
}

fn request_at(addr: SocketAddr, method: &str, target: &str, body: &[u8]) -> Result<Response> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let head = format!(
        "{method} {target} HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    read_response(&mut stream)
}

impl TestApi {
    fn new(with_stream: bool) -> Result<Self> {
        Self::with_explainer(with_stream, Arc::new(CannedExplainer))
    }

    fn with_explainer(with_stream: bool, explainer: Arc<dyn ExplanationClient>) -> Result<Self> {
        let labels = Arc::new(LabelTable::rice_defaults());
        let store = Arc::new(InMemorySnapshotStore::new());
        let control = Arc::new(SessionControl::new(SessionConfig::default())?);
        let latest_frame = LatestFrame::new();

        let session = if with_stream {
            let source = SyntheticSource::new("stub://camera?fps=20", 160, 120, 20)?;
            let pipeline = FramePipeline::new(
                Box::new(StubBackend::new(StubBehavior::Relative(vec![
                    RawDetection::new(2, 0.7, [0.2, 0.2, 0.6, 0.6]),
                ]))),
                Arc::clone(&labels),
                OverlayRenderer::default(),
            );
            Some(StreamSession::spawn(
                Box::new(source),
                Box::new(LatestFrameSink::new(latest_frame.clone())),
                pipeline,
                Arc::clone(&control),
            )?)
        } else {
            None
        };

        let upload_pipeline = FramePipeline::new(
            Box::new(StubBackend::fixed(vec![
                RawDetection::new(1, 0.9, [10.0, 10.0, 100.0, 100.0]),
                RawDetection::new(5, 0.2, [0.0, 0.0, 20.0, 20.0]),
            ])),
            labels,
            OverlayRenderer::default(),
        );
        let shared_store: Arc<dyn SnapshotStore> = store.clone();
        let state = ApiState {
            control: Arc::clone(&control),
            stream: session.as_ref().map(|s| s.detections_view()),
            latest_frame,
            store: shared_store,
            upload_pipeline: Arc::new(Mutex::new(upload_pipeline)),
            explainer: Some(explainer),
        };
        let api_handle = ApiServer::new("127.0.0.1:0", state).spawn()?;
        Ok(Self {
            store,
            control,
            session,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> Result<SocketAddr> {
        Ok(self
            .api_handle
            .as_ref()
            .ok_or_else(|| anyhow!("api stopped"))?
            .addr)
    }

    fn request(&self, method: &str, target: &str, body: &[u8]) -> Result<Response> {
        request_at(self.addr()?, method, target, body)
    }

    fn get(&self, target: &str) -> Result<Response> {
        self.request("GET", target, &[])
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
        if let Some(session) = self.session.take() {
            let _ = session.stop();
        }
    }
}

fn leaf_png() -> Result<Vec<u8>> {
    Frame::filled(320, 240, [46, 139, 60]).encode_png()
}

#[test]
fn health_reports_ok_without_stream() -> Result<()> {
    let api = TestApi::new(false)?;
    let response = api.get("/health")?;
    assert!(response.head.starts_with("HTTP/1.1 200 OK"));
    let value = response.json()?;
    assert_eq!(value["status"], "ok");
    assert!(value["stream"].is_null());

    let latest = api.get("/detections/latest")?;
    assert!(latest.head.starts_with("HTTP/1.1 404"));
    assert_eq!(latest.json()?["error"], "stream_disabled");
    Ok(())
}

#[test]
fn config_updates_apply_and_invalid_values_are_rejected() -> Result<()> {
    let api = TestApi::new(false)?;

    let initial = api.get("/config")?.json()?;
    assert_eq!(initial["resize"], "640x480");

    let updated = api.request(
        "POST",
        "/config",
        br#"{"confidence_threshold": 0.5, "resize": "320x240"}"#,
    )?;
    assert!(updated.head.starts_with("HTTP/1.1 200 OK"));
    let value = updated.json()?;
    assert_eq!(value["resize"], "320x240");
    assert!((value["confidence_threshold"].as_f64().unwrap_or(0.0) - 0.5).abs() < 1e-6);
    assert!((api.control.snapshot().confidence_threshold - 0.5).abs() < f32::EPSILON);

    let too_low = api.request("POST", "/config", br#"{"confidence_threshold": 0.1}"#)?;
    assert!(too_low.head.starts_with("HTTP/1.1 400"));
    let bad_resize = api.request("POST", "/config", br#"{"resize": "1024x768"}"#)?;
    assert!(bad_resize.head.starts_with("HTTP/1.1 400"));
    let unknown = api.request("POST", "/config", br#"{"threshold": 0.5}"#)?;
    assert!(unknown.head.starts_with("HTTP/1.1 400"));

    // Rejected updates leave the previous settings in place.
    let current = api.control.snapshot();
    assert!((current.confidence_threshold - 0.5).abs() < f32::EPSILON);
    assert_eq!(current.resize.as_str(), "320x240");
    Ok(())
}

#[test]
fn upload_detects_saves_and_serves_snapshot() -> Result<()> {
    let api = TestApi::new(false)?;

    let response = api.request("POST", "/detect?confidence=0.3", &leaf_png()?)?;
    assert!(response.head.starts_with("HTTP/1.1 200 OK"));
    let value = response.json()?;
    let detections = value["detections"]
        .as_array()
        .ok_or_else(|| anyhow!("detections missing"))?;
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0]["class_label"], "Brown Spot");
    assert_eq!(detections[0]["box"]["x2"], 100);
    assert!(value["detector_error"].is_null());
    let id = value["snapshot_id"]
        .as_i64()
        .ok_or_else(|| anyhow!("snapshot id missing"))?;

    let listed = api.get("/snapshots")?.json()?;
    assert_eq!(listed[0]["id"], id);

    let snapshot = api.get(&format!("/snapshots/{id}"))?;
    assert!(snapshot.head.contains("Content-Type: image/png"));
    let annotated = Frame::decode(&snapshot.body)?;
    assert_eq!((annotated.width(), annotated.height()), (320, 240));

    let missing = api.get("/snapshots/9999")?;
    assert!(missing.head.starts_with("HTTP/1.1 404"));

    let cleared = api.request("DELETE", "/snapshots", &[])?.json()?;
    assert_eq!(cleared["removed"], 1);
    assert!(api.store.list()?.is_empty());
    Ok(())
}

#[test]
fn upload_rejects_empty_and_undecodable_bodies() -> Result<()> {
    let api = TestApi::new(false)?;
    let empty = api.request("POST", "/detect", &[])?;
    assert!(empty.head.starts_with("HTTP/1.1 400"));
    assert_eq!(empty.json()?["error"], "empty_body");

    let garbage = api.request("POST", "/detect", b"definitely not an image")?;
    assert!(garbage.head.starts_with("HTTP/1.1 422"));
    assert!(api.store.list()?.is_empty());
    Ok(())
}

#[test]
fn explain_and_report_use_the_explainer() -> Result<()> {
    let api = TestApi::new(false)?;

    let missing = api.get("/explain")?;
    assert!(missing.head.starts_with("HTTP/1.1 400"));

    let explanation = api.get("/explain?label=Leaf%20Blast")?;
    assert!(explanation.head.contains("Content-Type: text/plain"));
    assert!(explanation.text().contains("Leaf Blast is a fungal disease"));

    let id = api.store.save("2026-01-01 08:00:00", &leaf_png()?)?;
    let report = api.get(&format!(
        "/report?snapshot={id}&label=Leaf%20Blast&confidence=0.87"
    ))?;
    assert!(report.head.starts_with("HTTP/1.1 200 OK"));
    assert!(report.head.contains("Content-Type: application/pdf"));
    assert!(report.head.contains("Content-Disposition: attachment; filename=\""));
    assert!(report.body.starts_with(b"%PDF-"));

    let bad_confidence = api.get(&format!("/report?snapshot={id}&label=Tungro&confidence=2"))?;
    assert!(bad_confidence.head.starts_with("HTTP/1.1 400"));
    let unknown_snapshot = api.get("/report?snapshot=404&label=Tungro&confidence=0.5")?;
    assert!(unknown_snapshot.head.starts_with("HTTP/1.1 404"));
    Ok(())
}

#[test]
fn report_file_name_cannot_inject_headers() -> Result<()> {
    let api = TestApi::new(false)?;
    let id = api.store.save("2026-01-01 08:00:00", &leaf_png()?)?;
    let report = api.get(&format!(
        "/report?snapshot={id}&label=x%0d%0aSet-Cookie:%20a=b&confidence=0.5"
    ))?;
    assert!(report.head.starts_with("HTTP/1.1 200 OK"));
    let header_lines: Vec<&str> = report.head.split("\r\n").collect();
    assert_eq!(
        header_lines
            .iter()
            .filter(|line| line.starts_with("Content-Disposition:"))
            .count(),
        1
    );
    assert!(!header_lines.iter().any(|line| line.starts_with("Set-Cookie")));
    assert!(report.head.contains("filename=\"detection_x__Set-Cookie__a_b_"));
    Ok(())
}

#[test]
fn slow_explanation_does_not_hold_up_config_requests() -> Result<()> {
    let api = TestApi::with_explainer(false, Arc::new(SlowExplainer(Duration::from_secs(3))))?;
    let addr = api.addr()?;
    let explain = std::thread::spawn(move || request_at(addr, "GET", "/explain?label=Tungro", &[]));
    std::thread::sleep(Duration::from_millis(300));

    let started = Instant::now();
    let config = api.get("/config")?;
    assert!(config.head.starts_with("HTTP/1.1 200 OK"));
    assert!(started.elapsed() < Duration::from_secs(2));

    let explanation = explain
        .join()
        .map_err(|_| anyhow!("explain request thread panicked"))??;
    assert_eq!(explanation.text(), "Tungro: eventually.");
    Ok(())
}

#[test]
fn unknown_paths_and_methods_are_rejected() -> Result<()> {
    let api = TestApi::new(false)?;
    assert!(api.get("/nope")?.head.starts_with("HTTP/1.1 404"));
    assert!(api
        .request("PUT", "/config", b"{}")?
        .head
        .starts_with("HTTP/1.1 405"));
    assert!(api
        .request("DELETE", "/health", &[])?
        .head
        .starts_with("HTTP/1.1 405"));
    Ok(())
}

#[test]
fn live_stream_exposes_detections_and_latest_frame() -> Result<()> {
    let api = TestApi::new(true)?;

    let mut frame = None;
    for _ in 0..100 {
        let response = api.get("/stream/latest.jpg")?;
        if response.head.starts_with("HTTP/1.1 200") {
            frame = Some(response);
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let frame = frame.ok_or_else(|| anyhow!("no frame published"))?;
    assert!(frame.head.contains("Content-Type: image/jpeg"));
    let decoded = Frame::decode(&frame.body)?;
    assert_eq!((decoded.width(), decoded.height()), (160, 120));

    // Detections and stats are published just after the frame.
    let mut latest = Value::Null;
    let mut frames_processed = 0;
    for _ in 0..100 {
        latest = api.get("/detections/latest")?.json()?;
        let health = api.get("/health")?.json()?;
        frames_processed = health["stream"]["frames_processed"].as_u64().unwrap_or(0);
        if latest[0].is_object() && frames_processed >= 1 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(latest[0]["class_label"], "Leaf Blast");
    assert!(frames_processed >= 1);
    Ok(())
}
