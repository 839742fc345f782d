use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorSettings;
use crate::explain::{GeminiSettings, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::overlay::{FontSpec, OverlayStyle};
use crate::session::{validate_threshold, ResizeTarget, SessionConfig, DEFAULT_CONFIDENCE_THRESHOLD};

const DEFAULT_DB_PATH: &str = "detections.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8780";
const DEFAULT_STREAM_URL: &str = "stub://camera";
const DEFAULT_STREAM_FPS: u32 = 10;
const DEFAULT_STREAM_WIDTH: u32 = 640;
const DEFAULT_STREAM_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_DETECTOR_TIMEOUT_MS: u64 = 2000;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_FONT_SCALE: u32 = 3;
const DEFAULT_FONT_THICKNESS: u32 = 2;
const MAX_FONT_SCALE: u32 = 16;
const MAX_FONT_THICKNESS: u32 = 16;
const DEFAULT_EXPLAIN_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AppConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    session: Option<SessionConfigFile>,
    overlay: Option<OverlayConfigFile>,
    explain: Option<ExplainConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    enabled: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    labels_path: Option<PathBuf>,
    timeout_ms: Option<u64>,
    iou_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    confidence: Option<f32>,
    resize: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OverlayConfigFile {
    font_scale: Option<u32>,
    font_thickness: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ExplainConfigFile {
    api_key: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub api_addr: String,
    pub stream: StreamSettings,
    pub detector: DetectorConfig,
    pub session: SessionConfig,
    pub overlay: OverlaySettings,
    pub explain: ExplainSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub target_fps: u32,
    /// Frame size for `stub://` sources.
    pub width: u32,
    pub height: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub labels_path: Option<PathBuf>,
    pub timeout_ms: u64,
    pub iou_threshold: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct OverlaySettings {
    pub font_scale: u32,
    pub font_thickness: u32,
}

#[derive(Clone)]
pub struct ExplainSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ExplainSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplainSettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LEAFWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AppConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let stream = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            url: stream.url.unwrap_or_else(|| DEFAULT_STREAM_URL.to_string()),
            target_fps: stream.target_fps.unwrap_or(DEFAULT_STREAM_FPS),
            width: stream.width.unwrap_or(DEFAULT_STREAM_WIDTH),
            height: stream.height.unwrap_or(DEFAULT_STREAM_HEIGHT),
            enabled: stream.enabled.unwrap_or(true),
        };

        let detector = file.detector.unwrap_or_default();
        let detector = DetectorConfig {
            backend: detector
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector.model_path,
            input_width: detector.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: detector.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            labels_path: detector.labels_path,
            timeout_ms: detector.timeout_ms.unwrap_or(DEFAULT_DETECTOR_TIMEOUT_MS),
            iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
        };

        let session_file = file.session.unwrap_or_default();
        let resize = match session_file.resize {
            Some(raw) => raw.parse::<ResizeTarget>()?,
            None => ResizeTarget::default(),
        };
        let session = SessionConfig {
            confidence_threshold: session_file
                .confidence
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            resize,
        };

        let overlay = file.overlay.unwrap_or_default();
        let overlay = OverlaySettings {
            font_scale: overlay.font_scale.unwrap_or(DEFAULT_FONT_SCALE),
            font_thickness: overlay.font_thickness.unwrap_or(DEFAULT_FONT_THICKNESS),
        };

        let explain = file.explain.unwrap_or_default();
        let explain = ExplainSettings {
            api_key: explain.api_key.filter(|key| !key.trim().is_empty()),
            model: explain.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: explain
                .endpoint
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            timeout_secs: explain.timeout_secs.unwrap_or(DEFAULT_EXPLAIN_TIMEOUT_SECS),
        };

        Ok(Self {
            db_path,
            api_addr,
            stream,
            detector,
            session,
            overlay,
            explain,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("LEAFWATCH_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(addr) = std::env::var("LEAFWATCH_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("LEAFWATCH_STREAM_URL") {
            if !url.trim().is_empty() {
                self.stream.url = url;
            }
        }
        if let Ok(backend) = std::env::var("LEAFWATCH_DETECTOR") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(confidence) = std::env::var("LEAFWATCH_CONFIDENCE") {
            self.session.confidence_threshold = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("LEAFWATCH_CONFIDENCE must be a number in [0.25, 1.0]"))?;
        }
        if let Ok(resize) = std::env::var("LEAFWATCH_RESIZE") {
            if !resize.trim().is_empty() {
                self.session.resize = resize.parse()?;
            }
        }
        if let Ok(key) = std::env::var("LEAFWATCH_GEMINI_API_KEY") {
            if !key.trim().is_empty() {
                self.explain.api_key = Some(key.trim().to_string());
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        validate_threshold(self.session.confidence_threshold)?;
        if self.stream.target_fps == 0 {
            return Err(anyhow!("stream.target_fps must be greater than zero"));
        }
        if self.stream.width == 0 || self.stream.height == 0 {
            return Err(anyhow!("stream width and height must be greater than zero"));
        }
        if self.detector.timeout_ms == 0 {
            return Err(anyhow!("detector.timeout_ms must be greater than zero"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            return Err(anyhow!("detector.iou_threshold must be in [0, 1]"));
        }
        if !(1..=MAX_FONT_SCALE).contains(&self.overlay.font_scale) {
            return Err(anyhow!(
                "overlay.font_scale must be in [1, {}]",
                MAX_FONT_SCALE
            ));
        }
        if self.overlay.font_thickness > MAX_FONT_THICKNESS {
            return Err(anyhow!(
                "overlay.font_thickness must be at most {}",
                MAX_FONT_THICKNESS
            ));
        }
        if self.explain.timeout_secs == 0 {
            return Err(anyhow!("explain.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            backend: self.detector.backend.clone(),
            model_path: self.detector.model_path.clone(),
            input_width: self.detector.input_width,
            input_height: self.detector.input_height,
            iou_threshold: self.detector.iou_threshold,
            timeout: Duration::from_millis(self.detector.timeout_ms),
        }
    }

    pub fn overlay_style(&self) -> OverlayStyle {
        OverlayStyle::with_font(FontSpec::new(
            self.overlay.font_scale,
            self.overlay.font_thickness.max(1),
        ))
    }

    /// `None` when no API key is configured.
    pub fn gemini_settings(&self) -> Option<GeminiSettings> {
        self.explain.api_key.as_ref().map(|key| GeminiSettings {
            api_key: key.clone(),
            model: self.explain.model.clone(),
            endpoint: self.explain.endpoint.clone(),
            timeout: Duration::from_secs(self.explain.timeout_secs),
        })
    }
}

fn read_config_file(path: &Path) -> Result<AppConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
