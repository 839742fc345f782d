//! leafscan - one-shot disease detection on an image file

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use leafwatch::detect::format_confidence;
use leafwatch::explain::{
    explain_or_message, ExplanationClient, GeminiClient, GeminiSettings, DEFAULT_ENDPOINT,
    DEFAULT_MODEL,
};
use leafwatch::report::{build_report, report_file_name, ReportInput};
use leafwatch::{
    analyze_upload, BackendRegistry, DetectorSettings, FramePipeline, LabelTable,
    OverlayRenderer, ResizeTarget, SnapshotStore, SqliteSnapshotStore,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Image to analyze (jpg, png, bmp, webp).
    image: PathBuf,
    /// Where to write the annotated image (PNG).
    #[arg(long, short, default_value = "annotated.png")]
    output: PathBuf,
    /// Minimum confidence for a detection to be kept, in [0, 1].
    #[arg(long, default_value_t = 0.30)]
    confidence: f32,
    /// Inference resolution (Original|640x480|480x360|320x240).
    #[arg(long, default_value = "Original")]
    resize: ResizeTarget,
    /// Detector backend.
    #[arg(long, env = "LEAFWATCH_DETECTOR", default_value = "stub")]
    detector: String,
    /// Model file for model-backed detectors.
    #[arg(long)]
    model: Option<PathBuf>,
    /// Class labels, one per line (defaults to the built-in rice-leaf list).
    #[arg(long)]
    labels: Option<PathBuf>,
    /// Per-call detector timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    timeout_ms: u64,
    /// Save the annotated image as a snapshot in this database.
    #[arg(long, value_name = "DB")]
    save: Option<PathBuf>,
    /// Write a PDF report for the top detection into this directory.
    #[arg(long, value_name = "DIR")]
    report: Option<PathBuf>,
    /// API key for disease explanations (used by --report).
    #[arg(long, env = "LEAFWATCH_GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if !(0.0..=1.0).contains(&args.confidence) {
        return Err(anyhow!("--confidence must be in [0, 1]"));
    }
    let ui = ui::Ui::new(
        ui::UiMode::parse(&args.ui),
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );

    let mut pipeline = {
        let mut stage = ui.stage("load detector");
        let labels = Arc::new(LabelTable::load_or_default(args.labels.as_deref())?);
        let settings = DetectorSettings {
            backend: args.detector.clone(),
            model_path: args.model.clone(),
            timeout: Duration::from_millis(args.timeout_ms.max(1)),
            ..DetectorSettings::default()
        };
        let pipeline = FramePipeline::from_registry(
            &BackendRegistry::with_builtin(),
            &settings,
            labels,
            OverlayRenderer::default(),
        )?;
        stage.detail(pipeline.detector_name());
        pipeline
    };

    let store = match &args.save {
        Some(db_path) => Some(SqliteSnapshotStore::open(db_path)?),
        None => None,
    };

    let analysis = {
        let mut stage = ui.stage("detect");
        let bytes = std::fs::read(&args.image)
            .with_context(|| format!("read {}", args.image.display()))?;
        let analysis = analyze_upload(
            &mut pipeline,
            store.as_ref().map(|s| s as &dyn SnapshotStore),
            &bytes,
            args.confidence,
            args.resize.dims(),
        )
        .with_context(|| format!("decode {}", args.image.display()))?;
        match &analysis.detector_error {
            Some(err) => stage.fail(err.clone()),
            None => stage.detail(format!("{} detections", analysis.detections.len())),
        }
        analysis
    };

    {
        let _stage = ui.stage("write annotated image");
        std::fs::write(&args.output, analysis.annotated.encode_png()?)
            .with_context(|| format!("write {}", args.output.display()))?;
    }

    for det in &analysis.detections {
        println!(
            "{}\t{}\t{},{},{},{}",
            det.class_label,
            format_confidence(det.confidence),
            det.bbox.x1,
            det.bbox.y1,
            det.bbox.x2,
            det.bbox.y2
        );
    }

    if let Some(id) = analysis.snapshot_id {
        log::info!("saved snapshot {}", id);
    }
    if let Some(err) = &analysis.store_error {
        eprintln!("{}", err);
    }

    if let Some(dir) = &args.report {
        let Some(top) = analysis.top_detection() else {
            eprintln!("no detections; skipping report");
            return Ok(());
        };

        let explanation = {
            let _stage = ui.stage("fetch explanation");
            let client: Option<Box<dyn ExplanationClient>> = match &args.api_key {
                Some(key) if !key.trim().is_empty() => {
                    Some(Box::new(GeminiClient::new(GeminiSettings {
                        api_key: key.trim().to_string(),
                        model: DEFAULT_MODEL.to_string(),
                        endpoint: DEFAULT_ENDPOINT.to_string(),
                        timeout: Duration::from_secs(30),
                    })?))
                }
                _ => None,
            };
            explain_or_message(client.as_deref(), &top.class_label)
        };

        let mut stage = ui.stage("write report");
        let generated_at = chrono::Local::now().naive_local();
        let pdf = build_report(&ReportInput {
            image: &analysis.annotated,
            label: &top.class_label,
            confidence: top.confidence,
            explanation: &explanation,
            generated_at,
        })?;
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join(report_file_name(&top.class_label, generated_at));
        std::fs::write(&path, pdf).with_context(|| format!("write {}", path.display()))?;
        stage.detail(path.display().to_string());
    }

    Ok(())
}
