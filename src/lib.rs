//! Leafwatch: rice-leaf disease detection on live video and uploaded images.
//!
//! # Architecture
//!
//! Each incoming frame goes through one pipeline call:
//!
//! 1. optional resize to the session's inference resolution
//! 2. detection (a pluggable backend, bounded by a per-call timeout)
//! 3. confidence filtering (inclusive threshold)
//! 4. rescaling of boxes back to the original frame and clamping to its bounds
//! 5. overlay rendering at the original resolution
//!
//! A detector failure on one frame yields that frame unannotated; the stream
//! keeps running. Session settings (threshold, resize target) are updated live
//! through `SessionControl` and read once per frame.
//!
//! # Module Structure
//!
//! - `frame`, `geometry`: raster type and coordinate mapping
//! - `detect`: detector backends, label table, inference worker
//! - `overlay`, `pipeline`: rendering and the per-frame pipeline
//! - `ingest`, `transport`, `session`: live sources, sinks and the frame loop
//! - `storage`, `analysis`: snapshot history and one-shot uploads
//! - `explain`, `report`: disease explanations and PDF reports
//! - `config`, `api`: daemon configuration and the HTTP control surface

pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod explain;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod overlay;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod storage;
pub mod transport;

pub use analysis::{analyze_upload, UploadAnalysis};
pub use config::AppConfig;
pub use detect::{
    BackendRegistry, Detection, DetectorBackend, DetectorSettings, LabelTable, RawDetection,
};
pub use frame::{Dims, Frame};
pub use geometry::BoundingBox;
pub use overlay::{OverlayRenderer, OverlayStyle};
pub use pipeline::{FramePipeline, ProcessedFrame};
pub use session::{ResizeTarget, SessionConfig, SessionControl, SessionHandle, StreamSession};
pub use storage::{SnapshotStore, SqliteSnapshotStore};
