mod backend;
mod backends;
mod labels;
mod registry;
mod result;
mod worker;

pub use backend::DetectorBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use backends::{StubBackend, StubBehavior};
pub use labels::{LabelTable, DEFAULT_RICE_LABELS};
pub use registry::{BackendRegistry, DetectorSettings};
pub use result::{filter_by_confidence, format_confidence, Detection, RawDetection};
pub use worker::InferenceWorker;
