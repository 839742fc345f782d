use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::backends::StubBackend;

/// Settings handed to backend constructors.
#[derive(Clone, Debug)]
pub struct DetectorSettings {
    /// Registered backend name (`stub`, `tract`, ...).
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub iou_threshold: f32,
    /// Upper bound on a single inference call when run through `InferenceWorker`.
    pub timeout: Duration,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: "stub".to_string(),
            model_path: None,
            input_width: 640,
            input_height: 640,
            iou_threshold: 0.45,
            timeout: Duration::from_millis(2000),
        }
    }
}

type BackendFactory =
    Box<dyn Fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>> + Send + Sync>;

/// Registry of named backend constructors.
///
/// `create` always builds a new instance: backends carry mutable inference state,
/// so each stream session (and the upload path) gets its own.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with every backend compiled into this build.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("stub", |_| Ok(Box::new(StubBackend::empty())));
        #[cfg(feature = "backend-tract")]
        registry.register("tract", |settings| {
            let model_path = settings
                .model_path
                .as_ref()
                .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
            let backend = super::backends::TractBackend::new(
                model_path,
                settings.input_width,
                settings.input_height,
            )?
            .with_iou_threshold(settings.iou_threshold);
            Ok(Box::new(backend))
        });
        registry
    }

    /// Register a constructor. A later registration under the same name replaces it.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&DetectorSettings) -> Result<Box<dyn DetectorBackend>> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build a fresh backend instance for `settings.backend`.
    pub fn create(&self, settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
        let factory = self.factories.get(&settings.backend).ok_or_else(|| {
            anyhow!(
                "backend '{}' not registered (available: {})",
                settings.backend,
                self.list().join(", ")
            )
        })?;
        let mut backend = factory(settings)?;
        backend.warm_up()?;
        log::info!("detector backend '{}' ready", backend.name());
        Ok(backend)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
