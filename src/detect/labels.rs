use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Classes of the bundled rice-leaf disease model, indexed by class id.
pub const DEFAULT_RICE_LABELS: &[&str] = &[
    "Bacterial Leaf Blight",
    "Brown Spot",
    "Leaf Blast",
    "Leaf Scald",
    "Narrow Brown Spot",
    "Tungro",
];

/// Static class-id -> label table. Loaded once at start-up and shared read-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn rice_defaults() -> Self {
        Self::new(DEFAULT_RICE_LABELS.iter().map(|s| s.to_string()).collect())
    }

    /// Read one label per line; blank lines are skipped.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label file {}", path.display()))?;
        let names: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();
        if names.is_empty() {
            return Err(anyhow!("label file {} is empty", path.display()));
        }
        Ok(Self::new(names))
    }

    /// Load from `path` if given, otherwise fall back to the built-in table.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::rice_defaults()),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.names.get(class_id).map(String::as_str)
    }

    /// Label for `class_id`, or `class {id}` for ids outside the table.
    pub fn label(&self, class_id: usize) -> String {
        match self.get(class_id) {
            Some(name) => name.to_string(),
            None => format!("class {}", class_id),
        }
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::rice_defaults()
    }
}
