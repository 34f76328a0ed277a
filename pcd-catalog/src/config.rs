use std::path::PathBuf;

use chrono::Duration;

pub const DEFAULT_EXTENSIONS: [&str; 6] = ["glb", "gltf", "obj", "fbx", "ply", "stl"];

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub root: PathBuf,
    /// Incomplete directories older than this are flagged for sweeping.
    pub retention: Duration,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
    pub converter_program: PathBuf,
    pub max_point_count: u64,
    /// Write a sidecar on first read when none exists.
    pub persist_derived: bool,
}

impl CatalogConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            retention: Duration::hours(24),
            max_upload_bytes: 100 * 1024 * 1024,
            allowed_extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            converter_program: PathBuf::from("model_parser"),
            max_point_count: 10_000_000,
            persist_derived: true,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: u64) -> Self {
        self.max_upload_bytes = limit;
        self
    }

    pub fn with_converter_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.converter_program = program.into();
        self
    }

    pub fn with_persist_derived(mut self, persist: bool) -> Self {
        self.persist_derived = persist;
        self
    }

    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|e| *e == ext)
    }
}
