use std::sync::Arc;

use pcd_capture::{CaptureService, ViewerGate};
use pcd_catalog::Catalog;

pub struct AppState {
    pub capture: Arc<CaptureService>,
    pub catalog: Arc<Catalog>,
    /// Present when streaming follows viewer connections.
    pub gate: Option<Arc<ViewerGate<CaptureService>>>,
}

pub type AppStateHandle = Arc<AppState>;

impl AppState {
    pub fn new(capture: Arc<CaptureService>, catalog: Arc<Catalog>, auto_stream: bool) -> Self {
        let gate = auto_stream.then(|| ViewerGate::new(capture.clone()));
        Self {
            capture,
            catalog,
            gate,
        }
    }
}
