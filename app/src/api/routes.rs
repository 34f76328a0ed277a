use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppStateHandle;
use super::{capture, pointclouds, stream};

pub fn create_router(state: AppStateHandle) -> Router {
    Router::new()
        // Capture bridge
        .route("/initialize", post(capture::initialize))
        .route("/start", post(capture::start))
        .route("/stop", post(capture::stop))
        .route("/status", get(capture::status))
        .route("/frame", get(capture::frame))
        // Stored point clouds
        .route("/api/pointclouds", get(pointclouds::list))
        .route("/api/pointclouds/:id", get(pointclouds::get))
        .route("/api/pointclouds/:id/ept.json", get(pointclouds::ept))
        .route("/api/pointclouds/:id/ept-data/:key", get(pointclouds::tile))
        .route(
            "/api/pointclouds/:id/ept-hierarchy/:key",
            get(pointclouds::hierarchy),
        )
        // Live frames
        .route("/api/stream", get(stream::ws_handler))
        .with_state(state)
}
