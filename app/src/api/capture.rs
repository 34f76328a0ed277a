//! Capture bridge surface: lifecycle control, status and the latest frame.

use axum::{
    extract::{Query, State},
    Json,
};
use pcd_core::{ColorEncoding, FrameMessage, StreamStatus};
use serde::Deserialize;

use super::error::{blocking, ApiError};
use super::state::AppStateHandle;

pub async fn initialize(State(state): State<AppStateHandle>) -> Result<Json<StreamStatus>, ApiError> {
    let capture = state.capture.clone();
    blocking(move || capture.initialize()).await?;
    Ok(Json(state.capture.status()))
}

pub async fn start(State(state): State<AppStateHandle>) -> Result<Json<StreamStatus>, ApiError> {
    let capture = state.capture.clone();
    blocking(move || capture.start()).await?;
    Ok(Json(state.capture.status()))
}

pub async fn stop(State(state): State<AppStateHandle>) -> Result<Json<StreamStatus>, ApiError> {
    let capture = state.capture.clone();
    blocking(move || capture.stop()).await?;
    Ok(Json(state.capture.status()))
}

/// Always answers, whatever state the service is in.
pub async fn status(State(state): State<AppStateHandle>) -> Json<StreamStatus> {
    Json(state.capture.status())
}

#[derive(Debug, Default, Deserialize)]
pub struct FrameQuery {
    #[serde(default)]
    pub colors: ColorEncoding,
}

pub async fn frame(
    State(state): State<AppStateHandle>,
    Query(query): Query<FrameQuery>,
) -> Result<Json<FrameMessage>, ApiError> {
    let frame = state
        .capture
        .cache()
        .get()
        .ok_or_else(|| ApiError::NotFound("no frame captured yet".to_string()))?;
    Ok(Json(frame.to_message(query.colors)))
}
