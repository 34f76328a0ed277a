use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Json,
};
use pcd_catalog::PointCloudMetadata;
use pcd_ept::{EptMetadata, Hierarchy, TileKey};

use super::error::{blocking, ApiError};
use super::state::AppStateHandle;

pub async fn list(State(state): State<AppStateHandle>) -> Result<Json<Vec<PointCloudMetadata>>, ApiError> {
    let catalog = state.catalog.clone();
    Ok(Json(blocking(move || catalog.list()).await?))
}

pub async fn get(
    State(state): State<AppStateHandle>,
    Path(id): Path<String>,
) -> Result<Json<PointCloudMetadata>, ApiError> {
    let catalog = state.catalog.clone();
    Ok(Json(blocking(move || catalog.get(&id)).await?))
}

pub async fn ept(
    State(state): State<AppStateHandle>,
    Path(id): Path<String>,
) -> Result<Json<EptMetadata>, ApiError> {
    let catalog = state.catalog.clone();
    Ok(Json(blocking(move || catalog.store().metadata(&id)).await?))
}

pub async fn tile(
    State(state): State<AppStateHandle>,
    Path((id, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let key: TileKey = key.parse()?;
    let catalog = state.catalog.clone();
    let bytes = blocking(move || catalog.store().raw_tile(&id, &key)).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes))
}

pub async fn hierarchy(
    State(state): State<AppStateHandle>,
    Path((id, key)): Path<(String, String)>,
) -> Result<Json<Hierarchy>, ApiError> {
    let key: TileKey = key.parse()?;
    let catalog = state.catalog.clone();
    Ok(Json(blocking(move || catalog.store().hierarchy(&id, &key)).await?))
}
