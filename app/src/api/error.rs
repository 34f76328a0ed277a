use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pcd_capture::CaptureError;
use pcd_catalog::{CatalogError, ValidationError};
use pcd_ept::EptError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Ept(#[from] EptError),

    #[error("{0}")]
    NotFound(String),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn ept_status(err: &EptError) -> StatusCode {
    match err {
        EptError::NotFound(_) => StatusCode::NOT_FOUND,
        EptError::InvalidKey(_) | EptError::InvalidId(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Capture(e) => match e {
                CaptureError::NoDevice => StatusCode::NOT_FOUND,
                CaptureError::InvalidTransition { .. }
                | CaptureError::DeviceUnavailable(_)
                | CaptureError::SensorNotReady(_) => StatusCode::CONFLICT,
                CaptureError::BridgeUnreachable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Catalog(e) => match e {
                CatalogError::NotFound(_) => StatusCode::NOT_FOUND,
                CatalogError::InvalidId(_) => StatusCode::BAD_REQUEST,
                CatalogError::Validation(ValidationError::FileTooLarge { .. }) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                CatalogError::Validation(_) => StatusCode::BAD_REQUEST,
                CatalogError::Ept(e) => ept_status(e),
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Ept(e) => ept_status(e),
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("{}", self);
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Run filesystem or device work off the async runtime.
pub async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?.map_err(Into::into)
}
