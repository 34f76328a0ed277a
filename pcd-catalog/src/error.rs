#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("uploaded file is empty")]
    EmptyFile,

    #[error("uploaded file is {size} bytes, limit is {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("unsupported file extension '{0}'")]
    UnsupportedExtension(String),

    #[error("requested point count {requested} is outside 1..={max}")]
    PointCountOutOfRange { requested: u64, max: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Ept(#[from] pcd_ept::EptError),

    #[error("point cloud not found: {0}")]
    NotFound(String),

    #[error("invalid point cloud id: {0:?}")]
    InvalidId(String),

    #[error("upload rejected: {0}")]
    Validation(#[from] ValidationError),

    #[error("converter exited with {status:?}: {stderr}")]
    Converter { status: Option<i32>, stderr: String },
}

pub type Result<T> = std::result::Result<T, CatalogError>;
