use crate::metadata::ScalarType;

#[derive(Debug, thiserror::Error)]
pub enum EptError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt tile {key}: {len} bytes is not a multiple of the {record_size}-byte record")]
    CorruptTile {
        key: String,
        len: usize,
        record_size: usize,
    },

    #[error("schema has no '{0}' dimension")]
    MissingDimension(String),

    #[error("unsupported dimension {name}: {scalar:?} of size {size}")]
    UnsupportedDimension {
        name: String,
        scalar: ScalarType,
        size: u32,
    },

    #[error("unsupported tile data type '{0}'")]
    UnsupportedDataType(String),

    #[error("invalid tile key '{0}'")]
    InvalidKey(String),

    #[error("invalid point cloud id '{0}'")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, EptError>;
