pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod repair;

pub use catalog::Catalog;
pub use config::CatalogConfig;
pub use error::{CatalogError, Result, ValidationError};
pub use ingest::{validate_upload, Converter};
pub use metadata::{PointCloudMetadata, Sidecar, StorageFormat, SIDECAR_FILE_NAME};
pub use repair::{FlagReason, Flagged, RepairReport};
