//! Entwine Point Tile storage: `ept.json` metadata, binary tiles under
//! `ept-data/` and hierarchy descriptors under `ept-hierarchy/`.

pub mod builder;
pub mod error;
pub mod hierarchy;
pub mod key;
pub mod metadata;
pub mod store;
pub mod tile;

pub use builder::EptBuilder;
pub use error::{EptError, Result};
pub use hierarchy::Hierarchy;
pub use key::TileKey;
pub use metadata::{DataType, Dimension, EptMetadata, HierarchyType, ScalarType, Schema, Srs};
pub use store::EptStore;
pub use tile::{TileLayout, TilePoints};

pub const EPT_FILE_NAME: &str = "ept.json";
pub const DATA_DIR: &str = "ept-data";
pub const HIERARCHY_DIR: &str = "ept-hierarchy";
