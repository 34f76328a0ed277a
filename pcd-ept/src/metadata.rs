use std::{fs, path::Path};

use pcd_core::pointcloud::point::BoundingVolume;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const POSITION_DIMENSIONS: [&str; 3] = ["X", "Y", "Z"];
pub const COLOR_DIMENSIONS: [&str; 3] = ["Red", "Green", "Blue"];
pub const NORMAL_DIMENSIONS: [&str; 3] = ["NormalX", "NormalY", "NormalZ"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Signed,
    Unsigned,
    Floating,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(rename = "type")]
    pub scalar: ScalarType,
    pub size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
}

impl Dimension {
    pub fn new(name: &str, scalar: ScalarType, size: u32) -> Self {
        Self {
            name: name.to_string(),
            scalar,
            size,
            scale: None,
            offset: None,
        }
    }

    pub fn floating(name: &str) -> Self {
        Self::new(name, ScalarType::Floating, 4)
    }

    pub fn unsigned8(name: &str) -> Self {
        Self::new(name, ScalarType::Unsigned, 1)
    }
}

/// Ordered dimension list; the order is the byte order within a point record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema(pub Vec<Dimension>);

impl Schema {
    /// X/Y/Z as 4-byte floats, then optional 8-bit RGB, then optional float normals.
    pub fn for_points(has_colors: bool, has_normals: bool) -> Self {
        let mut dimensions: Vec<Dimension> =
            POSITION_DIMENSIONS.iter().map(|n| Dimension::floating(n)).collect();
        if has_colors {
            dimensions.extend(COLOR_DIMENSIONS.iter().map(|n| Dimension::unsigned8(n)));
        }
        if has_normals {
            dimensions.extend(NORMAL_DIMENSIONS.iter().map(|n| Dimension::floating(n)));
        }
        Schema(dimensions)
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.0
    }

    pub fn record_size(&self) -> usize {
        self.0.iter().map(|d| d.size as usize).sum()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|d| d.name == name)
    }

    /// Byte offset of `name` within a record.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for dimension in &self.0 {
            if dimension.name == name {
                return Some(offset);
            }
            offset += dimension.size as usize;
        }
        None
    }

    pub fn has_colors(&self) -> bool {
        COLOR_DIMENSIONS.iter().all(|n| self.contains(n))
    }

    pub fn has_normals(&self) -> bool {
        NORMAL_DIMENSIONS.iter().all(|n| self.contains(n))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Srs {
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub horizontal: String,
    #[serde(default)]
    pub vertical: String,
    #[serde(default)]
    pub wkt: String,
}

impl Srs {
    pub fn epsg(code: &str) -> Self {
        Self {
            authority: "EPSG".to_string(),
            horizontal: code.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Binary,
    Laszip,
    Zstandard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HierarchyType {
    Json,
    Gzip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EptMetadata {
    /// `[minx, miny, minz, maxx, maxy, maxz]`
    pub bounds: [f64; 6],
    #[serde(alias = "bounds_conforming")]
    pub bounds_conforming: [f64; 6],
    pub points: u64,
    pub schema: Schema,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srs: Option<Srs>,
    pub span: u32,
    pub data_type: DataType,
    pub hierarchy_type: HierarchyType,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl EptMetadata {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn bounding_volume(&self) -> BoundingVolume {
        BoundingVolume::from_array(self.bounds)
    }

    pub fn conforming_volume(&self) -> BoundingVolume {
        BoundingVolume::from_array(self.bounds_conforming)
    }

    pub fn record_size(&self) -> usize {
        self.schema.record_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPT_JSON: &str = r#"{
        "bounds": [-1.0, -2.0, -3.0, 1.0, 2.0, 3.0],
        "bounds_conforming": [-0.5, -1.5, -2.5, 0.5, 1.5, 2.5],
        "points": 1200,
        "schema": [
            {"name": "X", "type": "floating", "size": 4},
            {"name": "Y", "type": "floating", "size": 4},
            {"name": "Z", "type": "floating", "size": 4},
            {"name": "Red", "type": "unsigned", "size": 1},
            {"name": "Green", "type": "unsigned", "size": 1},
            {"name": "Blue", "type": "unsigned", "size": 1},
            {"name": "NormalX", "type": "floating", "size": 4},
            {"name": "NormalY", "type": "floating", "size": 4},
            {"name": "NormalZ", "type": "floating", "size": 4}
        ],
        "srs": {"authority": "EPSG", "horizontal": "4978", "vertical": "", "wkt": ""},
        "dataType": "binary",
        "hierarchyType": "json",
        "span": 128,
        "version": "1.0.0"
    }"#;

    #[test]
    fn test_parse_converter_output() {
        let metadata: EptMetadata = serde_json::from_str(EPT_JSON).unwrap();
        assert_eq!(metadata.points, 1200);
        assert_eq!(metadata.record_size(), 27);
        assert_eq!(metadata.data_type, DataType::Binary);
        assert!(metadata.schema.has_colors());
        assert!(metadata.schema.has_normals());
        assert_eq!(metadata.schema.offset_of("Red"), Some(12));
        assert_eq!(metadata.schema.offset_of("NormalZ"), Some(23));
        assert_eq!(metadata.conforming_volume().max, [0.5, 1.5, 2.5]);
    }

    #[test]
    fn test_writes_camel_case() {
        let metadata: EptMetadata = serde_json::from_str(EPT_JSON).unwrap();
        let value = serde_json::to_value(&metadata).unwrap();
        assert!(value.get("boundsConforming").is_some());
        assert_eq!(value["dataType"], "binary");
        assert_eq!(value["schema"][3]["type"], "unsigned");
    }

    #[test]
    fn test_schema_without_optional_fields() {
        let schema = Schema::for_points(false, false);
        assert_eq!(schema.record_size(), 12);
        assert!(!schema.has_colors());
        assert!(!schema.has_normals());
        assert_eq!(schema.offset_of("Red"), None);
    }

    #[test]
    fn test_unknown_scalar_type_is_rejected() {
        let json = EPT_JSON.replace(r#""type": "unsigned""#, r#""type": "bool""#);
        assert!(serde_json::from_str::<EptMetadata>(&json).is_err());
    }
}
