use std::{fs, path::Path};

use chrono::{DateTime, Utc};
use pcd_core::pointcloud::point::Metadata as LegacyMetadata;
use pcd_ept::EptMetadata;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub const SIDECAR_FILE_NAME: &str = "metadata.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    #[default]
    Ept,
    Json,
}

/// Resolved description of one stored point cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointCloudMetadata {
    pub id: String,
    pub source_file: String,
    pub point_count: u64,
    /// Tight extent of the points. For EPT data this mirrors
    /// `boundsConforming` in `ept.json`, not the padded `bounds` cube.
    pub bounds_min: [f64; 3],
    /// Upper corner, from the same EPT field as `bounds_min`.
    pub bounds_max: [f64; 3],
    pub has_normals: bool,
    pub has_colors: bool,
    pub format: StorageFormat,
    pub created_at: DateTime<Utc>,
    pub file_size: u64,
}

/// The facts a data file can vouch for.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundTruth {
    pub point_count: u64,
    pub bounds_min: [f64; 3],
    pub bounds_max: [f64; 3],
    pub has_normals: bool,
    pub has_colors: bool,
    pub format: StorageFormat,
}

impl GroundTruth {
    pub fn from_ept(ept: &EptMetadata) -> Self {
        let bounds = ept.conforming_volume();
        Self {
            point_count: ept.points,
            bounds_min: bounds.min,
            bounds_max: bounds.max,
            has_normals: ept.schema.has_normals(),
            has_colors: ept.schema.has_colors(),
            format: StorageFormat::Ept,
        }
    }

    pub fn from_legacy(metadata: &LegacyMetadata) -> Self {
        Self {
            point_count: metadata.point_count as u64,
            bounds_min: metadata.bounds_min.map(f64::from),
            bounds_max: metadata.bounds_max.map(f64::from),
            has_normals: metadata.has_normals,
            has_colors: metadata.has_colors,
            format: StorageFormat::Json,
        }
    }
}

/// `metadata.json` as found on disk. Every field may be missing in
/// records written by older tools.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds_min: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds_max: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_normals: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_colors: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<StorageFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Sidecar {
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn from_ground_truth(
        id: &str,
        source_file: Option<String>,
        truth: &GroundTruth,
        created_at: DateTime<Utc>,
    ) -> Self {
        let mut sidecar = Self {
            id: Some(id.to_string()),
            source_file,
            created_at: Some(created_at),
            ..Default::default()
        };
        sidecar.apply(truth);
        sidecar
    }

    /// Overwrite data-derived fields with `truth`.
    pub fn apply(&mut self, truth: &GroundTruth) {
        self.point_count = Some(truth.point_count);
        self.bounds_min = Some(truth.bounds_min);
        self.bounds_max = Some(truth.bounds_max);
        self.has_normals = Some(truth.has_normals);
        self.has_colors = Some(truth.has_colors);
        self.format = Some(truth.format);
    }

    /// Whether every data-derived field agrees with `truth`.
    pub fn agrees_with(&self, truth: &GroundTruth) -> bool {
        self.point_count == Some(truth.point_count)
            && self.bounds_min == Some(truth.bounds_min)
            && self.bounds_max == Some(truth.bounds_max)
            && self.has_normals == Some(truth.has_normals)
            && self.has_colors == Some(truth.has_colors)
            && self.format == Some(truth.format)
    }

    pub fn truth(&self) -> GroundTruth {
        GroundTruth {
            point_count: self.point_count.unwrap_or(0),
            bounds_min: self.bounds_min.unwrap_or([0.0; 3]),
            bounds_max: self.bounds_max.unwrap_or([0.0; 3]),
            has_normals: self.has_normals.unwrap_or(false),
            has_colors: self.has_colors.unwrap_or(false),
            format: self.format.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sidecar_parses() {
        let sidecar: Sidecar = serde_json::from_str(r#"{"pointCount": 12, "hasColors": true}"#).unwrap();
        assert_eq!(sidecar.point_count, Some(12));
        assert_eq!(sidecar.has_colors, Some(true));
        assert!(sidecar.id.is_none());
        assert!(sidecar.format.is_none());
    }

    #[test]
    fn test_apply_makes_sidecar_agree() {
        let truth = GroundTruth {
            point_count: 5,
            bounds_min: [0.0, 1.0, 2.0],
            bounds_max: [3.0, 4.0, 5.0],
            has_normals: true,
            has_colors: false,
            format: StorageFormat::Ept,
        };
        let mut sidecar = Sidecar {
            point_count: Some(4),
            ..Default::default()
        };
        assert!(!sidecar.agrees_with(&truth));
        sidecar.apply(&truth);
        assert!(sidecar.agrees_with(&truth));
        assert_eq!(sidecar.truth(), truth);
    }

    #[test]
    fn test_metadata_json_shape() {
        let metadata = PointCloudMetadata {
            id: "abc".to_string(),
            source_file: "bunny.ply".to_string(),
            point_count: 3,
            bounds_min: [0.0; 3],
            bounds_max: [1.0; 3],
            has_normals: false,
            has_colors: true,
            format: StorageFormat::Json,
            created_at: Utc::now(),
            file_size: 42,
        };
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["sourceFile"], "bunny.ply");
        assert_eq!(value["format"], "json");
        assert_eq!(value["fileSize"], 42);
    }
}
