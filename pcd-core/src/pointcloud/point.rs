use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

/// File name of the flat, non-tiled point cloud format.
pub const LEGACY_FILE_NAME: &str = "pointcloud.json";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolume {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Default for BoundingVolume {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingVolume {
    /// An inverted volume that any `expand` call will replace.
    pub fn empty() -> Self {
        BoundingVolume {
            min: [f64::MAX, f64::MAX, f64::MAX],
            max: [f64::MIN, f64::MIN, f64::MIN],
        }
    }

    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.min[i] > self.max[i])
    }

    pub fn expand(&mut self, p: [f64; 3]) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
    }

    pub fn merge(mut self, other: BoundingVolume) -> BoundingVolume {
        if other.is_empty() {
            return self;
        }
        self.expand(other.min);
        self.expand(other.max);
        self
    }

    pub fn center(&self) -> [f64; 3] {
        [
            (self.min[0] + self.max[0]) / 2.0,
            (self.min[1] + self.max[1]) / 2.0,
            (self.min[2] + self.max[2]) / 2.0,
        ]
    }

    pub fn diagonal(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        (0..3)
            .map(|i| (self.max[i] - self.min[i]).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Grows every side by `ratio` of the diagonal length.
    pub fn padded(&self, ratio: f64) -> BoundingVolume {
        if self.is_empty() {
            return *self;
        }
        let pad = self.diagonal() * ratio;
        BoundingVolume {
            min: [self.min[0] - pad, self.min[1] - pad, self.min[2] - pad],
            max: [self.max[0] + pad, self.max[1] + pad, self.max[2] + pad],
        }
    }

    /// `[minx, miny, minz, maxx, maxy, maxz]`, the layout used by `ept.json`.
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        ]
    }

    pub fn from_array(bounds: [f64; 6]) -> Self {
        BoundingVolume {
            min: [bounds[0], bounds[1], bounds[2]],
            max: [bounds[3], bounds[4], bounds[5]],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub position: [f32; 3],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<[f32; 3]>,

    // 0.0 - 1.0 per channel
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<[f32; 3]>,
}

impl Point {
    pub fn new(position: [f32; 3]) -> Self {
        Self {
            position,
            normal: None,
            color: None,
        }
    }

    pub fn with_normal(mut self, normal: [f32; 3]) -> Self {
        self.normal = Some(normal);
        self
    }

    pub fn with_color(mut self, color: [f32; 3]) -> Self {
        self.color = Some(color);
        self
    }

    pub fn to_rgb8(&self) -> Option<[u8; 3]> {
        self.color.map(|c| {
            [
                (c[0].clamp(0.0, 1.0) * 255.0) as u8,
                (c[1].clamp(0.0, 1.0) * 255.0) as u8,
                (c[2].clamp(0.0, 1.0) * 255.0) as u8,
            ]
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub point_count: usize,
    pub bounds_min: [f32; 3],
    pub bounds_max: [f32; 3],
    pub source_file: String,
    pub has_normals: bool,
    pub has_colors: bool,
}

/// Flat point cloud as stored in `pointcloud.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<Point>,
    pub metadata: Metadata,
}

impl PointCloud {
    pub fn new(points: Vec<Point>, source_file: impl Into<String>) -> Self {
        let mut bounding_volume = BoundingVolume::empty();
        for point in &points {
            let [x, y, z] = point.position;
            bounding_volume.expand([x as f64, y as f64, z as f64]);
        }
        let (bounds_min, bounds_max) = if bounding_volume.is_empty() {
            ([0.0; 3], [0.0; 3])
        } else {
            (
                bounding_volume.min.map(|v| v as f32),
                bounding_volume.max.map(|v| v as f32),
            )
        };

        let metadata = Metadata {
            point_count: points.len(),
            bounds_min,
            bounds_max,
            source_file: source_file.into(),
            has_normals: points.iter().any(|p| p.normal.is_some()),
            has_colors: points.iter().any(|p| p.color.is_some()),
        };

        PointCloud { points, metadata }
    }

    pub fn bounding_volume(&self) -> BoundingVolume {
        let mut volume = BoundingVolume::empty();
        for point in &self.points {
            let [x, y, z] = point.position;
            volume.expand([x as f64, y as f64, z as f64]);
        }
        volume
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_cloud_metadata() {
        let points = vec![
            Point::new([0.0, -1.0, 2.0]).with_color([1.0, 0.5, 0.0]),
            Point::new([3.0, 4.0, -5.0]),
        ];
        let pc = PointCloud::new(points, "bunny.glb");

        assert_eq!(pc.metadata.point_count, 2);
        assert_eq!(pc.metadata.bounds_min, [0.0, -1.0, -5.0]);
        assert_eq!(pc.metadata.bounds_max, [3.0, 4.0, 2.0]);
        assert!(pc.metadata.has_colors);
        assert!(!pc.metadata.has_normals);
    }

    #[test]
    fn test_empty_point_cloud_has_zero_bounds() {
        let pc = PointCloud::new(vec![], "empty.obj");
        assert_eq!(pc.metadata.bounds_min, [0.0; 3]);
        assert_eq!(pc.metadata.bounds_max, [0.0; 3]);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let json = serde_json::to_string(&Point::new([1.0, 2.0, 3.0])).unwrap();
        assert_eq!(json, r#"{"position":[1.0,2.0,3.0]}"#);

        let parsed: Point = serde_json::from_str(r#"{"position":[1,2,3],"color":[0,0,1]}"#).unwrap();
        assert_eq!(parsed.to_rgb8(), Some([0, 0, 255]));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEGACY_FILE_NAME);
        let pc = PointCloud::new(
            vec![Point::new([1.0, 1.0, 1.0]).with_normal([0.0, 1.0, 0.0])],
            "cube.gltf",
        );
        pc.save(&path).unwrap();
        assert_eq!(PointCloud::load(&path).unwrap(), pc);
    }

    #[test]
    fn test_bounding_volume_padding() {
        let mut bv = BoundingVolume::empty();
        assert!(bv.is_empty());
        bv.expand([0.0, 0.0, 0.0]);
        bv.expand([3.0, 4.0, 0.0]);
        assert_eq!(bv.diagonal(), 5.0);

        let padded = bv.padded(0.1);
        assert_eq!(padded.min, [-0.5, -0.5, -0.5]);
        assert_eq!(padded.max, [3.5, 4.5, 0.5]);
        assert_eq!(BoundingVolume::from_array(bv.to_array()), bv);
    }
}
