use std::{collections::BTreeMap, fs, path::Path};

use pcd_core::pointcloud::point::{BoundingVolume, PointCloud};
use rayon::prelude::*;

use crate::{
    error::Result,
    hierarchy::Hierarchy,
    key::TileKey,
    metadata::{DataType, EptMetadata, HierarchyType, Schema, Srs},
    tile::{TileLayout, TilePoints},
    DATA_DIR, EPT_FILE_NAME, HIERARCHY_DIR,
};

const BOUNDS_PADDING: f64 = 0.01;
const SPAN: u32 = 128;

/// Writes a point cloud as an EPT tree. A node keeps an evenly strided
/// sample of at most `max_points_per_tile` points and hands the rest to its
/// children; nodes at `max_depth` keep everything they receive.
#[derive(Debug, Clone)]
pub struct EptBuilder {
    max_points_per_tile: usize,
    max_depth: u32,
}

impl Default for EptBuilder {
    fn default() -> Self {
        Self {
            max_points_per_tile: 100_000,
            max_depth: 10,
        }
    }
}

impl EptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_points_per_tile(mut self, max_points: usize) -> Self {
        self.max_points_per_tile = max_points.max(1);
        self
    }

    /// Clamped to [`TileKey::MAX_DEPTH`].
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        if depth > TileKey::MAX_DEPTH {
            log::warn!(
                "max depth {} exceeds {}, clamping",
                depth,
                TileKey::MAX_DEPTH
            );
        }
        self.max_depth = depth.min(TileKey::MAX_DEPTH);
        self
    }

    pub fn build(&self, point_cloud: &PointCloud, output_dir: &Path) -> Result<EptMetadata> {
        fs::create_dir_all(output_dir.join(DATA_DIR))?;
        fs::create_dir_all(output_dir.join(HIERARCHY_DIR))?;

        let conforming = calculate_bounds(point_cloud);
        let bounds = conforming.padded(BOUNDS_PADDING);
        let (bounds_array, conforming_array) = if conforming.is_empty() {
            ([0.0; 6], [0.0; 6])
        } else {
            (bounds.to_array(), conforming.to_array())
        };

        let has_colors = point_cloud.metadata.has_colors;
        let has_normals = point_cloud.metadata.has_normals;
        let schema = Schema::for_points(has_colors, has_normals);
        let layout = TileLayout::from_schema(&schema)?;

        let metadata = EptMetadata {
            bounds: bounds_array,
            bounds_conforming: conforming_array,
            points: point_cloud.points.len() as u64,
            schema,
            srs: Some(Srs::epsg("4978")),
            span: SPAN,
            data_type: DataType::Binary,
            hierarchy_type: HierarchyType::Json,
            version: "1.0.0".to_string(),
        };

        let nodes = self.distribute(point_cloud, &bounds);
        log::info!(
            "writing {} points into {} tiles under {:?}",
            point_cloud.points.len(),
            nodes.len(),
            output_dir
        );

        nodes.par_iter().try_for_each(|(key, indices)| {
            let tile = collect_tile(point_cloud, indices, has_colors, has_normals);
            let path = output_dir.join(DATA_DIR).join(format!("{key}.bin"));
            fs::write(path, layout.encode(&tile))
        })?;

        let mut hierarchy = Hierarchy::default();
        for (key, indices) in &nodes {
            hierarchy.insert(*key, indices.len() as i64);
        }
        hierarchy.save(
            &output_dir
                .join(HIERARCHY_DIR)
                .join(format!("{}.json", TileKey::root())),
        )?;

        metadata.save(&output_dir.join(EPT_FILE_NAME))?;
        Ok(metadata)
    }

    /// Assigns every point index to exactly one node.
    fn distribute(&self, point_cloud: &PointCloud, bounds: &BoundingVolume) -> BTreeMap<TileKey, Vec<usize>> {
        let mut nodes = BTreeMap::new();
        if point_cloud.points.is_empty() {
            return nodes;
        }

        let mut pending = vec![(TileKey::root(), (0..point_cloud.points.len()).collect::<Vec<_>>())];
        while let Some((key, indices)) = pending.pop() {
            if indices.len() <= self.max_points_per_tile || key.depth >= self.max_depth {
                nodes.insert(key, indices);
                continue;
            }

            let stride = indices.len().div_ceil(self.max_points_per_tile);
            let node_bounds = key.bounds(bounds);
            let mut kept = Vec::with_capacity(self.max_points_per_tile);
            let mut children: [Vec<usize>; 8] = Default::default();
            for (n, index) in indices.into_iter().enumerate() {
                if n % stride == 0 {
                    kept.push(index);
                } else {
                    let [x, y, z] = point_cloud.points[index].position;
                    let child = TileKey::child_index_for(&node_bounds, [x as f64, y as f64, z as f64]);
                    children[child].push(index);
                }
            }

            nodes.insert(key, kept);
            for (i, child_indices) in children.into_iter().enumerate() {
                if !child_indices.is_empty() {
                    pending.push((key.child(i), child_indices));
                }
            }
        }
        nodes
    }
}

fn calculate_bounds(point_cloud: &PointCloud) -> BoundingVolume {
    point_cloud
        .points
        .par_iter()
        .map(|point| {
            let [x, y, z] = point.position;
            let mut volume = BoundingVolume::empty();
            volume.expand([x as f64, y as f64, z as f64]);
            volume
        })
        .reduce(BoundingVolume::empty, BoundingVolume::merge)
}

fn collect_tile(
    point_cloud: &PointCloud,
    indices: &[usize],
    has_colors: bool,
    has_normals: bool,
) -> TilePoints {
    let points = indices.iter().map(|&i| &point_cloud.points[i]);
    TilePoints {
        positions: points.clone().map(|p| p.position).collect(),
        colors: has_colors.then(|| {
            points
                .clone()
                .map(|p| p.to_rgb8().unwrap_or([255, 255, 255]))
                .collect()
        }),
        normals: has_normals.then(|| points.clone().map(|p| p.normal.unwrap_or([0.0; 3])).collect()),
    }
}

#[cfg(test)]
mod tests {
    use pcd_core::pointcloud::point::Point;

    use super::*;

    fn grid_cloud(n: usize) -> PointCloud {
        let points = (0..n)
            .map(|i| {
                let f = i as f32;
                Point::new([f % 10.0, (f / 10.0).floor() % 10.0, (f / 100.0).floor()])
                    .with_color([1.0, 0.0, 0.5])
            })
            .collect();
        PointCloud::new(points, "grid.glb")
    }

    #[test]
    fn test_every_point_lands_in_one_tile() {
        let cloud = grid_cloud(1000);
        let builder = EptBuilder::new().with_max_points_per_tile(64).with_max_depth(4);
        let bounds = calculate_bounds(&cloud).padded(BOUNDS_PADDING);
        let nodes = builder.distribute(&cloud, &bounds);

        let mut seen: Vec<usize> = nodes.values().flatten().copied().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..1000).collect::<Vec<_>>());
        assert!(nodes.len() > 1);
        assert_eq!(nodes[&TileKey::root()].len(), 63);
        for (key, indices) in &nodes {
            if key.depth < 4 {
                assert!(indices.len() <= 64, "{key} holds {}", indices.len());
            }
        }
    }

    #[test]
    fn test_small_cloud_stays_in_root() {
        let dir = tempfile::tempdir().unwrap();
        let cloud = grid_cloud(20);
        let metadata = EptBuilder::new().build(&cloud, dir.path()).unwrap();

        assert_eq!(metadata.points, 20);
        assert_eq!(metadata.record_size(), 15);
        assert_eq!(metadata.conforming_volume().max, [9.0, 1.0, 0.0]);
        assert!(metadata.bounds[0] < 0.0);

        let tile = fs::read(dir.path().join(DATA_DIR).join("0-0-0-0.bin")).unwrap();
        assert_eq!(tile.len(), 20 * 15);
        assert!(dir.path().join(EPT_FILE_NAME).is_file());
    }

    #[test]
    fn test_empty_cloud() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = EptBuilder::new()
            .build(&PointCloud::new(vec![], "empty.obj"), dir.path())
            .unwrap();
        assert_eq!(metadata.points, 0);
        assert_eq!(metadata.bounds, [0.0; 6]);
        let hierarchy = Hierarchy::load(&dir.path().join(HIERARCHY_DIR).join("0-0-0-0.json")).unwrap();
        assert!(hierarchy.is_empty());
    }
}
