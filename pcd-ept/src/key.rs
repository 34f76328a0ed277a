use std::{fmt, str::FromStr};

use pcd_core::pointcloud::point::BoundingVolume;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EptError;

/// One octree node, written as `D-X-Y-Z` in file names and hierarchy maps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TileKey {
    pub depth: u32,
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl TileKey {
    /// Deepest level whose coordinates still fit in `u32`.
    pub const MAX_DEPTH: u32 = 31;

    pub fn new(depth: u32, x: u32, y: u32, z: u32) -> Self {
        Self { depth, x, y, z }
    }

    pub fn root() -> Self {
        Self::default()
    }

    /// Child `i` in 0..8; bit 0 selects +x, bit 1 +y, bit 2 +z.
    pub fn child(&self, i: usize) -> TileKey {
        let dx = (i & 1) as u32;
        let dy = ((i >> 1) & 1) as u32;
        let dz = ((i >> 2) & 1) as u32;
        TileKey {
            depth: self.depth + 1,
            x: self.x * 2 + dx,
            y: self.y * 2 + dy,
            z: self.z * 2 + dz,
        }
    }

    pub fn children(&self) -> [TileKey; 8] {
        std::array::from_fn(|i| self.child(i))
    }

    pub fn parent(&self) -> Option<TileKey> {
        if self.depth == 0 {
            return None;
        }
        Some(TileKey {
            depth: self.depth - 1,
            x: self.x / 2,
            y: self.y / 2,
            z: self.z / 2,
        })
    }

    /// Volume covered by this node when the root covers `root`.
    pub fn bounds(&self, root: &BoundingVolume) -> BoundingVolume {
        let cells = (1u64 << self.depth) as f64;
        let xyz = [self.x, self.y, self.z];
        let mut min = [0.0; 3];
        let mut max = [0.0; 3];
        for axis in 0..3 {
            let step = (root.max[axis] - root.min[axis]) / cells;
            min[axis] = root.min[axis] + step * xyz[axis] as f64;
            max[axis] = min[axis] + step;
        }
        BoundingVolume { min, max }
    }

    /// Index of the child of a node with `bounds` that contains `p`.
    pub fn child_index_for(bounds: &BoundingVolume, p: [f64; 3]) -> usize {
        let mid = bounds.center();
        let mut index = 0;
        for axis in 0..3 {
            if p[axis] >= mid[axis] {
                index |= 1 << axis;
            }
        }
        index
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.depth, self.x, self.y, self.z)
    }
}

impl FromStr for TileKey {
    type Err = EptError;

    /// Accepts `D-X-Y-Z`, optionally followed by a `.bin` or `.json` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stem = s
            .strip_suffix(".bin")
            .or_else(|| s.strip_suffix(".json"))
            .unwrap_or(s);
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.len() != 4 {
            return Err(EptError::InvalidKey(s.to_string()));
        }
        let mut values = [0u32; 4];
        for (value, part) in values.iter_mut().zip(&parts) {
            *value = part
                .parse()
                .map_err(|_| EptError::InvalidKey(s.to_string()))?;
        }
        let [depth, x, y, z] = values;
        let span = 1u64 << depth.min(63);
        if depth > Self::MAX_DEPTH || [x, y, z].iter().any(|&c| c as u64 >= span) {
            return Err(EptError::InvalidKey(s.to_string()));
        }
        Ok(TileKey { depth, x, y, z })
    }
}

impl Serialize for TileKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TileKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_string_round_trip() {
        let key = TileKey::new(3, 5, 0, 7);
        assert_eq!(key.to_string(), "3-5-0-7");
        assert_eq!("3-5-0-7".parse::<TileKey>().unwrap(), key);
        assert_eq!("3-5-0-7.bin".parse::<TileKey>().unwrap(), key);
        assert_eq!("3-5-0-7.json".parse::<TileKey>().unwrap(), key);
    }

    #[test]
    fn test_rejects_malformed_keys() {
        for bad in ["", "0-0-0", "0-0-0-0-0", "a-0-0-0", "1-2-0-0", "-1-0-0-0"] {
            assert!(bad.parse::<TileKey>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_children_and_parent() {
        let root = TileKey::root();
        let children = root.children();
        assert_eq!(children[0], TileKey::new(1, 0, 0, 0));
        assert_eq!(children[7], TileKey::new(1, 1, 1, 1));
        assert_eq!(children[2], TileKey::new(1, 0, 1, 0));
        for child in children {
            assert_eq!(child.parent(), Some(root));
        }
        assert_eq!(root.parent(), None);
    }

    #[test]
    fn test_child_bounds() {
        let root = BoundingVolume {
            min: [0.0, 0.0, 0.0],
            max: [1.0, 1.0, 1.0],
        };
        let first = TileKey::new(1, 0, 0, 0).bounds(&root);
        assert_eq!(first.min, [0.0, 0.0, 0.0]);
        assert_eq!(first.max, [0.5, 0.5, 0.5]);

        let last = TileKey::new(2, 3, 3, 3).bounds(&root);
        assert_eq!(last.min, [0.75, 0.75, 0.75]);
        assert_eq!(last.max, [1.0, 1.0, 1.0]);

        assert_eq!(TileKey::child_index_for(&root, [0.9, 0.1, 0.6]), 0b101);
        assert_eq!(root.center(), [0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&TileKey::new(1, 0, 1, 1)).unwrap();
        assert_eq!(json, "\"1-0-1-1\"");
        let key: TileKey = serde_json::from_str(&json).unwrap();
        assert_eq!(key, TileKey::new(1, 0, 1, 1));
    }
}
