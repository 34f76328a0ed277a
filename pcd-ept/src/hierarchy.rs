use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::Result, key::TileKey};

/// Point count per node. A count of `-1` marks a node whose subtree is
/// described by its own hierarchy file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hierarchy(pub BTreeMap<TileKey, i64>);

impl Hierarchy {
    pub const SUBTREE: i64 = -1;

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn insert(&mut self, key: TileKey, count: i64) {
        self.0.insert(key, count);
    }

    pub fn count(&self, key: &TileKey) -> Option<i64> {
        self.0.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The existing children of `key` with their counts.
    pub fn children_of(&self, key: &TileKey) -> Vec<(TileKey, i64)> {
        key.children()
            .into_iter()
            .filter_map(|child| self.count(&child).map(|c| (child, c)))
            .collect()
    }

    /// Sum of the known (non-negative) counts.
    pub fn total_points(&self) -> u64 {
        self.0.values().filter(|&&c| c > 0).map(|&c| c as u64).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TileKey, &i64)> {
        self.0.iter()
    }
}
