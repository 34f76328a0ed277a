use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use pcd_core::pointcloud::point::{Metadata as LegacyMetadata, LEGACY_FILE_NAME};
use pcd_ept::{store::validate_id, EptError, EptStore};
use serde::Deserialize;

use crate::{
    config::CatalogConfig,
    error::{CatalogError, Result},
    metadata::{GroundTruth, PointCloudMetadata, Sidecar, SIDECAR_FILE_NAME},
};

/// `pointcloud.json` without its point array.
#[derive(Deserialize)]
struct LegacyHeader {
    metadata: LegacyMetadata,
}

/// Everything found in one point cloud directory.
#[derive(Debug, Clone)]
pub struct Inspection {
    pub id: String,
    pub dir: PathBuf,
    pub sidecar: Option<Sidecar>,
    pub truth: Option<GroundTruth>,
    /// Tile files present under `ept-data`.
    pub tile_count: usize,
    pub modified: Option<DateTime<Utc>>,
}

impl Inspection {
    /// Whether the converter left readable point data behind.
    pub fn has_complete_data(&self) -> bool {
        match &self.truth {
            Some(truth) => match truth.format {
                crate::StorageFormat::Ept => self.tile_count > 0 || truth.point_count == 0,
                crate::StorageFormat::Json => true,
            },
            None => false,
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.sidecar
            .as_ref()
            .and_then(|s| s.created_at)
            .or(self.modified)
    }
}

/// Metadata service over a directory of stored point clouds.
pub struct Catalog {
    config: CatalogConfig,
    store: EptStore,
}

impl Catalog {
    pub fn new(config: CatalogConfig) -> Self {
        let store = EptStore::new(config.root.clone());
        Self { config, store }
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn store(&self) -> &EptStore {
        &self.store
    }

    pub fn dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id).map_err(|_| CatalogError::InvalidId(id.to_string()))?;
        Ok(self.config.root.join(id))
    }

    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self.store.ids()?)
    }

    pub fn list(&self) -> Result<Vec<PointCloudMetadata>> {
        let mut records = Vec::new();
        for id in self.ids()? {
            match self.get(&id) {
                Ok(record) => records.push(record),
                Err(CatalogError::NotFound(_)) => {}
                Err(e) => log::warn!("skipping point cloud {}: {}", id, e),
            }
        }
        Ok(records)
    }

    /// Sidecar first, then the data files, which win on disagreement.
    pub fn get(&self, id: &str) -> Result<PointCloudMetadata> {
        let inspection = self.inspect(id)?;
        let Some(truth) = inspection
            .truth
            .clone()
            .or_else(|| inspection.sidecar.as_ref().map(Sidecar::truth))
        else {
            return Err(CatalogError::NotFound(id.to_string()));
        };

        let sidecar = inspection.sidecar.clone().unwrap_or_default();
        if inspection.sidecar.is_some() && inspection.truth.is_some() && !sidecar.agrees_with(&truth) {
            log::debug!("sidecar for {} disagrees with its data, using the data", id);
        }
        if inspection.sidecar.is_none() && self.config.persist_derived {
            let fabricated = Sidecar::from_ground_truth(
                id,
                guess_source_file(&inspection.dir),
                &truth,
                inspection.created_at().unwrap_or_else(Utc::now),
            );
            match fabricated.save(&inspection.dir.join(SIDECAR_FILE_NAME)) {
                Ok(()) => log::info!("wrote derived metadata for {}", id),
                Err(e) => log::warn!("could not persist metadata for {}: {}", id, e),
            }
        }

        Ok(PointCloudMetadata {
            id: sidecar.id.clone().unwrap_or_else(|| id.to_string()),
            source_file: sidecar
                .source_file
                .clone()
                .or_else(|| guess_source_file(&inspection.dir))
                .unwrap_or_default(),
            point_count: truth.point_count,
            bounds_min: truth.bounds_min,
            bounds_max: truth.bounds_max,
            has_normals: truth.has_normals,
            has_colors: truth.has_colors,
            format: truth.format,
            created_at: inspection.created_at().unwrap_or_else(Utc::now),
            file_size: dir_size(&inspection.dir)?,
        })
    }

    /// Gather what exists on disk for `id` without writing anything.
    pub fn inspect(&self, id: &str) -> Result<Inspection> {
        let dir = self.dir(id)?;
        if !dir.is_dir() {
            return Err(CatalogError::NotFound(id.to_string()));
        }

        let sidecar_path = dir.join(SIDECAR_FILE_NAME);
        let sidecar = if sidecar_path.is_file() {
            match Sidecar::load(&sidecar_path) {
                Ok(sidecar) => Some(sidecar),
                Err(e) => {
                    log::warn!("unreadable sidecar {:?}: {}", sidecar_path, e);
                    None
                }
            }
        } else {
            None
        };

        let mut tile_count = 0;
        let truth = match self.store.metadata(id) {
            Ok(ept) => {
                tile_count = self.store.tile_keys(id)?.len();
                Some(GroundTruth::from_ept(&ept))
            }
            Err(EptError::NotFound(_)) => read_legacy(&dir),
            Err(e) => {
                log::warn!("unreadable EPT metadata for {}: {}", id, e);
                read_legacy(&dir)
            }
        };

        let modified = fs::metadata(&dir)
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        Ok(Inspection {
            id: id.to_string(),
            dir,
            sidecar,
            truth,
            tile_count,
            modified,
        })
    }
}

fn read_legacy(dir: &Path) -> Option<GroundTruth> {
    let path = dir.join(LEGACY_FILE_NAME);
    if !path.is_file() {
        return None;
    }
    let parsed = fs::read_to_string(&path)
        .map_err(CatalogError::from)
        .and_then(|json| Ok(serde_json::from_str::<LegacyHeader>(&json)?));
    match parsed {
        Ok(header) => Some(GroundTruth::from_legacy(&header.metadata)),
        Err(e) => {
            log::warn!("unreadable {:?}: {}", path, e);
            None
        }
    }
}

/// Name of the first model file kept alongside the point data, by extension.
pub fn guess_source_file(dir: &Path) -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| {
            Path::new(name)
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| {
                    crate::config::DEFAULT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
                })
        })
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Total bytes of every file below `dir`. Walks the tree on each call.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let Some(dir) = dir.to_str() else {
        return Err(CatalogError::Io(std::io::Error::other("non UTF-8 directory path")));
    };
    let pattern = format!("{}/**/*", glob::Pattern::escape(dir));
    let entries = glob::glob(&pattern)
        .map_err(|e| CatalogError::Io(std::io::Error::other(e.to_string())))?;
    let mut total = 0;
    for path in entries.filter_map(std::result::Result::ok) {
        let metadata = fs::metadata(&path)?;
        if metadata.is_file() {
            total += metadata.len();
        }
    }
    Ok(total)
}
