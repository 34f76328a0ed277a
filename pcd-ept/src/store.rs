use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    error::{EptError, Result},
    hierarchy::Hierarchy,
    key::TileKey,
    metadata::{DataType, EptMetadata},
    tile::{TileLayout, TilePoints},
    DATA_DIR, EPT_FILE_NAME, HIERARCHY_DIR,
};

/// Read side of the tiled store. Tiles are written once by the converter,
/// so reads need no coordination beyond whole-file reads.
#[derive(Debug, Clone)]
pub struct EptStore {
    root: PathBuf,
}

/// Ids are single path components.
pub fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
        && !id.contains('\0');
    if valid {
        Ok(())
    } else {
        Err(EptError::InvalidId(id.to_string()))
    }
}

impl EptStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    pub fn ept_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.dir(id)?.join(EPT_FILE_NAME))
    }

    pub fn tile_path(&self, id: &str, key: &TileKey) -> Result<PathBuf> {
        Ok(self.dir(id)?.join(DATA_DIR).join(format!("{key}.bin")))
    }

    pub fn hierarchy_path(&self, id: &str, key: &TileKey) -> Result<PathBuf> {
        Ok(self.dir(id)?.join(HIERARCHY_DIR).join(format!("{key}.json")))
    }

    /// Whether `id` has EPT metadata on disk.
    pub fn exists(&self, id: &str) -> bool {
        self.ept_path(id).map(|p| p.is_file()).unwrap_or(false)
    }

    pub fn metadata(&self, id: &str) -> Result<EptMetadata> {
        let path = self.ept_path(id)?;
        if !path.is_file() {
            return Err(EptError::NotFound(format!("{id}/{EPT_FILE_NAME}")));
        }
        EptMetadata::load(&path)
    }

    pub fn layout(&self, id: &str) -> Result<TileLayout> {
        let metadata = self.metadata(id)?;
        if metadata.data_type != DataType::Binary {
            return Err(EptError::UnsupportedDataType(format!(
                "{:?}",
                metadata.data_type
            )));
        }
        TileLayout::from_schema(&metadata.schema)
    }

    /// Tile bytes exactly as stored, after checking they hold whole records.
    pub fn raw_tile(&self, id: &str, key: &TileKey) -> Result<Vec<u8>> {
        let layout = self.layout(id)?;
        let bytes = self.read_tile_file(id, key)?;
        layout.point_count(key, bytes.len())?;
        Ok(bytes)
    }

    pub fn tile(&self, id: &str, key: &TileKey) -> Result<TilePoints> {
        let layout = self.layout(id)?;
        let bytes = self.read_tile_file(id, key)?;
        layout.decode(key, &bytes)
    }

    pub fn hierarchy(&self, id: &str, key: &TileKey) -> Result<Hierarchy> {
        let path = self.hierarchy_path(id, key)?;
        if !path.is_file() {
            return Err(EptError::NotFound(format!("{id}/{HIERARCHY_DIR}/{key}.json")));
        }
        Hierarchy::load(&path)
    }

    /// Keys of every tile file present, sorted.
    pub fn tile_keys(&self, id: &str) -> Result<Vec<TileKey>> {
        let data_dir = self.dir(id)?.join(DATA_DIR);
        let Some(data_dir) = data_dir.to_str() else {
            return Err(EptError::InvalidId(id.to_string()));
        };
        // Ids and roots may contain glob metacharacters.
        let pattern = format!("{}/*.bin", glob::Pattern::escape(data_dir));
        let mut keys = Vec::new();
        let entries = glob::glob(&pattern)
            .map_err(|e| EptError::Io(std::io::Error::other(e.to_string())))?;
        for entry in entries.filter_map(std::result::Result::ok) {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match name.parse::<TileKey>() {
                Ok(key) => keys.push(key),
                Err(_) => log::warn!("ignoring unexpected tile file {:?}", entry),
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Directory names directly under the root, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.root.is_dir() {
            return Ok(ids);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_id(name).is_ok() && !name.starts_with('.') {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read_tile_file(&self, id: &str, key: &TileKey) -> Result<Vec<u8>> {
        let path = self.tile_path(id, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EptError::NotFound(format!("{id}/{DATA_DIR}/{key}.bin")))
            }
            Err(e) => Err(e.into()),
        }
    }
}
