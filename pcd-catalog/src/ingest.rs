use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use chrono::Utc;

use crate::{
    catalog::Catalog,
    config::CatalogConfig,
    error::{CatalogError, Result, ValidationError},
    metadata::{GroundTruth, PointCloudMetadata, Sidecar, SIDECAR_FILE_NAME},
};

/// Reject an upload before anything is written or converted.
pub fn validate_upload(path: &Path, requested_points: u64, config: &CatalogConfig) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if !config.is_allowed_extension(ext) {
        return Err(ValidationError::UnsupportedExtension(ext.to_string()).into());
    }
    if requested_points == 0 || requested_points > config.max_point_count {
        return Err(ValidationError::PointCountOutOfRange {
            requested: requested_points,
            max: config.max_point_count,
        }
        .into());
    }
    let size = fs::metadata(path)?.len();
    if size == 0 {
        return Err(ValidationError::EmptyFile.into());
    }
    if size > config.max_upload_bytes {
        return Err(ValidationError::FileTooLarge {
            size,
            limit: config.max_upload_bytes,
        }
        .into());
    }
    Ok(())
}

/// The external model to point cloud converter, run as a subprocess.
#[derive(Debug, Clone)]
pub struct Converter {
    program: PathBuf,
    leading_args: Vec<OsString>,
    strategy: Option<String>,
}

impl Converter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            strategy: None,
        }
    }

    /// Arguments placed before the converter's own flags, e.g. a script path.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    pub fn command(&self, input: &Path, output: &Path, point_count: u64) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .arg("--input")
            .arg(input)
            .arg("--output")
            .arg(output)
            .args(["--format", "ept"])
            .arg("--point-count")
            .arg(point_count.to_string());
        if let Some(strategy) = &self.strategy {
            command.arg("--strategy").arg(strategy);
        }
        command
    }

    pub fn run(&self, input: &Path, output: &Path, point_count: u64) -> Result<()> {
        log::info!("converting {:?} into {:?}", input, output);
        let result = self.command(input, output, point_count).output()?;
        if !result.status.success() {
            return Err(CatalogError::Converter {
                status: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

impl Catalog {
    /// Validate an uploaded model, convert it into `<root>/<id>`, and record
    /// its metadata.
    pub fn ingest(
        &self,
        converter: &Converter,
        upload: &Path,
        id: &str,
        point_count: u64,
    ) -> Result<PointCloudMetadata> {
        let dir = self.dir(id)?;
        validate_upload(upload, point_count, self.config())?;

        fs::create_dir_all(&dir)?;
        if let Err(e) = converter.run(upload, &dir, point_count) {
            log::error!("conversion of {} failed: {}", id, e);
            return Err(e);
        }

        let ept = self.store().metadata(id)?;
        let source_file = upload
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        let sidecar =
            Sidecar::from_ground_truth(id, source_file, &GroundTruth::from_ept(&ept), Utc::now());
        sidecar.save(&dir.join(SIDECAR_FILE_NAME))?;
        self.get(id)
    }
}
