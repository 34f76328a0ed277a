use std::fmt;
use std::fs;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    catalog::{guess_source_file, Catalog, Inspection},
    error::Result,
    metadata::{Sidecar, StorageFormat, SIDECAR_FILE_NAME},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum FlagReason {
    /// No readable point data; may still be converting.
    MissingData,
    /// No readable point data and older than the retention threshold.
    Expired { age_hours: i64 },
}

impl fmt::Display for FlagReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagReason::MissingData => write!(f, "point data missing"),
            FlagReason::Expired { age_hours } => {
                write!(f, "no completed data after {} hours", age_hours)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flagged {
    pub id: String,
    #[serde(flatten)]
    pub reason: FlagReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    /// Sidecars written from scratch.
    pub fabricated: Vec<String>,
    /// Existing sidecars with fields filled in or corrected.
    pub patched: Vec<String>,
    pub flagged: Vec<Flagged>,
}

impl RepairReport {
    pub fn expired(&self) -> impl Iterator<Item = &Flagged> {
        self.flagged
            .iter()
            .filter(|f| matches!(f.reason, FlagReason::Expired { .. }))
    }
}

impl Catalog {
    /// Consistency pass over every directory. Rewrites sidecar records
    /// where needed; never touches point data and never deletes.
    pub fn audit(&self, now: DateTime<Utc>) -> Result<RepairReport> {
        let mut report = RepairReport::default();
        for id in self.ids()? {
            let inspection = self.inspect(&id)?;
            if !inspection.has_complete_data() {
                report.flagged.push(self.flag(&inspection, now));
            }
            if inspection.truth.is_some() {
                self.repair_sidecar(&inspection, &mut report)?;
            }
        }
        Ok(report)
    }

    fn flag(&self, inspection: &Inspection, now: DateTime<Utc>) -> Flagged {
        let age = inspection.created_at().map(|created| now - created);
        let reason = match age {
            Some(age) if age > self.config().retention => FlagReason::Expired {
                age_hours: age.num_hours(),
            },
            _ => FlagReason::MissingData,
        };
        log::warn!("{}: {}", inspection.id, reason);
        Flagged {
            id: inspection.id.clone(),
            reason,
        }
    }

    fn repair_sidecar(&self, inspection: &Inspection, report: &mut RepairReport) -> Result<()> {
        let Some(truth) = &inspection.truth else {
            return Ok(());
        };
        let path = inspection.dir.join(SIDECAR_FILE_NAME);

        let Some(existing) = &inspection.sidecar else {
            let sidecar = Sidecar::from_ground_truth(
                &inspection.id,
                guess_source_file(&inspection.dir),
                truth,
                inspection.created_at().unwrap_or_else(Utc::now),
            );
            sidecar.save(&path)?;
            log::info!("fabricated metadata for {}", inspection.id);
            report.fabricated.push(inspection.id.clone());
            return Ok(());
        };

        let mut patched = existing.clone();
        if patched.id.as_deref().map_or(true, str::is_empty) {
            patched.id = Some(inspection.id.clone());
        }
        if patched.source_file.as_deref().map_or(true, str::is_empty) {
            patched.source_file = guess_source_file(&inspection.dir).or(patched.source_file);
        }
        if patched.format.is_none() {
            patched.format = Some(StorageFormat::default());
        }
        if patched.created_at.is_none() {
            patched.created_at = inspection.modified;
        }
        if !patched.agrees_with(truth) {
            patched.apply(truth);
        }

        if patched != *existing {
            patched.save(&path)?;
            log::info!("patched metadata for {}", inspection.id);
            report.patched.push(inspection.id.clone());
        }
        Ok(())
    }

    /// Delete directories the audit found expired. Only ever run on request.
    pub fn sweep(&self, report: &RepairReport) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for flagged in report.expired() {
            let dir = self.dir(&flagged.id)?;
            if !dir.is_dir() {
                continue;
            }
            // Data may have landed since the audit ran.
            if self.inspect(&flagged.id)?.has_complete_data() {
                log::info!("keeping {}, its data is now complete", flagged.id);
                continue;
            }
            fs::remove_dir_all(&dir)?;
            log::info!("removed expired point cloud {}", flagged.id);
            removed.push(flagged.id.clone());
        }
        Ok(removed)
    }
}
