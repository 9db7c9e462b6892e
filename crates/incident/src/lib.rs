use anyhow::{Context, Result};
use mdsentinel_core::{now_utc_rfc3339, IncidentDetails, IncidentId, IncidentManager};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_INCIDENT_DIR: &str = "/var/lib/mdsentinel/incidents";

#[derive(Debug, Error)]
pub enum IncidentError {
    #[error("incident backend {} unavailable: {source}", dir.display())]
    Unavailable {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("incident record {} is unreadable: {reason}", path.display())]
    BadRecord { path: PathBuf, reason: String },

    #[error("no incident with id {0}")]
    NotFound(String),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Resolved,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IncidentRecord {
    pub id: IncidentId,
    pub status: IncidentStatus,
    pub created_at_utc: String,
    pub resolved_at_utc: Option<String>,
    pub details: IncidentDetails,
}

/// Incident backend keeping one JSON record per incident in a directory.
#[derive(Debug, Clone)]
pub struct FileIncidentStore {
    dir: PathBuf,
}

impl FileIncidentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn unavailable(&self, source: io::Error) -> IncidentError {
        IncidentError::Unavailable {
            dir: self.dir.clone(),
            source,
        }
    }

    /// All incidents, oldest first. A missing directory holds no incidents.
    pub fn list(&self) -> Result<Vec<IncidentRecord>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(self.unavailable(err).into()),
        };
        let mut records = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| self.unavailable(err))?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            records.push(read_record(&path)?);
        }
        records.sort_by(|a, b| {
            a.created_at_utc
                .cmp(&b.created_at_utc)
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        Ok(records)
    }

    pub fn resolve(&self, id: &str) -> Result<IncidentRecord> {
        let path = self.record_path(id);
        if !path.exists() {
            return Err(IncidentError::NotFound(id.to_string()).into());
        }
        let mut record = read_record(&path)?;
        if record.status == IncidentStatus::Resolved {
            warn!(incident = %record.id, "incident already resolved");
            return Ok(record);
        }
        record.status = IncidentStatus::Resolved;
        record.resolved_at_utc = Some(now_utc_rfc3339());
        self.write_record(&record)?;
        info!(incident = %record.id, "incident resolved");
        Ok(record)
    }

    fn write_record(&self, record: &IncidentRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|err| self.unavailable(err))?;
        let path = self.record_path(&record.id.0);
        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(record).context("serialize incident")?;
        fs::write(&temp_path, json).map_err(|err| self.unavailable(err))?;
        fs::rename(&temp_path, &path).map_err(|err| self.unavailable(err))?;
        Ok(())
    }
}

impl Default for FileIncidentStore {
    fn default() -> Self {
        Self::new(DEFAULT_INCIDENT_DIR)
    }
}

impl IncidentManager for FileIncidentStore {
    fn has_open_incident(&self) -> Result<bool> {
        Ok(self
            .list()?
            .iter()
            .any(|record| record.status == IncidentStatus::Open))
    }

    fn create_incident(&self, details: &IncidentDetails) -> Result<IncidentId> {
        let record = IncidentRecord {
            id: IncidentId(Uuid::new_v4().to_string()),
            status: IncidentStatus::Open,
            created_at_utc: now_utc_rfc3339(),
            resolved_at_utc: None,
            details: details.clone(),
        };
        self.write_record(&record)?;
        info!(
            incident = %record.id,
            devices = ?details.implicated_devices,
            "incident opened"
        );
        Ok(record.id)
    }
}

fn read_record(path: &Path) -> Result<IncidentRecord> {
    let data = fs::read_to_string(path).map_err(|err| IncidentError::BadRecord {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    let record = serde_json::from_str(&data).map_err(|err| IncidentError::BadRecord {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    Ok(record)
}
