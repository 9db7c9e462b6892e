//! Durable storage for the trusted inventory baseline.
//!
//! The baseline is a JSON envelope carrying a schema version and a SHA-256
//! of the device list. Writes go to a temp file in the same directory and
//! are renamed into place, so a reader sees either the old or the new
//! baseline, never a torn one.

use anyhow::{Context, Result};
use mdsentinel_core::{
    now_utc_rfc3339, InventorySnapshot, SaveStatus, SnapshotStore, SNAPSHOT_SCHEMA_VERSION,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BASELINE_PATH: &str = "/var/lib/mdsentinel/baseline.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("baseline {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("baseline {} has unsupported schema version {found}", path.display())]
    UnsupportedSchema { path: PathBuf, found: String },
}

/// Baseline as persisted, with its metadata.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredBaseline {
    pub schema_version: String,
    pub captured_at_utc: String,
    pub sha256: String,
    pub devices: InventorySnapshot,
}

impl StoredBaseline {
    fn new(snapshot: &InventorySnapshot) -> Result<Self> {
        Ok(Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            captured_at_utc: now_utc_rfc3339(),
            sha256: digest(snapshot)?,
            devices: snapshot.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the baseline envelope. `None` when nothing was ever written.
    pub fn load_stored(&self) -> Result<Option<StoredBaseline>> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no baseline stored");
                return Ok(None);
            }
            Err(err) => {
                return Err(err).with_context(|| format!("read {}", self.path.display()));
            }
        };
        let stored: StoredBaseline =
            serde_json::from_slice(&bytes).map_err(|err| StoreError::Corrupt {
                path: self.path.clone(),
                reason: err.to_string(),
            })?;
        if stored.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedSchema {
                path: self.path.clone(),
                found: stored.schema_version,
            }
            .into());
        }
        let actual = digest(&stored.devices)?;
        if actual != stored.sha256 {
            return Err(StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("digest mismatch: recorded {}, computed {}", stored.sha256, actual),
            }
            .into());
        }
        Ok(Some(stored))
    }
}

impl Default for FileSnapshotStore {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_PATH)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn load(&self) -> Result<Option<InventorySnapshot>> {
        Ok(self.load_stored()?.map(|stored| stored.devices))
    }

    fn save(&self, snapshot: &InventorySnapshot) -> Result<SaveStatus> {
        let stored = StoredBaseline::new(snapshot)?;
        let json = serde_json::to_vec_pretty(&stored).context("serialize baseline")?;
        let status = save_status(&self.path, write_atomic(&self.path, &json))?;
        if status == SaveStatus::Written {
            info!(
                path = %self.path.display(),
                devices = snapshot.len(),
                sha256 = %stored.sha256,
                "baseline written"
            );
        }
        Ok(status)
    }
}

/// Permission denied is reported, not raised: the next scheduled run retries.
fn save_status(path: &Path, written: io::Result<()>) -> Result<SaveStatus> {
    match written {
        Ok(()) => Ok(SaveStatus::Written),
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            warn!(
                path = %path.display(),
                error = %err,
                "baseline not written: root privileges are required"
            );
            Ok(SaveStatus::PermissionDenied)
        }
        Err(err) => Err(err).with_context(|| format!("write {}", path.display())),
    }
}

fn digest(snapshot: &InventorySnapshot) -> Result<String> {
    let canonical = serde_json::to_vec(snapshot).context("serialize devices")?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "baseline".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let temp_path = temp_path_for(path);
    let result = write_and_rename(&temp_path, path, data);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_and_rename(temp_path: &Path, path: &Path, data: &[u8]) -> io::Result<()> {
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(temp_path, path)?;
    // Best effort: persist the rename itself.
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}
