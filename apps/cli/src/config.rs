//! Settings from `/etc/mdsentinel/config.toml`, overridable on the command line.

use anyhow::{Context, Result};
use mdsentinel_core::MANAGED_LEVEL;
use mdsentinel_host_linux::HostPaths;
use mdsentinel_incident::DEFAULT_INCIDENT_DIR;
use mdsentinel_store::DEFAULT_BASELINE_PATH;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_PATH: &str = "/etc/mdsentinel/config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    #[serde(default = "default_baseline_path")]
    pub baseline_path: PathBuf,

    #[serde(default = "default_incident_dir")]
    pub incident_dir: PathBuf,

    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,

    #[serde(default = "default_lsblk_path")]
    pub lsblk_path: PathBuf,

    /// md level under management; arrays of other levels are ignored.
    #[serde(default = "default_managed_level")]
    pub managed_level: String,
}

fn default_baseline_path() -> PathBuf {
    PathBuf::from(DEFAULT_BASELINE_PATH)
}

fn default_incident_dir() -> PathBuf {
    PathBuf::from(DEFAULT_INCIDENT_DIR)
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_lsblk_path() -> PathBuf {
    PathBuf::from("lsblk")
}

fn default_managed_level() -> String {
    MANAGED_LEVEL.to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            baseline_path: default_baseline_path(),
            incident_dir: default_incident_dir(),
            sysfs_root: default_sysfs_root(),
            lsblk_path: default_lsblk_path(),
            managed_level: default_managed_level(),
        }
    }
}

impl MonitorConfig {
    /// Loads `path`. A missing file means defaults unless the caller named it explicitly.
    pub fn load(path: &Path, explicit: bool) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("parse config {}", path.display())),
            Err(err) if err.kind() == io::ErrorKind::NotFound && !explicit => {
                debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("read config {}", path.display())),
        }
    }

    pub fn host_paths(&self) -> HostPaths {
        HostPaths {
            sysfs_root: self.sysfs_root.clone(),
            lsblk_path: self.lsblk_path.clone(),
        }
    }
}
