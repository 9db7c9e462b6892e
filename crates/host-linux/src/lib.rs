mod lsblk;
mod md;

pub use lsblk::{parse_lsblk_json, Lsblk};
pub use md::SysfsMd;

use mdsentinel_core::{Collector, Monitor};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("cannot read md status {} for {array}: {source}", path.display())]
    ArrayStatusUnreadable {
        array: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to run lsblk: {0}")]
    InventoryToolSpawn(#[source] io::Error),

    #[error("lsblk exited with {status}: {stderr}")]
    InventoryToolFailed { status: String, stderr: String },

    #[error("cannot parse lsblk output: {0}")]
    InventoryParse(#[from] serde_json::Error),
}

/// Where the host's device data lives. Tests point these at a temp tree.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub sysfs_root: PathBuf,
    pub lsblk_path: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys"),
            lsblk_path: PathBuf::from("lsblk"),
        }
    }
}

pub fn inventory_collector(paths: &HostPaths) -> Collector<Lsblk> {
    Collector::new(Lsblk::new(paths.lsblk_path.clone(), paths.sysfs_root.clone()))
}

pub fn health_monitor(paths: &HostPaths, managed_level: &str) -> Monitor<SysfsMd> {
    Monitor::with_level(SysfsMd::new(paths.sysfs_root.clone()), managed_level)
}
