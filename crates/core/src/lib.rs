//! Shared model for mdsentinel: block-device inventory snapshots, md array
//! health, and the collaborator traits the reconciliation engine drives.

mod health;
mod inventory;

pub use health::{classify, ArrayHealth, ArrayHealthState, HealthCategory};
pub use inventory::{DeviceRecord, InventoryDiff, InventorySnapshot, IoStatistics, RawDeviceRecord};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

pub const SNAPSHOT_SCHEMA_VERSION: &str = "1.0.0";
pub const MANAGED_LEVEL: &str = "raid1";

/// Enumerates block devices. An empty filter map means every device.
pub trait InventorySource {
    fn enumerate(&self, filters: &BTreeMap<String, String>) -> Result<Vec<RawDeviceRecord>>;
}

/// Per-array status as exposed by the kernel md driver.
pub trait ArrayStatusSource {
    fn list_arrays(&self) -> Result<Vec<String>>;
    fn array_type(&self, array_id: &str) -> Result<String>;
    fn array_state(&self, array_id: &str) -> Result<String>;
}

pub trait InventoryCollector {
    fn collect(&self) -> Result<InventorySnapshot>;
}

pub trait ArrayHealthMonitor {
    fn check_all(&self) -> Result<ArrayHealthState>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    Written,
    PermissionDenied,
}

pub trait SnapshotStore {
    fn load(&self) -> Result<Option<InventorySnapshot>>;
    fn save(&self, snapshot: &InventorySnapshot) -> Result<SaveStatus>;
}

pub trait IncidentManager {
    fn has_open_incident(&self) -> Result<bool>;
    fn create_incident(&self, details: &IncidentDetails) -> Result<IncidentId>;
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct IncidentId(pub String);

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DegradedArray {
    pub array_id: String,
    pub raw_state: String,
    pub category: HealthCategory,
}

/// Incident payload. Placeholder schema until the ticket format is settled.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IncidentDetails {
    pub summary: String,
    pub implicated_devices: Vec<String>,
    pub degraded_arrays: Vec<DegradedArray>,
    pub detected_at_utc: String,
}

impl IncidentDetails {
    pub fn new(diff: &InventoryDiff, health: &ArrayHealthState) -> Self {
        let degraded_arrays: Vec<DegradedArray> = health
            .unhealthy()
            .into_iter()
            .map(|(id, array)| DegradedArray {
                array_id: id.clone(),
                raw_state: array.raw_state.clone(),
                category: array.category,
            })
            .collect();
        let implicated_devices = diff.implicated();
        let arrays: Vec<&str> = degraded_arrays.iter().map(|a| a.array_id.as_str()).collect();
        let summary = format!(
            "md arrays not read-write ({}); inventory changed for: {}",
            arrays.join(", "),
            implicated_devices.join(", ")
        );
        Self {
            summary,
            implicated_devices,
            degraded_arrays,
            detected_at_utc: now_utc_rfc3339(),
        }
    }
}

/// Inventory collector over any [`InventorySource`]: full enumeration, statistics stripped.
pub struct Collector<S> {
    source: S,
}

impl<S: InventorySource> Collector<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }
}

impl<S: InventorySource> InventoryCollector for Collector<S> {
    fn collect(&self) -> Result<InventorySnapshot> {
        let records = self
            .source
            .enumerate(&BTreeMap::new())
            .context("enumerate block devices")?;
        Ok(InventorySnapshot::from_raw(records))
    }
}

/// Health monitor over any [`ArrayStatusSource`], restricted to one md level.
pub struct Monitor<S> {
    source: S,
    managed_level: String,
}

impl<S: ArrayStatusSource> Monitor<S> {
    pub fn new(source: S) -> Self {
        Self::with_level(source, MANAGED_LEVEL)
    }

    pub fn with_level(source: S, managed_level: impl Into<String>) -> Self {
        Self {
            source,
            managed_level: managed_level.into(),
        }
    }
}

impl<S: ArrayStatusSource> ArrayHealthMonitor for Monitor<S> {
    fn check_all(&self) -> Result<ArrayHealthState> {
        let mut state = ArrayHealthState::new();
        for array_id in self.source.list_arrays()? {
            let level = self.source.array_type(&array_id)?;
            let level = level.trim();
            if !level.is_empty() && level != self.managed_level {
                debug!(array = %array_id, level = %level, "skipping unmanaged array");
                continue;
            }
            let raw = self.source.array_state(&array_id)?;
            let mut health = ArrayHealth::from_raw(&raw);
            // An array that never started has no personality and reports no level.
            if level.is_empty() {
                warn!(array = %array_id, state = %health.raw_state, "array has no level; treating as failed");
                health.category = HealthCategory::Error;
            }
            debug!(array = %array_id, state = %health.raw_state, category = %health.category, "array health");
            state.insert(array_id, health);
        }
        Ok(state)
    }
}

pub fn now_utc_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
