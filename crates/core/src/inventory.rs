use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One block device as reported by the inventory tool, minus anything volatile.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub name: String,
    pub kname: String,
    pub device_type: String,       // "disk", "part", "raid1", ...
    pub maj_min: String,
    pub size_bytes: Option<u64>,
    pub model: Option<String>,
    pub vendor: Option<String>,
    pub serial: Option<String>,
    pub rotational: bool,
    pub transport: Option<String>,
    pub hctl: Option<String>,
    pub fstype: Option<String>,
    pub children: Vec<String>,     // names, lookup only
    pub parents: Vec<String>,
}

impl DeviceRecord {
    pub fn new(name: impl Into<String>, device_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            kname: name.clone(),
            name,
            device_type: device_type.into(),
            maj_min: String::new(),
            size_bytes: None,
            model: None,
            vendor: None,
            serial: None,
            rotational: false,
            transport: None,
            hctl: None,
            fstype: None,
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Looks up an attribute by its lsblk column name. Used for filter matching.
    pub fn attribute(&self, key: &str) -> Option<String> {
        match key {
            "name" => Some(self.name.clone()),
            "kname" => Some(self.kname.clone()),
            "type" => Some(self.device_type.clone()),
            "maj:min" => Some(self.maj_min.clone()),
            "size" => self.size_bytes.map(|size| size.to_string()),
            "model" => self.model.clone(),
            "vendor" => self.vendor.clone(),
            "serial" => self.serial.clone(),
            "rota" => Some(if self.rotational { "1" } else { "0" }.to_string()),
            "tran" => self.transport.clone(),
            "hctl" => self.hctl.clone(),
            "fstype" => self.fstype.clone(),
            _ => None,
        }
    }

    pub fn matches(&self, filters: &BTreeMap<String, String>) -> bool {
        filters
            .iter()
            .all(|(key, value)| self.attribute(key).as_deref() == Some(value.as_str()))
    }

    fn canonicalize(&mut self) {
        self.children.sort();
        self.children.dedup();
        self.parents.sort();
        self.parents.dedup();
    }

    fn absorb_relations(&mut self, other: DeviceRecord) {
        self.children.extend(other.children);
        self.parents.extend(other.parents);
    }
}

/// Per-device I/O counters from `/sys/class/block/<dev>/stat`.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct IoStatistics {
    pub read_ios: u64,
    pub read_merges: u64,
    pub read_sectors: u64,
    pub read_ticks_ms: u64,
    pub write_ios: u64,
    pub write_merges: u64,
    pub write_sectors: u64,
    pub write_ticks_ms: u64,
    pub in_flight: u64,
    pub io_ticks_ms: u64,
    pub time_in_queue_ms: u64,
}

impl IoStatistics {
    /// Parses the whitespace separated counters of a block `stat` file.
    /// Newer kernels append discard/flush columns, which are ignored.
    pub fn parse(line: &str) -> Option<Self> {
        let values: Vec<u64> = line
            .split_whitespace()
            .map(|field| field.parse::<u64>())
            .collect::<Result<_, _>>()
            .ok()?;
        if values.len() < 11 {
            return None;
        }
        Some(Self {
            read_ios: values[0],
            read_merges: values[1],
            read_sectors: values[2],
            read_ticks_ms: values[3],
            write_ios: values[4],
            write_merges: values[5],
            write_sectors: values[6],
            write_ticks_ms: values[7],
            in_flight: values[8],
            io_ticks_ms: values[9],
            time_in_queue_ms: values[10],
        })
    }
}

/// A device as the inventory tool hands it over, statistics included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDeviceRecord {
    pub device: DeviceRecord,
    pub statistics: Option<IoStatistics>,
}

impl RawDeviceRecord {
    pub fn strip(self) -> DeviceRecord {
        self.device
    }
}

/// Canonical, comparable view of the host's block devices.
///
/// Records are kept sorted by name with duplicate names merged and
/// relation lists sorted, so equality does not depend on enumeration order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(from = "Vec<DeviceRecord>", into = "Vec<DeviceRecord>")]
pub struct InventorySnapshot {
    devices: Vec<DeviceRecord>,
}

impl InventorySnapshot {
    pub fn new(records: impl IntoIterator<Item = DeviceRecord>) -> Self {
        let mut by_name: BTreeMap<String, DeviceRecord> = BTreeMap::new();
        for record in records {
            match by_name.get_mut(&record.name) {
                Some(existing) => existing.absorb_relations(record),
                None => {
                    by_name.insert(record.name.clone(), record);
                }
            }
        }
        let devices = by_name
            .into_values()
            .map(|mut device| {
                device.canonicalize();
                device
            })
            .collect();
        Self { devices }
    }

    /// Builds a snapshot from tool output, dropping the volatile statistics.
    pub fn from_raw(records: impl IntoIterator<Item = RawDeviceRecord>) -> Self {
        Self::new(records.into_iter().map(RawDeviceRecord::strip))
    }

    pub fn devices(&self) -> &[DeviceRecord] {
        &self.devices
    }

    pub fn get(&self, name: &str) -> Option<&DeviceRecord> {
        self.devices
            .binary_search_by(|device| device.name.as_str().cmp(name))
            .ok()
            .map(|idx| &self.devices[idx])
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Compares `self` (the baseline) against `current`.
    pub fn diff(&self, current: &InventorySnapshot) -> InventoryDiff {
        let mut diff = InventoryDiff::default();
        for device in &self.devices {
            match current.get(&device.name) {
                None => diff.removed.push(device.name.clone()),
                Some(other) if other != device => diff.changed.push(device.name.clone()),
                Some(_) => {}
            }
        }
        for device in &current.devices {
            if self.get(&device.name).is_none() {
                diff.added.push(device.name.clone());
            }
        }
        diff
    }
}

impl From<Vec<DeviceRecord>> for InventorySnapshot {
    fn from(records: Vec<DeviceRecord>) -> Self {
        Self::new(records)
    }
}

impl From<InventorySnapshot> for Vec<DeviceRecord> {
    fn from(snapshot: InventorySnapshot) -> Self {
        snapshot.devices
    }
}

/// Device names that differ between a baseline and the live inventory.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct InventoryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl InventoryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn implicated(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self
            .added
            .iter()
            .chain(&self.removed)
            .chain(&self.changed)
            .collect();
        all.into_iter().cloned().collect()
    }
}
