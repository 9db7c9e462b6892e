use crate::ProbeError;
use anyhow::Result;
use mdsentinel_core::{DeviceRecord, InventorySource, IoStatistics, RawDeviceRecord};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<BlockDev>,
}

#[derive(Debug, Deserialize)]
struct BlockDev {
    name: String,
    kname: Option<String>,
    #[serde(rename = "type")]
    dtype: String,
    #[serde(rename = "maj:min")]
    maj_min: Option<String>,
    size: Option<Value>,  // number with --bytes on recent util-linux, string on older
    model: Option<String>,
    vendor: Option<String>,
    serial: Option<String>,
    rota: Option<Value>,  // bool, or "0"/"1" on older util-linux
    tran: Option<String>,
    hctl: Option<String>,
    fstype: Option<String>,
    #[serde(default)]
    children: Vec<BlockDev>,
}

/// Inventory source backed by `lsblk --json --output-all --bytes`.
#[derive(Debug, Clone)]
pub struct Lsblk {
    program: PathBuf,
    sysfs_root: PathBuf,
}

impl Lsblk {
    pub fn new(program: impl Into<PathBuf>, sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            sysfs_root: sysfs_root.into(),
        }
    }

    fn run(&self) -> Result<String> {
        let out = Command::new(&self.program)
            .args(["--json", "--output-all", "--bytes"])
            .output()
            .map_err(ProbeError::InventoryToolSpawn)?;
        if !out.status.success() {
            return Err(ProbeError::InventoryToolFailed {
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    fn statistics(&self, kname: &str) -> Option<IoStatistics> {
        let path = self.sysfs_root.join("class/block").join(kname).join("stat");
        let line = fs::read_to_string(&path).ok()?;
        IoStatistics::parse(&line)
    }
}

impl Default for Lsblk {
    fn default() -> Self {
        Self::new("lsblk", "/sys")
    }
}

impl InventorySource for Lsblk {
    fn enumerate(&self, filters: &BTreeMap<String, String>) -> Result<Vec<RawDeviceRecord>> {
        let json = self.run()?;
        let devices = parse_lsblk_json(&json)?;
        debug!(devices = devices.len(), "lsblk enumerated");
        Ok(devices
            .into_iter()
            .filter(|device| device.matches(filters))
            .map(|device| RawDeviceRecord {
                statistics: self.statistics(&device.kname),
                device,
            })
            .collect())
    }
}

/// Flattens lsblk's device tree into one record per device name.
///
/// A device reached through several parents (an md array over two
/// partitions) is listed once with every parent recorded.
pub fn parse_lsblk_json(json: &str) -> Result<Vec<DeviceRecord>, ProbeError> {
    let parsed: LsblkOutput = serde_json::from_str(json)?;
    let mut by_name: BTreeMap<String, DeviceRecord> = BTreeMap::new();
    for dev in &parsed.blockdevices {
        flatten(dev, None, &mut by_name);
    }
    Ok(by_name
        .into_values()
        .map(|mut device| {
            device.children.sort();
            device.children.dedup();
            device.parents.sort();
            device.parents.dedup();
            device
        })
        .collect())
}

fn flatten(dev: &BlockDev, parent: Option<&str>, out: &mut BTreeMap<String, DeviceRecord>) {
    let children: Vec<String> = dev.children.iter().map(|child| child.name.clone()).collect();
    match out.get_mut(&dev.name) {
        Some(existing) => {
            existing.children.extend(children);
            existing.parents.extend(parent.map(str::to_string));
        }
        None => {
            let record = DeviceRecord {
                name: dev.name.clone(),
                kname: dev.kname.clone().unwrap_or_else(|| dev.name.clone()),
                device_type: dev.dtype.clone(),
                maj_min: dev.maj_min.clone().unwrap_or_default(),
                size_bytes: dev.size.as_ref().and_then(value_u64),
                model: clean(&dev.model),
                vendor: clean(&dev.vendor),
                serial: clean(&dev.serial),
                rotational: dev.rota.as_ref().map(value_bool).unwrap_or(false),
                transport: clean(&dev.tran),
                hctl: clean(&dev.hctl),
                fstype: clean(&dev.fstype),
                children,
                parents: parent.map(str::to_string).into_iter().collect(),
            };
            out.insert(dev.name.clone(), record);
        }
    }
    for child in &dev.children {
        flatten(child, Some(&dev.name), out);
    }
}

// lsblk pads vendor/model with spaces
fn clean(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn value_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn value_bool(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_u64() == Some(1),
        Value::String(text) => text.trim() == "1",
        _ => false,
    }
}
