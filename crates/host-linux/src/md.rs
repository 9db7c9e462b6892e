use crate::ProbeError;
use anyhow::{Context, Result};
use mdsentinel_core::ArrayStatusSource;
use std::fs;
use std::path::{Path, PathBuf};

/// md array status read from `<sysfs>/block/md*/md/`.
#[derive(Debug, Clone)]
pub struct SysfsMd {
    sysfs_root: PathBuf,
}

impl SysfsMd {
    pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
        }
    }

    fn md_dir(&self, array_id: &str) -> PathBuf {
        self.sysfs_root.join("block").join(array_id).join("md")
    }

    fn read_attribute(&self, array_id: &str, attribute: &str) -> Result<String> {
        let path = self.md_dir(array_id).join(attribute);
        read_token(&path).map_err(|source| {
            ProbeError::ArrayStatusUnreadable {
                array: array_id.to_string(),
                path,
                source,
            }
            .into()
        })
    }
}

impl Default for SysfsMd {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl ArrayStatusSource for SysfsMd {
    fn list_arrays(&self) -> Result<Vec<String>> {
        let block = self.sysfs_root.join("block");
        let mut arrays = Vec::new();
        let entries =
            fs::read_dir(&block).with_context(|| format!("read {}", block.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("md") && entry.path().join("md").is_dir() {
                arrays.push(name);
            }
        }
        arrays.sort();
        Ok(arrays)
    }

    fn array_type(&self, array_id: &str) -> Result<String> {
        self.read_attribute(array_id, "level")
    }

    fn array_state(&self, array_id: &str) -> Result<String> {
        self.read_attribute(array_id, "array_state")
    }
}

fn read_token(path: &Path) -> std::io::Result<String> {
    let data = fs::read_to_string(path)?;
    Ok(data.lines().next().unwrap_or("").trim().to_string())
}
