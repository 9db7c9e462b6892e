use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Classified safety level of an md array.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthCategory {
    Error,
    Readonly,
    Readwrite,
}

impl fmt::Display for HealthCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthCategory::Error => "error",
            HealthCategory::Readonly => "readonly",
            HealthCategory::Readwrite => "readwrite",
        };
        f.write_str(label)
    }
}

/// Maps a kernel `array_state` token to a health category.
///
/// Tokens outside the known vocabulary (`broken`, empty, typos) are `Error`.
pub fn classify(raw_state: &str) -> HealthCategory {
    match raw_state.trim() {
        "clear" | "inactive" | "suspended" => HealthCategory::Error,
        "readonly" => HealthCategory::Readonly,
        "read-auto" | "clean" | "active" | "active-idle" | "write-pending" => {
            HealthCategory::Readwrite
        }
        _ => HealthCategory::Error,
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ArrayHealth {
    pub raw_state: String,
    pub category: HealthCategory,
}

impl ArrayHealth {
    pub fn from_raw(raw_state: &str) -> Self {
        Self {
            raw_state: raw_state.trim().to_string(),
            category: classify(raw_state),
        }
    }
}

/// Health of every managed array for one pass. Never persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct ArrayHealthState {
    arrays: BTreeMap<String, ArrayHealth>,
}

impl ArrayHealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, array_id: impl Into<String>, health: ArrayHealth) {
        self.arrays.insert(array_id.into(), health);
    }

    pub fn get(&self, array_id: &str) -> Option<&ArrayHealth> {
        self.arrays.get(array_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayHealth)> {
        self.arrays.iter()
    }

    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// True when every array accepts writes. Vacuously true with no arrays.
    pub fn all_readwrite(&self) -> bool {
        self.arrays
            .values()
            .all(|health| health.category == HealthCategory::Readwrite)
    }

    pub fn unhealthy(&self) -> Vec<(&String, &ArrayHealth)> {
        self.arrays
            .iter()
            .filter(|(_, health)| health.category != HealthCategory::Readwrite)
            .collect()
    }
}

impl FromIterator<(String, ArrayHealth)> for ArrayHealthState {
    fn from_iter<I: IntoIterator<Item = (String, ArrayHealth)>>(iter: I) -> Self {
        Self {
            arrays: iter.into_iter().collect(),
        }
    }
}
