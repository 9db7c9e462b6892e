//! One reconciliation pass: compare the trusted baseline with the live
//! inventory and, depending on md array health, accept the change, escalate
//! it, or do nothing.

use anyhow::{Context, Result};
use mdsentinel_core::{
    ArrayHealthMonitor, ArrayHealthState, IncidentDetails, IncidentId, IncidentManager,
    InventoryCollector, InventoryDiff, InventorySnapshot, SaveStatus, SnapshotStore,
};
use serde::Serialize;
use std::fmt;
use tracing::{info, warn};

/// What the pass found when it started comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    NoBaseline,
    BaselineUnchanged,
    BaselineChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// First healthy run stored the live inventory as baseline.
    BaselineEstablished { persisted: bool },
    NoChange,
    /// Inventory changed while every array was read-write.
    BaselineAccepted { persisted: bool },
    /// `incident` is `None` on a dry run.
    IncidentRaised { incident: Option<IncidentId> },
    IncidentAlreadyOpen,
    /// No baseline yet and some array is not read-write.
    BaselineDeferred,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::BaselineEstablished { persisted: true } => write!(f, "baseline established"),
            Outcome::BaselineEstablished { persisted: false } => {
                write!(f, "baseline established (not persisted)")
            }
            Outcome::NoChange => write!(f, "no change"),
            Outcome::BaselineAccepted { persisted: true } => write!(f, "new baseline accepted"),
            Outcome::BaselineAccepted { persisted: false } => {
                write!(f, "new baseline accepted (not persisted)")
            }
            Outcome::IncidentRaised { incident: Some(id) } => write!(f, "incident {} raised", id),
            Outcome::IncidentRaised { incident: None } => write!(f, "incident would be raised"),
            Outcome::IncidentAlreadyOpen => write!(f, "incident already open"),
            Outcome::BaselineDeferred => write!(f, "baseline deferred until arrays are read-write"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub phase: Phase,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub dry_run: bool,
    pub diff: Option<InventoryDiff>,
    pub health: Option<ArrayHealthState>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOptions {
    /// Decide without writing the baseline or opening incidents.
    pub dry_run: bool,
}

pub struct Reconciler<'a> {
    store: &'a dyn SnapshotStore,
    inventory: &'a dyn InventoryCollector,
    arrays: &'a dyn ArrayHealthMonitor,
    incidents: &'a dyn IncidentManager,
    options: ReconcileOptions,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        store: &'a dyn SnapshotStore,
        inventory: &'a dyn InventoryCollector,
        arrays: &'a dyn ArrayHealthMonitor,
        incidents: &'a dyn IncidentManager,
    ) -> Self {
        Self {
            store,
            inventory,
            arrays,
            incidents,
            options: ReconcileOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn run(&self) -> Result<ReconcileReport> {
        let mut baseline = self.store.load().context("load baseline")?;
        let mut health = None;
        let mut established = None;
        let started_without_baseline = baseline.is_none();

        if baseline.is_none() {
            let observed = self.check_arrays()?;
            if observed.all_readwrite() {
                info!("no baseline stored and all arrays read-write; establishing baseline");
                let current = self.collect()?;
                let persisted = self.save(&current)?;
                established = Some(persisted);
                baseline = if self.options.dry_run {
                    Some(current)
                } else {
                    self.store.load().context("reload baseline")?
                };
            } else {
                warn!(
                    arrays = ?unhealthy_ids(&observed),
                    "no baseline stored and arrays not read-write; waiting"
                );
            }
            health = Some(observed);
        }

        let Some(baseline) = baseline else {
            let outcome = match established {
                Some(persisted) => Outcome::BaselineEstablished { persisted },
                None => Outcome::BaselineDeferred,
            };
            return Ok(self.report(Phase::NoBaseline, outcome, None, health));
        };

        let current = self.collect()?;
        let diff = baseline.diff(&current);
        if current == baseline {
            let (phase, outcome) = match established {
                Some(persisted) => (Phase::NoBaseline, Outcome::BaselineEstablished { persisted }),
                None => (Phase::BaselineUnchanged, Outcome::NoChange),
            };
            info!(devices = current.len(), "inventory matches baseline");
            return Ok(self.report(phase, outcome, None, health));
        }

        let phase = if started_without_baseline {
            Phase::NoBaseline
        } else {
            Phase::BaselineChanged
        };
        info!(
            added = ?diff.added,
            removed = ?diff.removed,
            changed = ?diff.changed,
            "inventory differs from baseline"
        );

        let observed = self.check_arrays()?;
        let outcome = if observed.all_readwrite() {
            info!("all arrays read-write; accepting inventory as new baseline");
            let persisted = self.save(&current)?;
            Outcome::BaselineAccepted { persisted }
        } else if self.incidents.has_open_incident().context("query incidents")? {
            warn!(
                arrays = ?unhealthy_ids(&observed),
                "arrays degraded; incident already open"
            );
            Outcome::IncidentAlreadyOpen
        } else {
            let details = IncidentDetails::new(&diff, &observed);
            warn!(summary = %details.summary, "arrays degraded; raising incident");
            let incident = if self.options.dry_run {
                None
            } else {
                Some(
                    self.incidents
                        .create_incident(&details)
                        .context("create incident")?,
                )
            };
            Outcome::IncidentRaised { incident }
        };
        Ok(self.report(phase, outcome, Some(diff), Some(observed)))
    }

    fn check_arrays(&self) -> Result<ArrayHealthState> {
        self.arrays.check_all().context("check md arrays")
    }

    fn collect(&self) -> Result<InventorySnapshot> {
        self.inventory.collect().context("collect inventory")
    }

    fn save(&self, snapshot: &InventorySnapshot) -> Result<bool> {
        if self.options.dry_run {
            return Ok(false);
        }
        let status = self.store.save(snapshot).context("save baseline")?;
        Ok(status == SaveStatus::Written)
    }

    fn report(
        &self,
        phase: Phase,
        outcome: Outcome,
        diff: Option<InventoryDiff>,
        health: Option<ArrayHealthState>,
    ) -> ReconcileReport {
        info!(?phase, %outcome, dry_run = self.options.dry_run, "reconciliation finished");
        ReconcileReport {
            phase,
            outcome,
            dry_run: self.options.dry_run,
            diff,
            health,
        }
    }
}

fn unhealthy_ids(state: &ArrayHealthState) -> Vec<String> {
    state.unhealthy().into_iter().map(|(id, _)| id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_flat() {
        let report = ReconcileReport {
            phase: Phase::BaselineChanged,
            outcome: Outcome::IncidentRaised {
                incident: Some(IncidentId("abc".to_string())),
            },
            dry_run: false,
            diff: None,
            health: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["phase"], "baseline_changed");
        assert_eq!(json["outcome"], "incident_raised");
        assert_eq!(json["incident"], "abc");
    }

    #[test]
    fn outcome_display() {
        assert_eq!(Outcome::NoChange.to_string(), "no change");
        assert_eq!(
            Outcome::IncidentRaised { incident: None }.to_string(),
            "incident would be raised"
        );
    }
}
