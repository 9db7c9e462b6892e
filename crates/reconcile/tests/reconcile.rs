use anyhow::{anyhow, Result};
use mdsentinel_core::{
    ArrayHealth, ArrayHealthMonitor, ArrayHealthState, DeviceRecord, IncidentDetails, IncidentId,
    IncidentManager, InventoryCollector, InventorySnapshot, SaveStatus, SnapshotStore,
};
use mdsentinel_incident::FileIncidentStore;
use mdsentinel_reconcile::{Outcome, Phase, ReconcileOptions, Reconciler};
use mdsentinel_store::FileSnapshotStore;
use std::cell::{Cell, RefCell};
use tempfile::TempDir;

#[derive(Default)]
struct MemoryStore {
    baseline: RefCell<Option<InventorySnapshot>>,
    saves: Cell<usize>,
    deny: bool,
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<InventorySnapshot>> {
        Ok(self.baseline.borrow().clone())
    }

    fn save(&self, snapshot: &InventorySnapshot) -> Result<SaveStatus> {
        if self.deny {
            return Ok(SaveStatus::PermissionDenied);
        }
        self.saves.set(self.saves.get() + 1);
        *self.baseline.borrow_mut() = Some(snapshot.clone());
        Ok(SaveStatus::Written)
    }
}

struct LiveInventory(RefCell<InventorySnapshot>);

impl InventoryCollector for LiveInventory {
    fn collect(&self) -> Result<InventorySnapshot> {
        Ok(self.0.borrow().clone())
    }
}

struct Arrays(RefCell<Option<ArrayHealthState>>);

impl ArrayHealthMonitor for Arrays {
    fn check_all(&self) -> Result<ArrayHealthState> {
        self.0
            .borrow()
            .clone()
            .ok_or_else(|| anyhow!("cannot read md status"))
    }
}

#[derive(Default)]
struct Tickets {
    created: RefCell<Vec<IncidentDetails>>,
    offline: bool,
}

impl IncidentManager for Tickets {
    fn has_open_incident(&self) -> Result<bool> {
        if self.offline {
            return Err(anyhow!("ticket backend offline"));
        }
        Ok(!self.created.borrow().is_empty())
    }

    fn create_incident(&self, details: &IncidentDetails) -> Result<IncidentId> {
        let mut created = self.created.borrow_mut();
        created.push(details.clone());
        Ok(IncidentId(format!("INC-{}", created.len())))
    }
}

fn mirror(second_serial: &str) -> InventorySnapshot {
    let mut sda = DeviceRecord::new("sda", "disk");
    sda.serial = Some("WD-AAA".into());
    sda.children = vec!["sda1".into()];
    let mut sdb = DeviceRecord::new("sdb", "disk");
    sdb.serial = Some(second_serial.into());
    sdb.children = vec!["sdb1".into()];
    InventorySnapshot::new(vec![sda, sdb])
}

fn degraded_mirror() -> InventorySnapshot {
    let mut sda = DeviceRecord::new("sda", "disk");
    sda.serial = Some("WD-AAA".into());
    sda.children = vec!["sda1".into()];
    InventorySnapshot::new(vec![sda])
}

fn health(states: &[(&str, &str)]) -> Arrays {
    Arrays(RefCell::new(Some(
        states
            .iter()
            .map(|(id, raw)| (id.to_string(), ArrayHealth::from_raw(raw)))
            .collect(),
    )))
}

struct Host {
    store: MemoryStore,
    inventory: LiveInventory,
    arrays: Arrays,
    tickets: Tickets,
}

impl Host {
    fn new(baseline: Option<InventorySnapshot>, live: InventorySnapshot, arrays: Arrays) -> Self {
        Self {
            store: MemoryStore {
                baseline: RefCell::new(baseline),
                ..MemoryStore::default()
            },
            inventory: LiveInventory(RefCell::new(live)),
            arrays,
            tickets: Tickets::default(),
        }
    }

    fn run(&self) -> Result<mdsentinel_reconcile::ReconcileReport> {
        Reconciler::new(&self.store, &self.inventory, &self.arrays, &self.tickets).run()
    }
}

#[test]
fn healthy_first_run_establishes_baseline() {
    let host = Host::new(None, mirror("WD-BBB"), health(&[("md126", "clean")]));
    let report = host.run().unwrap();
    assert_eq!(report.phase, Phase::NoBaseline);
    assert_eq!(report.outcome, Outcome::BaselineEstablished { persisted: true });
    assert_eq!(*host.store.baseline.borrow(), Some(mirror("WD-BBB")));
    assert_eq!(host.store.saves.get(), 1);
    assert!(host.tickets.created.borrow().is_empty());
}

#[test]
fn degraded_first_run_writes_nothing() {
    let host = Host::new(
        None,
        mirror("WD-BBB"),
        health(&[("md126", "clean"), ("md127", "inactive")]),
    );
    let report = host.run().unwrap();
    assert_eq!(report.outcome, Outcome::BaselineDeferred);
    assert!(host.store.baseline.borrow().is_none());
    assert_eq!(host.store.saves.get(), 0);
    assert!(host.tickets.created.borrow().is_empty());
}

#[test]
fn denied_first_save_is_not_a_failure() {
    let mut host = Host::new(None, mirror("WD-BBB"), health(&[("md126", "clean")]));
    host.store.deny = true;
    let report = host.run().unwrap();
    assert_eq!(report.outcome, Outcome::BaselineEstablished { persisted: false });
    assert!(host.store.baseline.borrow().is_none());
}

#[test]
fn unchanged_inventory_is_noop_even_when_degraded() {
    for state in ["clean", "readonly", "inactive", "broken"] {
        let host = Host::new(
            Some(mirror("WD-BBB")),
            mirror("WD-BBB"),
            health(&[("md126", state)]),
        );
        let report = host.run().unwrap();
        assert_eq!(report.phase, Phase::BaselineUnchanged);
        assert_eq!(report.outcome, Outcome::NoChange, "{state}");
        assert_eq!(host.store.saves.get(), 0);
        assert!(host.tickets.created.borrow().is_empty());
    }
}

#[test]
fn unchanged_inventory_never_reads_array_status() {
    let host = Host::new(
        Some(mirror("WD-BBB")),
        mirror("WD-BBB"),
        Arrays(RefCell::new(None)),
    );
    assert_eq!(host.run().unwrap().outcome, Outcome::NoChange);
}

#[test]
fn healthy_change_replaces_baseline() {
    let host = Host::new(
        Some(mirror("WD-BBB")),
        mirror("WD-CCC"),
        health(&[("md126", "active")]),
    );
    let report = host.run().unwrap();
    assert_eq!(report.phase, Phase::BaselineChanged);
    assert_eq!(report.outcome, Outcome::BaselineAccepted { persisted: true });
    assert_eq!(report.diff.unwrap().changed, vec!["sdb"]);
    assert_eq!(*host.store.baseline.borrow(), Some(mirror("WD-CCC")));
    assert!(host.tickets.created.borrow().is_empty());
}

#[test]
fn degraded_change_raises_exactly_one_incident() {
    let host = Host::new(
        Some(mirror("WD-BBB")),
        degraded_mirror(),
        health(&[("md126", "inactive")]),
    );

    let first = host.run().unwrap();
    assert_eq!(
        first.outcome,
        Outcome::IncidentRaised {
            incident: Some(IncidentId("INC-1".to_string()))
        }
    );
    assert_eq!(*host.store.baseline.borrow(), Some(mirror("WD-BBB")));
    {
        let created = host.tickets.created.borrow();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].implicated_devices, vec!["sdb"]);
        assert_eq!(created[0].degraded_arrays[0].array_id, "md126");
    }

    let second = host.run().unwrap();
    assert_eq!(second.outcome, Outcome::IncidentAlreadyOpen);
    assert_eq!(host.tickets.created.borrow().len(), 1);
    assert_eq!(host.store.saves.get(), 0);
}

#[test]
fn readonly_array_counts_as_degraded() {
    let host = Host::new(
        Some(mirror("WD-BBB")),
        degraded_mirror(),
        health(&[("md126", "clean"), ("md127", "readonly")]),
    );
    let report = host.run().unwrap();
    assert!(matches!(report.outcome, Outcome::IncidentRaised { .. }));
    assert_eq!(*host.store.baseline.borrow(), Some(mirror("WD-BBB")));
}

#[test]
fn repeated_healthy_runs_are_idempotent() {
    let host = Host::new(None, mirror("WD-BBB"), health(&[("md126", "clean")]));
    host.run().unwrap();
    assert_eq!(host.run().unwrap().outcome, Outcome::NoChange);
    assert_eq!(host.run().unwrap().outcome, Outcome::NoChange);
    assert_eq!(host.store.saves.get(), 1);
}

#[test]
fn unreadable_array_status_aborts() {
    let host = Host::new(
        Some(mirror("WD-BBB")),
        degraded_mirror(),
        Arrays(RefCell::new(None)),
    );
    assert!(host.run().is_err());
    assert_eq!(*host.store.baseline.borrow(), Some(mirror("WD-BBB")));
    assert!(host.tickets.created.borrow().is_empty());
}

#[test]
fn offline_ticket_backend_aborts() {
    let mut host = Host::new(
        Some(mirror("WD-BBB")),
        degraded_mirror(),
        health(&[("md126", "inactive")]),
    );
    host.tickets.offline = true;
    assert!(host.run().is_err());
    assert_eq!(host.store.saves.get(), 0);
}

#[test]
fn dry_run_decides_without_side_effects() {
    let host = Host::new(
        Some(mirror("WD-BBB")),
        degraded_mirror(),
        health(&[("md126", "inactive")]),
    );
    let report = Reconciler::new(&host.store, &host.inventory, &host.arrays, &host.tickets)
        .with_options(ReconcileOptions { dry_run: true })
        .run()
        .unwrap();
    assert!(report.dry_run);
    assert_eq!(report.outcome, Outcome::IncidentRaised { incident: None });
    assert!(host.tickets.created.borrow().is_empty());

    let fresh = Host::new(None, mirror("WD-BBB"), health(&[("md126", "clean")]));
    let report = Reconciler::new(&fresh.store, &fresh.inventory, &fresh.arrays, &fresh.tickets)
        .with_options(ReconcileOptions { dry_run: true })
        .run()
        .unwrap();
    assert_eq!(report.outcome, Outcome::BaselineEstablished { persisted: false });
    assert_eq!(fresh.store.saves.get(), 0);
}

#[test]
fn file_backed_cycle() {
    let dir = TempDir::new().unwrap();
    let store = FileSnapshotStore::new(dir.path().join("baseline.json"));
    let incidents = FileIncidentStore::new(dir.path().join("incidents"));
    let inventory = LiveInventory(RefCell::new(mirror("WD-BBB")));
    let arrays = health(&[("md126", "clean")]);

    let run = || {
        Reconciler::new(&store, &inventory, &arrays, &incidents)
            .run()
            .unwrap()
            .outcome
    };

    assert_eq!(run(), Outcome::BaselineEstablished { persisted: true });
    assert_eq!(run(), Outcome::NoChange);

    *inventory.0.borrow_mut() = degraded_mirror();
    *arrays.0.borrow_mut() = Some(
        [("md126".to_string(), ArrayHealth::from_raw("inactive"))]
            .into_iter()
            .collect(),
    );
    assert!(matches!(run(), Outcome::IncidentRaised { incident: Some(_) }));
    assert_eq!(run(), Outcome::IncidentAlreadyOpen);
    assert_eq!(store.load().unwrap(), Some(mirror("WD-BBB")));

    let open = incidents.list().unwrap();
    assert_eq!(open.len(), 1);
    incidents.resolve(&open[0].id.0).unwrap();

    // disk replaced and resynced
    *inventory.0.borrow_mut() = mirror("WD-CCC");
    *arrays.0.borrow_mut() = Some(
        [("md126".to_string(), ArrayHealth::from_raw("active"))]
            .into_iter()
            .collect(),
    );
    assert_eq!(run(), Outcome::BaselineAccepted { persisted: true });
    assert_eq!(store.load().unwrap(), Some(mirror("WD-CCC")));
    assert_eq!(run(), Outcome::NoChange);
}
