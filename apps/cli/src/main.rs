mod config;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use config::{MonitorConfig, CONFIG_PATH};
use mdsentinel_core::{ArrayHealthMonitor, InventoryCollector, SnapshotStore};
use mdsentinel_host_linux::{health_monitor, inventory_collector};
use mdsentinel_incident::FileIncidentStore;
use mdsentinel_reconcile::{ReconcileOptions, Reconciler};
use mdsentinel_store::FileSnapshotStore;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Watches md RAID-1 health and guards the trusted block-device baseline.
#[derive(Parser)]
#[command(name = "mdsentinel", version, long_about = None)]
struct Cli {
    /// Config file (default /etc/mdsentinel/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Baseline file, overrides the config
    #[arg(long, global = true)]
    baseline: Option<PathBuf>,

    /// Incident directory, overrides the config
    #[arg(long, global = true)]
    incident_dir: Option<PathBuf>,

    /// sysfs mount point, overrides the config
    #[arg(long, global = true)]
    sysfs_root: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Defaults to `check`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation pass
    Check {
        /// Decide only; do not write the baseline or open incidents
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        json: bool,
    },
    /// Show the health of every managed md array
    Health {
        #[arg(long)]
        json: bool,
    },
    /// Print the normalized live inventory
    Inventory {
        #[arg(long)]
        pretty: bool,
    },
    /// Inspect the stored baseline
    Baseline {
        #[command(subcommand)]
        action: BaselineCommand,
    },
    /// Compare the stored baseline with the live inventory
    Diff,
    /// List or resolve incidents
    Incident {
        #[command(subcommand)]
        action: IncidentCommand,
    },
}

#[derive(Subcommand)]
enum BaselineCommand {
    Show {
        #[arg(long)]
        pretty: bool,
    },
}

#[derive(Subcommand)]
enum IncidentCommand {
    List,
    Resolve { id: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config(&cli)?;

    let store = FileSnapshotStore::new(&config.baseline_path);
    let incidents = FileIncidentStore::new(&config.incident_dir);
    let paths = config.host_paths();
    let inventory = inventory_collector(&paths);
    let arrays = health_monitor(&paths, &config.managed_level);

    let command = cli.command.unwrap_or(Command::Check {
        dry_run: false,
        json: false,
    });
    match command {
        Command::Check { dry_run, json } => {
            let report = Reconciler::new(&store, &inventory, &arrays, &incidents)
                .with_options(ReconcileOptions { dry_run })
                .run()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{}", report.outcome);
                if let Some(diff) = report.diff.filter(|diff| !diff.is_empty()) {
                    println!("implicated: {}", diff.implicated().join(", "));
                }
            }
            Ok(())
        }
        Command::Health { json } => {
            let state = arrays.check_all()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if state.is_empty() {
                println!("no {} arrays", config.managed_level);
            } else {
                for (id, health) in state.iter() {
                    println!("{:<10} {:<14} {}", id, health.raw_state, health.category);
                }
            }
            Ok(())
        }
        Command::Inventory { pretty } => {
            let snapshot = inventory.collect()?;
            if pretty {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                println!("{}", serde_json::to_string(&snapshot)?);
            }
            Ok(())
        }
        Command::Baseline {
            action: BaselineCommand::Show { pretty },
        } => {
            match store.load_stored()? {
                Some(stored) if pretty => println!("{}", serde_json::to_string_pretty(&stored)?),
                Some(stored) => println!("{}", serde_json::to_string(&stored)?),
                None => println!("no baseline at {}", store.path().display()),
            }
            Ok(())
        }
        Command::Diff => {
            let Some(baseline) = store.load()? else {
                println!("no baseline at {}", store.path().display());
                return Ok(());
            };
            let diff = baseline.diff(&inventory.collect()?);
            println!("{}", serde_json::to_string_pretty(&diff)?);
            Ok(())
        }
        Command::Incident {
            action: IncidentCommand::List,
        } => {
            let records = incidents.list()?;
            if records.is_empty() {
                println!("no incidents");
            }
            for record in records {
                println!(
                    "{}  {:<8}  {}  {}",
                    record.id,
                    format!("{:?}", record.status).to_lowercase(),
                    record.created_at_utc,
                    record.details.summary
                );
            }
            Ok(())
        }
        Command::Incident {
            action: IncidentCommand::Resolve { id },
        } => {
            let record = incidents.resolve(&id)?;
            info!(incident = %record.id, "resolved by operator");
            println!("resolved {}", record.id);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<MonitorConfig> {
    let (path, explicit) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(CONFIG_PATH), false),
    };
    let mut config = MonitorConfig::load(&path, explicit)?;
    if let Some(baseline) = &cli.baseline {
        config.baseline_path = baseline.clone();
    }
    if let Some(dir) = &cli.incident_dir {
        config.incident_dir = dir.clone();
    }
    if let Some(root) = &cli.sysfs_root {
        config.sysfs_root = root.clone();
    }
    Ok(config)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
