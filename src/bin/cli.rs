//! Operator and fleet CLI

use clap::{Parser, Subcommand};
use ringwarden::common::error::{exit_code_of, usage_exit};
use ringwarden::common::{logging, timestamp_now, Config};
use ringwarden::devices::{BundleSources, DeviceFingerprintManager, SystemDisks};
use ringwarden::maintenance::MaintenanceAgent;
use ringwarden::ops::{self, format_timestamp, UpdateOutcome};
use ringwarden::registry::{
    Heartbeat, MaintenanceBacklog, NodeEntry, NodeMode, NodeRegistry, NodeSpec, RegistryClient,
    TargetKind,
};
use ringwarden::sync::{MetadataDir, SystemServices};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "ringwarden")]
#[command(about = "ringwarden storage-node maintenance CLI")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Node registry
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },

    /// Maintenance backlog
    Backlog {
        #[command(subcommand)]
        command: BacklogCommands,
    },

    /// Disks and device slots on this host
    Devices {
        #[command(subcommand)]
        command: DeviceCommands,
    },

    /// Adopt staged metadata if it is newer than the local copy
    UpdateMetadata {
        /// Directory holding metadata/ and scripts/
        dir: PathBuf,
    },

    /// Post a heartbeat JSON document to a registry
    Heartbeat {
        /// Heartbeat file
        #[arg(long)]
        file: PathBuf,

        /// Registry URL
        #[arg(long, default_value = "http://localhost:2308")]
        registry: String,

        /// Request timeout in seconds
        #[arg(long, default_value = "10")]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// Register a node
    Add { hostname: String },

    /// Show one node
    Show { hostname: String },

    /// List nodes
    List {
        /// Only nodes in this mode (service, waiting)
        #[arg(long)]
        mode: Option<NodeMode>,
    },

    /// Remove a node and its backlog task
    Deregister { hostname: String },

    /// Show or set a node's hardware spec
    Spec {
        hostname: String,

        #[arg(long, requires = "disk_capacity")]
        disk_count: Option<u32>,

        /// Bytes per disk
        #[arg(long, requires = "disk_count")]
        disk_capacity: Option<u64>,
    },
}

#[derive(Subcommand)]
enum BacklogCommands {
    /// List tasks
    List {
        /// node_missing, disk_missing or disk_broken
        #[arg(long)]
        target: Option<TargetKind>,
    },

    /// Run one renew cycle now
    Renew,
}

#[derive(Subcommand)]
enum DeviceCommands {
    /// List non-root disks
    Discover,

    /// Show the fingerprint on every disk
    Fingerprint,

    /// Mount own disks at their recorded slots
    Remount,

    /// Remount, then recover lost slots onto unused disks
    Reconcile,

    /// Create slots on a fresh node
    Init {
        /// Number of device slots
        #[arg(long)]
        count: u32,

        /// Config version to stamp (default: local metadata version, else 1)
        #[arg(long)]
        version: Option<u64>,

        /// Also take disks fingerprinted by other hosts
        #[arg(long)]
        force: bool,
    },

    /// Stamp a new config version onto every own disk
    Bump {
        /// Default: local metadata version
        #[arg(long)]
        version: Option<u64>,
    },

    /// Rewrite the disaster bundle on a disk
    Dump { disk: String },

    /// Install the disaster bundle from a disk
    Load { disk: String },

    /// Install the bundle from the newest own disk
    Restore,

    /// Clear fingerprint and bundle from a disk
    Reclaim { disk: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return usage_exit(e),
    };
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code_of(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref());
    logging::init(config.as_ref().map_or("warn", |c| c.log_level.as_str()));
    let config = config?;

    match cli.command {
        Commands::Node { command } => node(&config, command).await,
        Commands::Backlog { command } => backlog(&config, command).await,
        Commands::Devices { command } => devices(&config, command).await,
        Commands::UpdateMetadata { dir } => update_metadata(&config, dir).await,
        Commands::Heartbeat {
            file,
            registry,
            timeout,
        } => {
            let text = std::fs::read_to_string(&file)?;
            let heartbeat: Heartbeat = serde_json::from_str(&text)?;
            let client = RegistryClient::new(registry, Duration::from_secs(timeout))?;
            let entry = client.send_heartbeat(&heartbeat).await?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
            Ok(())
        }
    }
}

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> ringwarden::Result<T> + Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

fn print_nodes(nodes: &[NodeEntry]) {
    println!(
        "{:<24} {:<8} {:<8} {:<20} {}",
        "HOSTNAME", "STATUS", "MODE", "LAST HEARTBEAT", "DISKS"
    );
    for node in nodes {
        let disks = node.disk_report.as_ref().map_or("-".to_string(), |r| {
            format!(
                "{} healthy, {} broken, {} missing",
                r.healthy.len(),
                r.broken.len(),
                r.missing.count
            )
        });
        println!(
            "{:<24} {:<8} {:<8} {:<20} {}",
            node.hostname,
            node.status,
            node.mode,
            format_timestamp(node.last_heartbeat),
            disks
        );
    }
}

async fn node(config: &Config, command: NodeCommands) -> anyhow::Result<()> {
    let registry = NodeRegistry::from_config(&config.registry);
    match command {
        NodeCommands::Add { hostname } => {
            let entry = NodeEntry::new(&hostname, timestamp_now());
            if blocking(move || registry.add_node(&entry)).await? {
                println!("registered {}", hostname);
            } else {
                println!("{} is already registered", hostname);
            }
        }
        NodeCommands::Show { hostname } => {
            let name = hostname.clone();
            let entry = blocking(move || registry.get(&name))
                .await?
                .ok_or_else(|| ringwarden::Error::NotFound(format!("node {}", hostname)))?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        NodeCommands::List { mode } => {
            let nodes =
                blocking(move || registry.query(|e| mode.map_or(true, |m| e.mode == m))).await?;
            print_nodes(&nodes);
        }
        NodeCommands::Deregister { hostname } => {
            let backlog = MaintenanceBacklog::from_config(&config.registry);
            let name = hostname.clone();
            let removed = blocking(move || {
                let removed = registry.deregister(&name)?;
                if removed {
                    backlog.delete(&name)?;
                }
                Ok(removed)
            })
            .await?;
            if !removed {
                return Err(ringwarden::Error::NotFound(format!("node {}", hostname)).into());
            }
            println!("deregistered {}", hostname);
        }
        NodeCommands::Spec {
            hostname,
            disk_count,
            disk_capacity,
        } => {
            let name = hostname.clone();
            let spec = match (disk_count, disk_capacity) {
                (Some(disk_count), Some(disk_capacity)) => {
                    blocking(move || {
                        if registry.get(&name)?.is_none() {
                            return Ok(None);
                        }
                        let spec = NodeSpec {
                            hostname: name,
                            disk_count,
                            disk_capacity,
                            updated_at: timestamp_now(),
                        };
                        registry.put_spec(&spec)?;
                        Ok(Some(spec))
                    })
                    .await?
                }
                _ => blocking(move || registry.get_spec(&name)).await?,
            };
            let spec = spec
                .ok_or_else(|| ringwarden::Error::NotFound(format!("spec for {}", hostname)))?;
            println!("{}", serde_json::to_string_pretty(&spec)?);
        }
    }
    Ok(())
}

async fn backlog(config: &Config, command: BacklogCommands) -> anyhow::Result<()> {
    match command {
        BacklogCommands::List { target } => {
            let backlog = MaintenanceBacklog::from_config(&config.registry);
            let report = blocking(move || ops::backlog_report(&backlog, target)).await?;
            println!("{}", report);
        }
        BacklogCommands::Renew => {
            let agent = MaintenanceAgent::from_config(&config.registry, &config.maintenance);
            let report = ops::renew_now(&agent).await?;
            println!("deadline: {}", format_timestamp(report.deadline));
            println!("refreshed: {}", report.refreshed.join(", "));
            println!("removed: {}", report.removed.join(", "));
            println!("inserted: {}", report.inserted.as_deref().unwrap_or("-"));
            if report.skipped > 0 {
                println!("skipped: {}", report.skipped);
            }
        }
    }
    Ok(())
}

fn device_manager(config: &Config) -> anyhow::Result<DeviceFingerprintManager<SystemDisks>> {
    let sources = BundleSources {
        metadata_dir: config.sync.metadata_dir.clone(),
        scripts_dir: config.sync.scripts_dir.clone(),
        exclude: config.sync.exclude.clone(),
    };
    Ok(DeviceFingerprintManager::new(
        SystemDisks::new(&config.devices),
        config.hostname()?,
        &config.devices,
        sources,
    ))
}

fn local_version(config: &Config) -> Option<u64> {
    MetadataDir::new(&config.sync.metadata_dir).version()
}

async fn devices(config: &Config, command: DeviceCommands) -> anyhow::Result<()> {
    let manager = device_manager(config)?;
    match command {
        DeviceCommands::Discover => {
            for disk in manager.discover_non_root_disks().await? {
                println!(
                    "{:<10} {}",
                    disk.name,
                    disk.serial.as_deref().unwrap_or("-")
                );
            }
        }
        DeviceCommands::Fingerprint => {
            println!(
                "{:<10} {:<24} {:<8} {:<8} {}",
                "DISK", "HOST", "VERSION", "SLOT", "COUNT"
            );
            for probed in manager.probe_all().await? {
                match probed.fingerprint {
                    Some(fp) => println!(
                        "{:<10} {:<24} {:<8} {:<8} {}",
                        probed.disk.name,
                        fp.hostname,
                        fp.config_version,
                        fp.device_name(),
                        fp.device_count
                    ),
                    None => println!("{:<10} -", probed.disk.name),
                }
            }
        }
        DeviceCommands::Remount => {
            let _guard = manager.lock_host().await?;
            let outcome = manager.remount_known_disks().await?;
            for (slot, disk) in &outcome.mounted {
                println!("slot {:>3}  {}", slot, disk.name);
            }
            if !outcome.lost.is_empty() {
                println!("lost slots: {:?}", outcome.lost);
            }
        }
        DeviceCommands::Reconcile => {
            let report = ops::reconcile_host(&manager).await?;
            print!("{}", ops::reconcile::render(&report));
        }
        DeviceCommands::Init {
            count,
            version,
            force,
        } => {
            let version = version.or_else(|| local_version(config)).unwrap_or(1);
            let _guard = manager.lock_host().await?;
            let outcome = manager.init(count, version, force).await?;
            for (slot, disk) in &outcome.recovered {
                println!("slot {:>3}  {}", slot, disk.name);
            }
            if !outcome.still_lost.is_empty() {
                println!("not created: {:?}", outcome.still_lost);
            }
        }
        DeviceCommands::Bump { version } => {
            let version = version.or_else(|| local_version(config)).ok_or_else(|| {
                ringwarden::Error::InvalidConfig("no local config version; pass --version".into())
            })?;
            let _guard = manager.lock_host().await?;
            let outcome = manager.bump_config_version(version).await?;
            println!("version {}: updated {:?}", version, outcome.updated);
            if !outcome.not_updated.is_empty() {
                println!("not updated: {:?}", outcome.not_updated);
            }
        }
        DeviceCommands::Dump { disk } => {
            let _guard = manager.lock_host().await?;
            let manifest = manager.dump_disaster_bundle(&disk).await?;
            println!("{}: {} files at version {}", disk, manifest.files.len(), manifest.config_version);
        }
        DeviceCommands::Load { disk } => {
            let _guard = manager.lock_host().await?;
            let manifest = manager.load_disaster_bundle(&disk).await?;
            println!("{}: {} files at version {}", disk, manifest.files.len(), manifest.config_version);
        }
        DeviceCommands::Restore => {
            let _guard = manager.lock_host().await?;
            let (disk, manifest) = manager.restore().await?;
            println!(
                "restored version {} from {}",
                manifest.config_version, disk.name
            );
        }
        DeviceCommands::Reclaim { disk } => {
            let _guard = manager.lock_host().await?;
            manager.reclaim(&disk).await?;
            println!("{} reclaimed", disk);
        }
    }
    Ok(())
}

async fn update_metadata(config: &Config, dir: PathBuf) -> anyhow::Result<()> {
    let manager = device_manager(config)?;
    let services = SystemServices::new(config.devices.command_timeout());
    let outcome =
        ops::apply_update(&dir, &manager, &services, &config.sync.storage_services).await?;
    match outcome {
        UpdateOutcome::UpToDate { local, staged } => {
            println!("up to date (local {}, staged {})", local, staged);
        }
        UpdateOutcome::Applied {
            from,
            to,
            bump,
            recovery,
        } => {
            println!(
                "applied version {} (was {})",
                to,
                from.map_or("none".to_string(), |v| v.to_string())
            );
            if !bump.not_updated.is_empty() {
                println!("slots missed by the bump: {:?}", bump.not_updated);
            }
            if let Some(report) = recovery {
                print!("{}", ops::reconcile::render(&report));
            }
        }
    }
    Ok(())
}
