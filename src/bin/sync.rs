//! MetadataSyncDaemon

use clap::Parser;
use ringwarden::common::error::{exit_code_of, usage_exit};
use ringwarden::common::{logging, run_daemon, shutdown_signal};
use ringwarden::devices::{BundleSources, DeviceFingerprintManager, SystemDisks};
use ringwarden::sync::{MetadataSyncDaemon, SshTransport, SystemServices};
use ringwarden::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ringwarden-sync")]
#[command(about = "Gossips ring metadata to peers and fences unhealthy disks")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
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
            tracing::error!("sync failed: {:#}", e);
            ExitCode::from(exit_code_of(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref());
    logging::init(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    let config = config?;

    let hostname = config.hostname()?;
    let address = config.node.address.clone().unwrap_or_else(|| hostname.clone());
    let sources = BundleSources {
        metadata_dir: config.sync.metadata_dir.clone(),
        scripts_dir: config.sync.scripts_dir.clone(),
        exclude: config.sync.exclude.clone(),
    };
    let manager = DeviceFingerprintManager::new(
        SystemDisks::new(&config.devices),
        hostname,
        &config.devices,
        sources,
    );
    let daemon = MetadataSyncDaemon::new(
        config.sync.clone(),
        address,
        manager,
        SshTransport::new(&config.sync),
        SystemServices::new(config.devices.command_timeout()),
    );

    if cli.once {
        let outcome = daemon.run_cycle().await?;
        println!("{}", outcome);
        return Ok(());
    }

    run_daemon(daemon, config.sync.period(), shutdown_signal()).await;
    Ok(())
}
