//! ModeSwitcher daemon

use clap::Parser;
use ringwarden::common::error::{exit_code_of, usage_exit};
use ringwarden::common::{logging, run_daemon, shutdown_signal, timestamp_now};
use ringwarden::maintenance::ModeSwitcher;
use ringwarden::registry::NodeRegistry;
use ringwarden::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ringwarden-switcher")]
#[command(about = "Moves nodes between service and waiting mode")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single tick and exit
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
            tracing::error!("switcher failed: {:#}", e);
            ExitCode::from(exit_code_of(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref());
    logging::init(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    let config = config?;

    let registry = NodeRegistry::from_config(&config.registry);
    let switcher = ModeSwitcher::new(registry, &config.maintenance);

    if cli.once {
        let summary =
            tokio::task::spawn_blocking(move || switcher.tick_at(timestamp_now())).await??;
        println!(
            "examined {}, to waiting {:?}, to service {:?}, failed {}",
            summary.examined, summary.to_waiting, summary.to_service, summary.failed
        );
        return Ok(());
    }

    run_daemon(switcher, config.maintenance.daemon_sleep(), shutdown_signal()).await;
    Ok(())
}
