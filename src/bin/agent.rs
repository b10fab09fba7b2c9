//! MaintenanceAgent daemon

use clap::Parser;
use ringwarden::common::error::{exit_code_of, usage_exit};
use ringwarden::common::{logging, run_daemon, shutdown_signal};
use ringwarden::maintenance::MaintenanceAgent;
use ringwarden::ops::renew_now;
use ringwarden::Config;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ringwarden-agent")]
#[command(about = "Keeps the maintenance backlog in step with the registry")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single renew cycle and exit
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
            tracing::error!("agent failed: {:#}", e);
            ExitCode::from(exit_code_of(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref());
    logging::init(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    let config = config?;

    let agent = MaintenanceAgent::from_config(&config.registry, &config.maintenance);

    if cli.once {
        let report = renew_now(&agent).await?;
        println!(
            "deadline {}, refreshed {:?}, removed {:?}, inserted {:?}, skipped {}",
            report.deadline, report.refreshed, report.removed, report.inserted, report.skipped
        );
        return Ok(());
    }

    run_daemon(agent, config.maintenance.daemon_sleep(), shutdown_signal()).await;
    Ok(())
}
