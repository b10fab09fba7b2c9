//! Registry binary: heartbeat intake and fleet state over HTTP

use clap::Parser;
use ringwarden::common::error::{exit_code_of, usage_exit};
use ringwarden::common::logging;
use ringwarden::registry::http::{create_router, RegistryState};
use ringwarden::registry::{MaintenanceBacklog, NodeRegistry};
use ringwarden::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Parser)]
#[command(name = "ringwarden-registry")]
#[command(about = "ringwarden node registry and heartbeat intake")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address (overrides registry.bind_addr)
    #[arg(long)]
    bind: Option<SocketAddr>,
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
            tracing::error!("registry failed: {:#}", e);
            ExitCode::from(exit_code_of(&e))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref());
    logging::init(config.as_ref().map_or("info", |c| c.log_level.as_str()));
    let config = config?;

    let bind = cli.bind.unwrap_or(config.registry.bind_addr);
    let state = RegistryState {
        registry: Arc::new(NodeRegistry::from_config(&config.registry)),
        backlog: Arc::new(MaintenanceBacklog::from_config(&config.registry)),
    };
    let app = create_router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, version = ringwarden::VERSION, "registry listening");

    let mut shutdown = ringwarden::common::shutdown_signal();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await?;

    tracing::info!("registry stopped");
    Ok(())
}
