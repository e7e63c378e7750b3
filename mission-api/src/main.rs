//! Mission API server - thin HTTP front end over the orchestrator.
//!
//! Accepts mission submissions, reports run status, and toggles run
//! controls. The orchestrator itself is synchronous, so each submission runs
//! on the blocking thread pool for its full duration.

mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::Router;
use clap::Parser;
use tracing::info;

use orchestrator::io::config::{OrchestratorConfig, load_config};

#[derive(Parser)]
#[command(name = "mission-api")]
#[command(about = "HTTP front end for mission submission and run control")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8787")]
    port: u16,

    /// Path to the orchestrator TOML config
    #[arg(long, default_value = "orchestrator.toml")]
    config: PathBuf,
}

/// Shared server state: the config every request builds its collaborators
/// from.
#[derive(Clone)]
pub struct AppState {
    pub config: OrchestratorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mission_api=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    info!(db = %config.db_path.display(), dry_run = config.dry_run, "starting mission-api");

    let state = AppState { config };
    let app = Router::new().merge(routes::api_router()).with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
