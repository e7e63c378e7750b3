//! Mission orchestrator CLI.
//!
//! Submits missions and controls in-flight runs. The HTTP front end lives in
//! the `mission-api` crate; both share the same store and config.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde_json::json;

use orchestrator::io::config::load_config;
use orchestrator::io::ident::new_mission;
use orchestrator::io::store::RunControl;
use orchestrator::run::{Orchestrator, open_store, run_status};

#[derive(Parser)]
#[command(
    name = "orchestrator",
    version,
    about = "Budget-capped autonomous mission orchestrator"
)]
struct Cli {
    /// Path to the orchestrator TOML config (missing file uses defaults).
    #[arg(long, default_value = "orchestrator.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a mission and run it to a terminal state.
    Submit {
        /// Natural-language objective.
        #[arg(long)]
        objective: String,

        /// Domain tag used for policy lookup and memory namespacing.
        #[arg(long, default_value = "general")]
        domain: String,

        /// Permission grants (repeatable). Defaults to the full set.
        #[arg(long = "permission")]
        permissions: Vec<String>,

        /// Budget cap in USD for model calls.
        #[arg(long)]
        budget_usd: Option<f64>,

        /// Maximum loop iterations.
        #[arg(long)]
        max_steps: Option<u32>,

        /// Force a runtime (browser, desktop, workspace).
        #[arg(long)]
        runtime: Option<String>,

        /// Starting URL for browser missions.
        #[arg(long)]
        url: Option<String>,
    },
    /// Print the persisted run snapshot and its control state.
    Status { run_id: String },
    /// Pause a run at its next iteration boundary.
    Pause { run_id: String },
    /// Resume a paused run's control record.
    Resume { run_id: String },
}

fn main() {
    orchestrator::logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Submit {
            objective,
            domain,
            permissions,
            budget_usd,
            max_steps,
            runtime,
            url,
        } => {
            let mut mission = new_mission(&objective);
            mission.domain = domain;
            if !permissions.is_empty() {
                mission.permissions = permissions;
            }
            if let Some(budget) = budget_usd {
                mission.budget_usd = budget;
            }
            if let Some(steps) = max_steps {
                mission.max_steps = steps;
            }
            if let Some(runtime) = runtime {
                mission.metadata.insert("runtime".to_string(), json!(runtime));
            }
            if let Some(url) = url {
                mission.metadata.insert("url".to_string(), json!(url));
            }

            let orchestrator = Orchestrator::new(&config)?;
            let result = orchestrator
                .run_mission(&mission)
                .context("run mission")?;
            print_json(&json!({"mission_id": mission.id, "result": result}))
        }
        Command::Status { run_id } => {
            let store = open_store(&config.db_path)?;
            let status = run_status(&store, &run_id)?
                .ok_or_else(|| anyhow!("run {run_id} not found"))?;
            print_json(&status)
        }
        Command::Pause { run_id } => {
            let store = open_store(&config.db_path)?;
            store.set_run_control(&run_id, RunControl::Paused)?;
            print_json(&json!({"run_id": run_id, "status": "paused"}))
        }
        Command::Resume { run_id } => {
            let store = open_store(&config.db_path)?;
            store.set_run_control(&run_id, RunControl::Active)?;
            print_json(&json!({"run_id": run_id, "status": "active"}))
        }
    }
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
