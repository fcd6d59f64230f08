mod config_cmd;
mod run;
mod server;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::state::build_state;

#[derive(Parser, Debug)]
#[command(name = "substrate")]
#[command(about = "Headless multi-agent task-graph orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse, validate, and execute a task graph against a pipeline run.
    Run {
        task_graph_file: PathBuf,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Schema/cycle/dangle validation only, no dispatch.
    Validate {
        task_graph_file: PathBuf,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Starts the thin event surface an external TUI is expected to consume.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 4455)]
        port: u16,
        #[arg(long)]
        state_dir: Option<String>,
    },
    /// Inspect or mutate the merged config, or force a format migration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
        #[arg(long)]
        state_dir: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Get { key: String },
    Set { key: String, value: String },
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Command::Run { task_graph_file, state_dir } => {
            let state = build_state(&resolve_state_dir(state_dir)).await?;
            run::run_command(&state, &task_graph_file).await?
        }
        Command::Validate { task_graph_file, state_dir } => {
            let state = build_state(&resolve_state_dir(state_dir)).await?;
            run::validate_command(&state, &task_graph_file).await?
        }
        Command::Serve { host, port, state_dir } => {
            let state_dir = resolve_state_dir(state_dir);
            let state = build_state(&state_dir).await?;
            let addr: SocketAddr = format!("{host}:{port}").parse().context("invalid host or port")?;
            log_startup_paths(&state_dir, &addr);
            server::serve(addr, state.event_bus.clone(), state.store.clone()).await?;
            0
        }
        Command::Config { action, state_dir } => {
            let state = build_state(&resolve_state_dir(state_dir)).await?;
            match action {
                ConfigAction::Get { key } => config_cmd::get(&state, &key).await?,
                ConfigAction::Set { key, value } => config_cmd::set(&state, &key, &value).await?,
                ConfigAction::Migrate => config_cmd::migrate(&state).await?,
            }
        }
    };

    std::process::exit(exit_code);
}

fn resolve_state_dir(flag: Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    if let Ok(dir) = std::env::var("SUBSTRATE_STATE_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(".substrate")
}

fn log_startup_paths(state_dir: &PathBuf, addr: &SocketAddr) {
    let exe = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("<unknown>"));
    info!("starting substrate engine on http://{addr}");
    info!(
        "startup paths: exe={} cwd={} state_dir={}",
        exe.display(),
        cwd.display(),
        state_dir.display()
    );
}
