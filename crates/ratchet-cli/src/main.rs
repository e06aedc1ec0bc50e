mod builtin;
mod config;
mod run_cmd;
mod status_cmd;
mod validate_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ratchet_store::StoreConfig;

use config::{RatchetConfig, RunOverrides};

#[derive(Parser)]
#[command(name = "ratchet", about = "Adaptive plan/execute/evaluate loop over a task DAG")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a ratchet config file with the default settings
    Init {
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Run the adaptive loop over a plan file
    Run {
        /// Path to the plan TOML file
        plan: PathBuf,
        /// Maximum number of tasks running at once
        #[arg(long)]
        max_concurrent: Option<usize>,
        /// Timeout per executor call in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Executor calls per task
        #[arg(long)]
        retry: Option<u32>,
        /// Hard ceiling on loop iterations
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Stop once an iteration's confidence reaches this (0..=1)
        #[arg(long)]
        target_confidence: Option<f64>,
        /// Snapshot file (overrides RATCHET_STATE_FILE env var)
        #[arg(long)]
        state_file: Option<PathBuf>,
    },
    /// Parse and validate a plan file
    Validate {
        /// Path to the plan TOML file
        plan: PathBuf,
    },
    /// Show a saved loop snapshot
    Status {
        /// Snapshot file (defaults to the configured state file)
        path: Option<PathBuf>,
    },
}

/// Execute the `ratchet init` command: write config file.
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile::default();
    let path = config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  loop.max_iterations = {}", cfg.loop_config.max_iterations);
    println!(
        "  loop.orchestrator.max_concurrent_tasks = {}",
        cfg.loop_config.orchestrator.max_concurrent_tasks
    );
    println!();
    println!("Next: run `ratchet validate <plan.toml>` to check a plan.");

    Ok(())
}

/// Snapshot path for `ratchet status`: argument > env var > config file > default.
fn resolve_status_path(path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = path {
        return path;
    }
    RatchetConfig::resolve(&RunOverrides::default())
        .map(|c| c.store)
        .unwrap_or_else(|_| StoreConfig::from_env())
        .state_file
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { force } => {
            cmd_init(force)?;
        }
        Commands::Run {
            plan,
            max_concurrent,
            timeout,
            retry,
            max_iterations,
            target_confidence,
            state_file,
        } => {
            let overrides = RunOverrides {
                max_concurrent,
                timeout_secs: timeout,
                retry_attempts: retry,
                max_iterations,
                target_confidence,
                state_file,
            };
            let resolved = RatchetConfig::resolve(&overrides)?;
            run_cmd::run_plan(&plan, resolved).await?;
        }
        Commands::Validate { plan } => {
            validate_cmd::run_validate(&plan)?;
        }
        Commands::Status { path } => {
            let path = resolve_status_path(path);
            status_cmd::run_status(&path).await?;
        }
    }

    Ok(())
}
