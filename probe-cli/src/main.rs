//! # vmprobe
//!
//! Run integration tests against freshly provisioned machines.
//!
//! ## Commands
//!
//! - `list`: Show registered tests
//! - `run`: Provision, run and tear down the selected tests
//!
//! ## Example
//!
//! ```bash
//! # Show every test that runs on qemu-unpriv
//! vmprobe list --platform qemu-unpriv
//!
//! # Run the multipath test against the hosts in vmprobe.toml
//! vmprobe run multipath --json-report report.json
//!
//! # Demo run against in-process mock machines
//! vmprobe --mock run 'reboot.*'
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use probe_core::TestRegistry;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod report;
mod retry;

use commands::list::{self, ListArgs};
use commands::run::{self, RunArgs};
use config::Config;

/// Run integration tests against freshly provisioned machines.
#[derive(Parser, Debug)]
#[command(name = "vmprobe")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: ./vmprobe.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Use in-process mock machines instead of the host pool (for testing/demo)
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show registered tests
    List(ListArgs),

    /// Run selected tests
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let mut registry = TestRegistry::new();
    probe_suite::register_all(&mut registry).context("Failed to register tests")?;

    match cli.command {
        Commands::List(args) => {
            list::run(&registry, &args)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => {
            args.apply(&mut config);
            let passed = run::run(&config, &registry, &args, cli.mock).await?;
            Ok(if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

/// Log to stderr, filtered by `RUST_LOG` or else `level`.
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
