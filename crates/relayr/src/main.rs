mod cli;
mod commands;
mod error;
mod output;
mod simulator;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, GlobalOpts};
use crate::error::CliError;
use crate::simulator::Simulator;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a device
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        cmd => {
            let cfg = load_config(&cli.global)?;
            let sim = Simulator::from_config(&cfg)?;

            tracing::debug!(command = ?cmd, "dispatching command");
            let result = commands::dispatch(cmd, &sim, &cli.global).await;
            sim.shutdown().await;
            result
        }
    }
}

/// Load the config from `--config` or the canonical path, plus environment.
fn load_config(global: &GlobalOpts) -> Result<relayr_config::Config, CliError> {
    let cfg = match &global.config {
        Some(path) => relayr_config::load_config_from(path)?,
        None => relayr_config::load_config()?,
    };
    Ok(cfg)
}
