//! Clap derive structures for the `relayr` CLI.
//!
//! Defines the command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// relayr -- drive a simulated relayr device from the command line
#[derive(Debug, Parser)]
#[command(
    name = "relayr",
    version,
    about = "Drive a simulated relayr device from the command line",
    long_about = "Wires a device entity to an in-process connection and lets you\n\
        stream its readings, run onboarding and firmware updates, send\n\
        commands and rename it.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, short = 'c', env = "RELAYR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "RELAYR_OUTPUT",
        default_value = "text",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    Text,
    /// One JSON document per line
    Json,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the simulated device
    Info,

    /// Stream readings (and optionally connectivity changes)
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Run the onboarding process
    Onboard(ProvisionArgs),

    /// Run a firmware update
    #[command(alias = "fw")]
    Firmware(ProvisionArgs),

    /// Send a command to the device
    #[command(alias = "cmd")]
    Command(CommandArgs),

    /// Rename the device
    Rename(RenameArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many readings (runs until Ctrl-C otherwise)
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    /// Also print connectivity changes
    #[arg(long)]
    pub connectivity: bool,
}

// ── Provisioning ─────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Deadline in seconds; falls back to the handler or config default
    #[arg(long, short = 't', allow_negative_numbers = true)]
    pub timeout: Option<i64>,

    /// Make the simulated device refuse at this step (1-based)
    #[arg(long, value_name = "STEP")]
    pub fail_at: Option<u32>,

    /// Extra handler option, repeatable (value parsed as JSON when possible)
    #[arg(long = "set", short = 's', value_name = "KEY=VALUE")]
    pub options: Vec<String>,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CommandArgs {
    /// Command meaning: a name, or an integer code
    pub meaning: String,

    /// Command value (parsed as JSON when possible, a string otherwise)
    pub value: String,

    /// Target path on the device
    #[arg(long, short = 'p')]
    pub path: Option<String>,

    /// Simulate a transport failure for this command
    #[arg(long)]
    pub fail: bool,
}

// ── Rename ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RenameArgs {
    /// The new name
    pub name: String,

    /// Make the simulated server reject the change
    #[arg(long)]
    pub reject: bool,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (file + environment)
    Show,

    /// Print the configuration file path
    Path,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_tree_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn negative_timeout_parses() {
        let cli = Cli::try_parse_from(["relayr", "onboard", "--timeout", "-5"]);
        let Ok(Cli {
            command: Command::Onboard(args),
            ..
        }) = cli
        else {
            panic!("expected onboard args");
        };
        assert_eq!(args.timeout, Some(-5));
    }
}
