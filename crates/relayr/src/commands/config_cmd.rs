//! Config subcommand handlers.

use std::path::PathBuf;

use relayr_config::{self as config, Config, ConfigError};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

fn target_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = target_path(global);

    match args.command {
        ConfigCommand::Path => output::emit(global.output, &path, |p| p.display().to_string()),

        ConfigCommand::Show => {
            let cfg = config::load_config_from(&path)?;
            // Reject values the engine would refuse, so `show` doubles as a check.
            cfg.to_engine_config()?;
            let text = toml::to_string_pretty(&cfg).map_err(ConfigError::from)?;
            output::emit(global.output, &cfg, |_| text.trim_end().to_owned())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            config::save_config_to(&Config::default(), &path)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            output::emit(global.output, &path, |p| format!("wrote {}", p.display()))
        }
    }
}
