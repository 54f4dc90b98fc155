//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the server
//! - `config show|path` -- inspect configuration
//! - `version` -- print build/version info

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{self, AppConfig, ConfigError};

/// Server-rendered page pipeline with multi-session management.
#[derive(Parser, Debug)]
#[command(
    name = "pageflow",
    version = env!("CARGO_PKG_VERSION"),
    about = "pageflow - session-aware page server"
)]
pub struct Cli {
    /// Configuration file (default: $PAGEFLOW_CONFIG_PATH or ~/.pageflow/pageflow.json5).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default when no subcommand is given).
    Start,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version and platform information.
    Version,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the fully loaded configuration as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

impl Cli {
    /// Configuration file to use: `--config` when given, the default otherwise.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(config::get_config_path)
    }

    /// Load the configuration this invocation points at.
    pub fn load_config(&self) -> Result<AppConfig, ConfigError> {
        match &self.config {
            Some(path) => config::load_config_from(path),
            None => config::load_config(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Run the `config show` subcommand.
pub fn handle_config_show(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = cli.load_config()?;
    let pretty = serde_json::to_string_pretty(&cfg)?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(cli: &Cli) {
    println!("{}", cli.config_path().display());
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("pageflow {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform:   {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}
