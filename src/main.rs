use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tracing::{info, warn};

use pageflow::cli::{self, Cli, Command, ConfigCommand};
use pageflow::config::AppConfig;
use pageflow::logging::{self, targets};
use pageflow::server::startup::{run_server_with_config, ServerConfig};
use pageflow::server::{PipelineConfig, PipelineState};
use pageflow::sessions::FileSessionStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        // No subcommand or explicit `start` both launch the server.
        None | Some(Command::Start) => run_server(&cli).await,

        Some(Command::Config(sub)) => {
            match sub {
                ConfigCommand::Show => cli::handle_config_show(&cli)?,
                ConfigCommand::Path => cli::handle_config_path(&cli),
            }
            Ok(())
        }

        Some(Command::Version) => {
            cli::handle_version();
            Ok(())
        }
    }
}

async fn run_server(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = cli.load_config()?;
    logging::init_logging(cfg.log_config())?;

    log_startup_banner(cli, &cfg);

    let store = Arc::new(FileSessionStore::new(cfg.store_path()));
    let state = PipelineState::new(PipelineConfig::from_app_config(&cfg), store)
        .with_prototype(cfg.page_prototype())
        .with_menu(cfg.menu());

    let server_config = ServerConfig::new(state, Router::new(), cfg.bind_addr()?);
    let handle = run_server_with_config(server_config).await?;

    let reason = await_shutdown_trigger().await;
    info!(target: targets::HTTP, "Shutdown signal received ({})", reason);
    handle.shutdown().await;
    Ok(())
}

fn log_startup_banner(cli: &Cli, cfg: &AppConfig) {
    info!(target: targets::CONFIG, "pageflow v{}", env!("CARGO_PKG_VERSION"));
    info!(target: targets::CONFIG, "Config file: {}", cli.config_path().display());
    info!(target: targets::CONFIG, "Environment: {:?}", cfg.env);
    info!(target: targets::CONFIG, "Session store: {}", cfg.store_path().display());
    match cfg.session_cap().max() {
        Some(max) => info!(target: targets::CONFIG, "Session cap: {} per group", max),
        None => info!(target: targets::CONFIG, "Session cap: unlimited"),
    }
}

/// Wait for either Ctrl+C or SIGTERM (Unix only) and return a label for logging.
#[cfg(unix)]
async fn await_shutdown_trigger() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => "ctrl-c",
                _ = sigterm.recv() => "SIGTERM",
            }
        }
        Err(e) => {
            warn!(
                "Failed to install SIGTERM handler: {}; falling back to Ctrl+C only",
                e
            );
            ctrl_c().await
        }
    }
}

/// On non-Unix platforms, only Ctrl+C is available.
#[cfg(not(unix))]
async fn await_shutdown_trigger() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            warn!("Failed to listen for Ctrl+C: {}; shutting down", e);
            "signal-error"
        }
    }
}
