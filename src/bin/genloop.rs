//! genloop CLI Binary
//!
//! Command-line interface for the generation session controller.

use clap::Parser;
use genloop::cli::{exit_code, map_error, Cli, RunContext};
use genloop::config::{ConfigLoader, GenloopConfig};
use genloop::error::GenError;
use genloop::logging::{init_logging, LoggingConfig};
use std::path::PathBuf;
use std::process;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (logging_config, log_file) = build_logging_config(&cli);
    if let Err(e) = init_logging(&logging_config, log_file) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(exit_code(&e));
    }

    info!("genloop starting");

    match run(cli).await {
        Ok(output) => {
            info!("command completed");
            println!("{}", output);
        }
        Err(e) => {
            let code = match e.downcast_ref::<GenError>() {
                Some(err) => {
                    eprintln!("{}", map_error(err));
                    exit_code(err)
                }
                None => {
                    eprintln!("genloop: {:#}", e);
                    0
                }
            };
            error!(error = %e, exit_code = code, "command failed");
            process::exit(code);
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())?;
    info!(state_dir = %context.state_dir().display(), "context initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing the current item");
            let _ = shutdown_tx.send(true);
        }
    });

    Ok(context.execute(&cli.command, shutdown_rx).await?)
}

/// Build logging configuration from CLI args and the config file, plus the
/// default log file under the state directory.
/// Precedence: CLI flags override config file override defaults.
fn build_logging_config(cli: &Cli) -> (LoggingConfig, PathBuf) {
    let loaded = ConfigLoader::load(&cli.workspace, cli.config.as_deref())
        .unwrap_or_else(|_| GenloopConfig::default());
    let default_file = loaded
        .storage
        .resolve_state_dir(&cli.workspace)
        .join("logs")
        .join("genloop.log");
    let mut config = loaded.logging;

    if cli.verbose {
        config.level = "debug".to_string();
        // Keep file logs but make verbose mode visible in the terminal.
        // An explicit --log-output value still takes precedence below.
        if config.output == "file" {
            config.output = "file+stderr".to_string();
        }
    }
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.clone();
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.clone();
    }
    if let Some(ref file) = cli.log_file {
        config.file = Some(file.clone());
    }

    (config, default_file)
}
