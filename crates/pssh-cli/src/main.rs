//! pssh
//!
//! Runs one shell command on every host of a host file over SSH, in
//! parallel, and exits with the first nonzero remote status.

mod cli;
mod output;

use std::io::IsTerminal;

use anyhow::{Context, Result};
use clap::Parser;
use pssh_core::config::{default_config_path, load_config, RunConfig};
use pssh_core::ConfigError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::Cli;
use crate::output::{print_error, print_warning};

/// Exit code for local failures before any host is contacted
const FATAL_EXIT_CODE: i32 = 1;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            print_error(&format!("{:#}", e));
            FATAL_EXIT_CODE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let (file_config, warning) = match &cli.config {
        Some(path) => {
            let config = load_config::<RunConfig>(path)
                .with_context(|| format!("Failed to load config from {:?}", path))?;
            (config, None)
        }
        None => match load_config::<RunConfig>(&default_config_path()) {
            Ok(config) => (config, None),
            Err(ConfigError::NotFound(_)) => (RunConfig::default(), None),
            Err(e) => (RunConfig::default(), Some(e)),
        },
    };

    let mut config = cli.apply(file_config);
    if !std::io::stdin().is_terminal() {
        config.stdin = true;
    }
    if !std::io::stdout().is_terminal() {
        config.color = false;
    }

    // Logs go to stderr so they never mix with remote output
    let log_level = if config.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Some(e) = warning {
        print_warning(&format!("Ignoring config file: {}", e));
    }
    tracing::debug!("Effective config: {:?}", config);

    let stdout = std::io::stdout();
    let code = pssh_runner::run_from_config(&config, &cli.command, stdout.lock()).await?;
    Ok(code)
}
