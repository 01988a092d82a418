//! Foreman CLI entry point.

use anyhow::Context;
use clap::Parser;

use foreman::cli::{commands, handle_error, Cli, Commands};
use foreman::infrastructure::logging::{LogConfig, LoggerImpl};
use foreman::ConfigLoader;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.config.as_deref() {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
    .context("Failed to load configuration");
    let config = match config {
        Ok(config) => config,
        Err(err) => handle_error(&err, cli.json),
    };

    let _logger = match LogConfig::try_from(&config.logging).and_then(|log| LoggerImpl::init(&log)) {
        Ok(logger) => logger,
        Err(err) => handle_error(&err.context("Failed to initialize logging"), cli.json),
    };

    let result = match cli.command {
        Commands::Plan(args) => commands::plan::execute(args, &config, cli.json).await,
        Commands::Queue(args) => commands::queue::execute(args, &config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(&err, cli.json);
    }
}
