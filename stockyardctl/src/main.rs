mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use stockyard_config::{ConfigSource, LoggingConfig, StockyardConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, source) = match &cli.config {
        Some(path) => {
            let config = StockyardConfig::load_from_file(path)?;
            config.validate().context("invalid configuration")?;
            (config, ConfigSource::File(path.clone()))
        }
        None => StockyardConfig::load_from_env()?,
    };
    init_tracing(&config.logging);
    tracing::debug!(source = ?source, "using configuration");

    match cli.command {
        Command::Simulate(args) => commands::simulate::run(args, config).await,
        Command::Plan(args) => commands::plan::run(args, &config),
        Command::Send(args) => commands::send::run(args, &config).await,
        Command::Config(args) => commands::config::run(args, &config, &source),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| logging.filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
