#![allow(non_snake_case)]

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use calendarBot::cli::{self, Cli, Commands};
use calendarBot::config::{AppConfig, Settings};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "calendarBot=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let settings = Settings::from_config(&config)?;
    cli::execute(cli.command.unwrap_or(Commands::Run), settings).await
}
