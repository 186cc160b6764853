mod cli;
mod config;
mod inspect;
mod logger;
mod service;

use std::path::PathBuf;

use anyhow::{Context, Result};
use cli::Command;
use config::Config;

fn main() {
    dotenvy::dotenv().ok();
    let top_level: cli::TopLevel = argh::from_env();
    logger::init(&top_level.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build the tokio runtime");

    let result = runtime.block_on(run(top_level));
    match result {
        Ok(()) => std::process::exit(0),
        Err(err) => {
            tracing::error!("{err:#}");
            std::process::exit(2);
        }
    }
}

async fn run(top_level: cli::TopLevel) -> Result<()> {
    let config_path = resolve_config_path(top_level.config)?;
    let config = Config::load(&config_path)?;

    match top_level.command {
        Command::InitializeDatabase(_) => service::initialize_database(config).await,
        Command::HelperService(_) => service::run(config).await,
        Command::ScanReceived(_) => service::scan_received(config).await,
    }
}

fn resolve_config_path(given: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = given {
        return Ok(path);
    }
    std::env::var("CRYPTOASSETS_CONFIG")
        .map(PathBuf::from)
        .context("no --config given and CRYPTOASSETS_CONFIG is not set")
}
