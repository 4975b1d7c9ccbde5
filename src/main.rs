mod auth;
mod cli;
mod config;
mod error;
mod insights;
mod metrics;
mod providers;
mod refresh;
mod server;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use env_logger::Env;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    info!(
        "Starting CircleCI insights exporter v{}",
        env!("CARGO_PKG_VERSION")
    );
    cli.execute().await?;

    Ok(())
}
