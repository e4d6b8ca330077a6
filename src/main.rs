mod arc;
mod cli;
mod config;
mod db;
mod error;
mod feedback;
mod generator;
mod merge;
mod normalize;
mod platform;
mod playlist;
mod recommend;
mod routine;
mod slot;
mod store;
mod sync;
mod tools;
mod types;
mod web;

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CHOREO_LOG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the MCP transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    cli::main().await
}
