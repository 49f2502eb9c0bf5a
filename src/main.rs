// src/main.rs
// MCP broker server for MongoDB, Atlas, and Voyage AI vector search

mod cli;

use anyhow::Result;
use clap::Parser;

use mdbmcp::config::{Cli, Transport, log_warnings};

#[tokio::main]
async fn main() -> Result<()> {
    let (config, validation) = Cli::parse().into_config();
    if !validation.is_valid() {
        eprintln!("{}", validation.report());
        std::process::exit(1);
    }

    cli::init_logging(&config)?;
    log_warnings(&validation);

    let config = std::sync::Arc::new(config);
    match config.transport {
        Transport::Stdio => cli::run_stdio_server(config).await,
        Transport::Http => cli::run_http_server(config).await,
    }
}
