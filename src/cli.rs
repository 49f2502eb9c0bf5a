// src/cli.rs
// Server bootstrap: logging setup and transport main loops

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mdbmcp::config::{Config, LoggerKind};
use mdbmcp::mcp::BrokerServer;

/// Wire up the configured log sinks. Stdout stays untouched; the stdio
/// transport owns it. The `mcp` sink is a transport-layer concern and needs
/// no subscriber here.
pub fn init_logging(config: &Config) -> Result<()> {
    let stderr_layer = config.loggers.contains(&LoggerKind::Stderr).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
    });

    let disk_layer = if config.loggers.contains(&LoggerKind::Disk) {
        std::fs::create_dir_all(&config.log_path)
            .with_context(|| format!("creating log directory {}", config.log_path.display()))?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(config.log_path.join("mdbmcp.log"))
            .with_context(|| "opening log file")?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Arc::new(file))
                .with_ansi(false),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::filter::LevelFilter::INFO)
        .with(stderr_layer)
        .with(disk_layer)
        .init();
    Ok(())
}

/// Run the MCP server over stdio until the client disconnects.
pub async fn run_stdio_server(config: Arc<Config>) -> Result<()> {
    let server = BrokerServer::new(config);
    let session = server.session().clone();

    let transport = rmcp::transport::io::stdio();
    let service = rmcp::serve_server(server, transport).await?;
    info!("MCP server serving on stdio");
    service.waiting().await?;

    // Transport closed: tear the session down, closing the provider.
    session.disconnect().await;
    Ok(())
}

/// Run the MCP server over the streamable HTTP transport.
pub async fn run_http_server(config: Arc<Config>) -> Result<()> {
    mdbmcp::mcp::http::serve_http(config).await
}
