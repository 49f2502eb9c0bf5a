// src/mcp/http.rs
// MCP over the streamable HTTP transport

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::BrokerServer;
use crate::config::Config;

/// Create the MCP HTTP service. A new server (and session) is created for
/// each transport session.
pub fn create_mcp_service(
    config: Arc<Config>,
    cancellation_token: CancellationToken,
) -> StreamableHttpService<BrokerServer, LocalSessionManager> {
    let service_factory = move || Ok(BrokerServer::new(config.clone()));
    let session_manager = Arc::new(LocalSessionManager::default());

    let http_config = StreamableHttpServerConfig {
        sse_keep_alive: Some(Duration::from_secs(15)),
        sse_retry: Some(Duration::from_secs(3)),
        stateful_mode: true,
        cancellation_token,
    };

    StreamableHttpService::new(service_factory, session_manager, http_config)
}

/// Serve MCP over HTTP until the idle timeout elapses or the process is
/// stopped.
pub async fn serve_http(config: Arc<Config>) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let service = create_mcp_service(config.clone(), shutdown.clone());

    let last_activity = Arc::new(Mutex::new(Instant::now()));
    let touch = last_activity.clone();
    let app = Router::new()
        .nest_service("/mcp", service)
        .layer(middleware::from_fn(move |req: Request, next: Next| {
            let touch = touch.clone();
            async move {
                if let Ok(mut last) = touch.lock() {
                    *last = Instant::now();
                }
                let response: Response = next.run(req).await;
                response
            }
        }));

    let address = format!("{}:{}", config.http_host, config.http_port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("MCP server listening on http://{address}/mcp");

    spawn_idle_watchdog(config, last_activity, shutdown.clone());

    let graceful = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await?;
    Ok(())
}

/// Tear the HTTP server down after the configured inactivity window. Clients
/// are warned (via the transport's keep-alive stream) once the notification
/// window opens.
fn spawn_idle_watchdog(
    config: Arc<Config>,
    last_activity: Arc<Mutex<Instant>>,
    shutdown: CancellationToken,
) {
    let idle = Duration::from_millis(config.idle_timeout_ms);
    let notify_at = Duration::from_millis(config.notification_timeout_ms.min(config.idle_timeout_ms));

    tokio::spawn(async move {
        let mut notified = false;
        loop {
            tokio::time::sleep(Duration::from_secs(5)).await;
            let elapsed = last_activity
                .lock()
                .map(|last| last.elapsed())
                .unwrap_or_default();

            if !notified && elapsed >= notify_at && notify_at < idle {
                warn!(
                    "no client activity for {}s; shutting down in {}s unless a request arrives",
                    elapsed.as_secs(),
                    (idle - elapsed).as_secs()
                );
                notified = true;
            } else if elapsed < notify_at {
                notified = false;
            }

            if elapsed >= idle {
                info!("idle timeout reached; shutting down HTTP transport");
                shutdown.cancel();
                return;
            }
        }
    });
}
