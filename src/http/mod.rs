//! HTTP transports for the MCP server.
//!
//! | Transport        | Routes                                   |
//! |------------------|------------------------------------------|
//! | `streamablehttp` | `POST/GET/DELETE /mcp`                   |
//! | `sse`            | `GET /sse`, `POST /messages?sessionId=…` |
//!
//! Every session gets its own [`McpServer`](crate::mcp::McpServer) and with
//! it its own hub connection.

pub mod sse;
pub mod streamable;

use std::sync::Arc;

use axum::http::{header, HeaderName, Method};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{Config, Transport};

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Router for the configured HTTP transport, with CORS and request tracing.
pub fn app(config: Arc<Config>) -> Router {
    let router = match config.transport {
        Transport::Sse => sse::router(config),
        Transport::StreamableHttp | Transport::Stdio => streamable::router(config),
    };
    router
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

fn cors_layer() -> CorsLayer {
    let session = HeaderName::from_static(SESSION_HEADER);
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT, session.clone()])
        .expose_headers([session])
}

/// Serve the configured HTTP transport until SIGINT/SIGTERM.
pub async fn serve(config: Config) -> std::io::Result<()> {
    let config = Arc::new(config);
    let listener = TcpListener::bind(("0.0.0.0", config.port)).await?;
    info!(
        transport = %config.transport,
        "Listening on {}",
        listener.local_addr()?
    );

    axum::serve(listener, app(config))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("Shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
