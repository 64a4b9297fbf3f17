//! # mcp-hass
//!
//! MCP (Model Context Protocol) server exposing a Home Assistant hub to AI
//! agents: entity states, service calls, automations and their traces,
//! scripts, helpers, registries and Lovelace dashboards.
//!
//! Capabilities are served as MCP resources (reads) and tools (writes), or
//! all as tools when `RESOURCES_TO_TOOLS=true`. The hub connection is opened
//! lazily on first use.
//!
//! ## Architecture
//!
//! ```text
//! main.rs              entry point, logging, transport dispatch
//! config.rs            defaults, JSON file, env vars, CLI flags
//! mcp.rs               JSON-RPC dispatcher and the stdio loop
//! http/                streamable HTTP and SSE transports (axum)
//! registry.rs          capability descriptors, ceiling, resource→tool adapter
//! capabilities/        automation, config, entity_registry, entities, lovelace
//! hass/                websocket + REST client, typed records, dashboard schema
//! ```

mod capabilities;
mod config;
mod hass;
mod http;
mod mcp;
mod registry;
#[cfg(test)]
mod testing;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::{Cli, Transport};
use mcp::McpServer;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match config::load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mcp-hass: configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Logs go to stderr; stdout carries the stdio transport.
    let default_level = if config.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("mcp-hass v{} starting", env!("CARGO_PKG_VERSION"));
    if config.debug {
        tracing::debug!(config = ?config.redacted(), "effective configuration");
    }
    if config.inspect && config.access_token.is_empty() {
        tracing::warn!("No access token configured; capabilities will fail until one is set");
    }

    match config.transport {
        Transport::Stdio => mcp::run_stdio(McpServer::from_config(&config)).await,
        Transport::Sse | Transport::StreamableHttp => {
            if let Err(e) = http::serve(config).await {
                tracing::error!("HTTP server error: {e}");
                std::process::exit(1);
            }
        }
    }
}
