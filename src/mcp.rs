//! MCP (Model Context Protocol) JSON-RPC handler.
//!
//! [`McpServer`] turns one decoded JSON-RPC message (or batch) into its
//! response; the transports only move bytes. [`run_stdio`] reads requests
//! from stdin, one per line, and writes responses to stdout.
//!
//! ## Supported methods
//!
//! | Method                     | Description                          |
//! |----------------------------|--------------------------------------|
//! | `initialize`               | Handshake, returns capabilities      |
//! | `ping`                     | Liveness check                       |
//! | `tools/list`               | List tool definitions                |
//! | `tools/call`               | Execute a tool and return its result |
//! | `resources/list`           | List fixed-URI resources             |
//! | `resources/templates/list` | List URI-templated resources         |
//! | `resources/read`           | Read a resource by URI               |
//!
//! Notifications get no response.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::capabilities::{build_registry, CapabilityOptions};
use crate::config::Config;
use crate::hass::provider::ConnectionProvider;
use crate::registry::{CapabilityRegistry, Presentation};

pub const SERVER_NAME: &str = "mcp-hass";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Newest first; unknown client versions get the first entry.
const PROTOCOL_VERSIONS: [&str; 3] = ["2025-06-18", "2025-03-26", "2024-11-05"];
const INSTRUCTIONS: &str = "This server provides access to Home Assistant functionalities through Model Context Protocol. \
You can list entities, call services, manage automations, and more.";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const RESOURCE_NOT_FOUND: i64 = -32002;

/// Protocol handler over one capability registry.
pub struct McpServer {
    registry: CapabilityRegistry,
}

impl McpServer {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Server with its own lazily connected hub client.
    pub fn from_config(config: &Config) -> Self {
        let provider = Arc::new(ConnectionProvider::new(
            config.url.clone(),
            config.access_token.clone(),
        ));
        let options = CapabilityOptions {
            presentation: if config.resources_to_tools {
                Presentation::Tools
            } else {
                Presentation::Resources
            },
            debug: config.debug,
            limit: config.limit_resources,
            no_long_output_types: config.no_long_output_types,
        };
        Self::new(build_registry(options, provider))
    }

    /// Handle a single message or a batch. `None` when nothing is owed back
    /// (notifications, or a batch of them).
    pub async fn handle_payload(&self, payload: Value) -> Option<Value> {
        match payload {
            Value::Array(messages) if messages.is_empty() => {
                Some(error_response(Value::Null, INVALID_REQUEST, "Invalid Request: empty batch"))
            }
            Value::Array(messages) => {
                let mut responses = Vec::new();
                for message in messages {
                    if let Some(response) = self.handle_message(message).await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then(|| Value::Array(responses))
            }
            message => self.handle_message(message).await,
        }
    }

    /// Handle one JSON-RPC message.
    pub async fn handle_message(&self, request: Value) -> Option<Value> {
        if !request.is_object() {
            return Some(error_response(Value::Null, INVALID_REQUEST, "Invalid Request"));
        }
        let method = request.get("method").and_then(Value::as_str).unwrap_or("");

        // Notifications (no id)
        let Some(id) = request.get("id").cloned() else {
            tracing::debug!(method, "notification");
            return None;
        };
        // A response from the client; nothing was asked of it.
        if method.is_empty() && (request.get("result").is_some() || request.get("error").is_some()) {
            return None;
        }

        let params = request.get("params").cloned().unwrap_or_else(|| json!({}));
        let response = match method {
            "initialize" => handle_initialize(&params),
            "ping" => json!({ "jsonrpc": "2.0", "result": {} }),
            "tools/list" => json!({
                "jsonrpc": "2.0",
                "result": { "tools": self.registry.tool_definitions() }
            }),
            "tools/call" => self.handle_tools_call(&params).await,
            "resources/list" => json!({
                "jsonrpc": "2.0",
                "result": { "resources": self.registry.resource_definitions() }
            }),
            "resources/templates/list" => json!({
                "jsonrpc": "2.0",
                "result": { "resourceTemplates": self.registry.resource_template_definitions() }
            }),
            "resources/read" => self.handle_resources_read(&params).await,
            _ => error_response(
                Value::Null,
                METHOD_NOT_FOUND,
                &format!("Method not found: {method}"),
            ),
        };
        Some(inject_id(response, id))
    }

    /// Handle `tools/call`. Tool failures are results with `isError`, not
    /// protocol errors.
    async fn handle_tools_call(&self, params: &Value) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return error_response(Value::Null, INVALID_PARAMS, "Missing tool name");
        };
        let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.registry.call_tool(name, args).await {
            Some(result) => json!({ "jsonrpc": "2.0", "result": result.to_json() }),
            None => error_response(Value::Null, INVALID_PARAMS, &format!("Tool {name} not found")),
        }
    }

    async fn handle_resources_read(&self, params: &Value) -> Value {
        let Some(uri) = params.get("uri").and_then(Value::as_str) else {
            return error_response(Value::Null, INVALID_PARAMS, "Missing resource uri");
        };

        match self.registry.read_resource(uri).await {
            Some(Ok(contents)) => json!({
                "jsonrpc": "2.0",
                "result": {
                    "contents": contents.iter().map(|c| c.to_json()).collect::<Vec<_>>()
                }
            }),
            Some(Err(message)) => {
                tracing::warn!(uri, "{message}");
                error_response(Value::Null, INTERNAL_ERROR, &message)
            }
            None => error_response(
                Value::Null,
                RESOURCE_NOT_FOUND,
                &format!("Resource {uri} not found"),
            ),
        }
    }
}

/// Handle `initialize`: negotiate the protocol version and describe the server.
fn handle_initialize(params: &Value) -> Value {
    let requested = params.get("protocolVersion").and_then(Value::as_str);
    let version = requested
        .and_then(|v| PROTOCOL_VERSIONS.iter().find(|known| **known == v))
        .unwrap_or(&PROTOCOL_VERSIONS[0]);
    json!({
        "jsonrpc": "2.0",
        "result": {
            "protocolVersion": version,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false }
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": SERVER_VERSION
            },
            "instructions": INSTRUCTIONS
        }
    })
}

/// JSON-RPC error object.
pub fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message }
    })
}

/// Response to a body that is not JSON.
pub fn parse_error(err: &serde_json::Error) -> Value {
    error_response(Value::Null, PARSE_ERROR, &format!("Parse error: {err}"))
}

/// Inject the request `id` into a response object.
fn inject_id(mut response: Value, id: Value) -> Value {
    response["id"] = id;
    response
}

/// Run the MCP server on stdio, processing JSON-RPC requests until EOF.
pub async fn run_stdio(server: McpServer) {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) => {
                tracing::error!("stdin read error: {e}");
                break;
            }
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(trimmed) {
            Ok(payload) => server.handle_payload(payload).await,
            Err(e) => Some(parse_error(&e)),
        };
        if let Some(response) = response {
            write_response(&mut stdout, &response).await;
        }
    }
    tracing::info!("stdin closed, shutting down");
}

/// Write a JSON-RPC response to stdout (one line, flushed immediately).
async fn write_response(stdout: &mut tokio::io::Stdout, response: &Value) {
    let mut output = serde_json::to_string(response).unwrap_or_default();
    output.push('\n');
    if let Err(e) = stdout.write_all(output.as_bytes()).await {
        tracing::error!("stdout write error: {e}");
    }
    if let Err(e) = stdout.flush().await {
        tracing::error!("stdout flush error: {e}");
    }
}
