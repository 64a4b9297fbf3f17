//! Streamable HTTP transport: JSON-RPC over `POST /mcp`, with the session
//! carried in the `mcp-session-id` header.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::SESSION_HEADER;
use crate::config::Config;
use crate::mcp::{error_response, parse_error, McpServer};

#[derive(Clone)]
struct StreamableState {
    config: Arc<Config>,
    sessions: Arc<RwLock<HashMap<String, Arc<McpServer>>>>,
}

pub fn router(config: Arc<Config>) -> Router {
    let state = StreamableState {
        config,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };
    Router::new()
        .route("/mcp", post(post_mcp).get(get_mcp).delete(delete_mcp))
        .with_state(state)
}

async fn post_mcp(State(state): State<StreamableState>, headers: HeaderMap, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(parse_error(&e))).into_response(),
    };

    let (server, new_session) = match session_id(&headers) {
        Some(id) => match state.sessions.read().await.get(id) {
            Some(server) => (Arc::clone(server), None),
            None => return no_session(),
        },
        None if is_initialize(&payload) => {
            let id = Uuid::new_v4().to_string();
            let server = Arc::new(McpServer::from_config(&state.config));
            state.sessions.write().await.insert(id.clone(), Arc::clone(&server));
            info!(session = %id, "session opened");
            (server, Some(id))
        }
        None => return no_session(),
    };

    let mut response = match server.handle_payload(payload).await {
        Some(reply) => Json(reply).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    if let Some(id) = new_session {
        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

/// Server-to-client stream. Nothing is pushed unprompted, so it only
/// carries keep-alives.
async fn get_mcp(State(state): State<StreamableState>, headers: HeaderMap) -> Response {
    if !has_session(&state, &headers).await {
        return invalid_session();
    }
    let stream = futures_util::stream::pending::<Result<Event, Infallible>>();
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

async fn delete_mcp(State(state): State<StreamableState>, headers: HeaderMap) -> Response {
    let removed = match session_id(&headers) {
        Some(id) => state.sessions.write().await.remove(id).is_some(),
        None => false,
    };
    if !removed {
        return invalid_session();
    }
    info!(session = session_id(&headers).unwrap_or_default(), "session closed");
    StatusCode::OK.into_response()
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

async fn has_session(state: &StreamableState, headers: &HeaderMap) -> bool {
    match session_id(headers) {
        Some(id) => state.sessions.read().await.contains_key(id),
        None => false,
    }
}

/// True when the payload (or any message of a batch) is an `initialize` request.
fn is_initialize(payload: &Value) -> bool {
    let is_init = |m: &Value| m.get("method").and_then(Value::as_str) == Some("initialize");
    match payload {
        Value::Array(messages) => messages.iter().any(is_init),
        message => is_init(message),
    }
}

fn no_session() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(error_response(
            Value::Null,
            -32000,
            "Bad Request: No valid session ID provided",
        )),
    )
        .into_response()
}

fn invalid_session() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid or missing session ID").into_response()
}
