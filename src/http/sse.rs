//! Legacy HTTP+SSE transport.
//!
//! `GET /sse` opens an event stream whose first event (`endpoint`) names the
//! URL to post requests to. Responses to those posts arrive on the stream as
//! `message` events. Closing the stream ends the session.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::mcp::{parse_error, McpServer};

/// Outbound events buffered per session before posts start waiting.
const EVENT_BUFFER: usize = 64;

struct SseSession {
    server: Arc<McpServer>,
    events: mpsc::Sender<Event>,
}

type Sessions = Arc<RwLock<HashMap<String, SseSession>>>;

#[derive(Clone)]
struct SseState {
    config: Arc<Config>,
    sessions: Sessions,
}

#[derive(Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

pub fn router(config: Arc<Config>) -> Router {
    let state = SseState {
        config,
        sessions: Arc::new(RwLock::new(HashMap::new())),
    };
    Router::new()
        .route("/sse", get(open_stream))
        .route("/messages", post(post_message))
        .with_state(state)
}

/// Removes the session when the client's stream is dropped.
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let id = std::mem::take(&mut self.id);
        let sessions = Arc::clone(&self.sessions);
        tokio::spawn(async move {
            sessions.write().await.remove(&id);
            info!(session = %id, "sse session closed");
        });
    }
}

async fn open_stream(State(state): State<SseState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let server = Arc::new(McpServer::from_config(&state.config));
    state
        .sessions
        .write()
        .await
        .insert(id.clone(), SseSession { server, events: tx });
    info!(session = %id, "sse session opened");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={id}"));
    let guard = SessionGuard {
        id,
        sessions: Arc::clone(&state.sessions),
    };
    let messages = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|event| (Ok(event), (rx, guard)))
    });

    Sse::new(stream::once(async move { Ok(endpoint) }).chain(messages))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some((server, events)) = lookup(&state.sessions, query.session_id.as_deref()).await else {
        return (StatusCode::BAD_REQUEST, "No transport found for sessionId").into_response();
    };

    let reply = match serde_json::from_slice::<Value>(&body) {
        Ok(payload) => server.handle_payload(payload).await,
        Err(e) => {
            debug!("unparseable message: {e}");
            Some(parse_error(&e))
        }
    };
    if let Some(reply) = reply {
        let event = Event::default().event("message").data(reply.to_string());
        if events.send(event).await.is_err() {
            warn!("sse stream closed before the response could be delivered");
        }
    }
    (StatusCode::ACCEPTED, "Accepted").into_response()
}

async fn lookup(sessions: &Sessions, id: Option<&str>) -> Option<(Arc<McpServer>, mpsc::Sender<Event>)> {
    let sessions = sessions.read().await;
    let session = sessions.get(id?)?;
    Some((Arc::clone(&session.server), session.events.clone()))
}
