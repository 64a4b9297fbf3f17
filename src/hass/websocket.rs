//! Persistent websocket connection to the hub's `/api/websocket` endpoint.
//!
//! [`HassWebSocket`] performs the auth handshake, then hands the stream to a
//! background I/O task. Commands get a per-connection increasing `id`; the
//! task routes each `result` frame back to the waiting caller through a
//! oneshot channel keyed by that id.
//!
//! There is no reconnect loop here. When the socket ends, every pending
//! command fails with [`HassError::Closed`], the `connected` flag drops, and
//! the [`ConnectionProvider`](super::provider::ConnectionProvider) builds a
//! fresh connection on next use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::HassError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, HassError>>>>>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Authenticated command channel to one hub.
pub struct HassWebSocket {
    sender: mpsc::Sender<Value>,
    pending: Pending,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
}

impl HassWebSocket {
    /// Open the websocket, authenticate with `token`, and spawn the I/O task.
    pub async fn connect(url: &str, token: &str) -> Result<Self, HassError> {
        let ws_url = build_ws_url(url)?;

        let (mut stream, _) = tokio::time::timeout(
            HANDSHAKE_TIMEOUT,
            tokio_tungstenite::connect_async(ws_url.as_str()),
        )
        .await
        .map_err(|_| HassError::Connection(format!("timed out connecting to {ws_url}")))?
        .map_err(|e| HassError::Connection(format!("{ws_url}: {e}")))?;

        let ha_version = tokio::time::timeout(HANDSHAKE_TIMEOUT, authenticate(&mut stream, token))
            .await
            .map_err(|_| HassError::Connection("timed out during auth handshake".into()))??;
        tracing::info!(url = %ws_url, version = ha_version.as_deref().unwrap_or("unknown"), "connected to Home Assistant");

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let (out_tx, out_rx) = mpsc::channel::<Value>(64);

        tokio::spawn(ws_io_loop(
            stream,
            out_rx,
            Arc::clone(&pending),
            Arc::clone(&connected),
        ));

        Ok(Self {
            sender: out_tx,
            pending,
            next_id: AtomicU64::new(1),
            connected,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Send `{"type": kind, ...fields}` and wait for the matching `result`.
    ///
    /// `fields` must be a JSON object (or `null` for none).
    pub async fn command(&self, kind: &str, fields: Value) -> Result<Value, HassError> {
        let mut message = match fields {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return Err(HassError::InvalidInput(format!(
                    "websocket command fields must be an object, got {other}"
                )))
            }
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        message.insert("id".into(), json!(id));
        message.insert("type".into(), json!(kind));

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.sender.send(Value::Object(message)).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(HassError::Closed);
        }
        tracing::debug!(id, kind, "websocket command sent");

        rx.await.map_err(|_| HassError::Closed)?
    }
}

/// Run the `auth_required` → `auth` → `auth_ok` exchange.
///
/// Returns the hub version from `auth_ok` when present.
async fn authenticate(stream: &mut WsStream, token: &str) -> Result<Option<String>, HassError> {
    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| HassError::Connection(e.to_string()))?;
        let Message::Text(text) = frame else {
            continue;
        };
        let msg: Value = serde_json::from_str(&text)?;
        match msg["type"].as_str().unwrap_or("") {
            "auth_required" => {
                let auth = json!({ "type": "auth", "access_token": token });
                stream
                    .send(Message::Text(auth.to_string()))
                    .await
                    .map_err(|e| HassError::Connection(e.to_string()))?;
            }
            "auth_ok" => return Ok(msg["ha_version"].as_str().map(String::from)),
            "auth_invalid" => {
                let reason = msg["message"].as_str().unwrap_or("invalid access token");
                return Err(HassError::Connection(format!(
                    "authentication rejected: {reason}"
                )));
            }
            other => {
                return Err(HassError::Protocol(format!(
                    "unexpected message during auth: {other}"
                )))
            }
        }
    }
    Err(HassError::Connection(
        "connection closed during auth handshake".into(),
    ))
}

async fn ws_io_loop(
    ws_stream: WsStream,
    mut out_rx: mpsc::Receiver<Value>,
    pending: Pending,
    connected: Arc<AtomicBool>,
) {
    let (mut ws_sink, mut ws_reader) = ws_stream.split();

    loop {
        tokio::select! {
            msg = ws_reader.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Value>(&text) {
                        Ok(Value::Array(batch)) => {
                            for item in batch {
                                dispatch_message(item, &pending).await;
                            }
                        }
                        Ok(parsed) => dispatch_message(parsed, &pending).await,
                        Err(e) => tracing::warn!("ignoring malformed websocket frame: {e}"),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!("Home Assistant websocket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!("Home Assistant websocket error: {e}");
                        break;
                    }
                    _ => {}
                }
            }
            msg = out_rx.recv() => {
                match msg {
                    Some(value) => {
                        if let Err(e) = ws_sink.send(Message::Text(value.to_string())).await {
                            tracing::warn!("websocket send failed: {e}");
                            break;
                        }
                    }
                    None => {
                        // Client dropped
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    for (_, waiter) in pending.lock().await.drain() {
        let _ = waiter.send(Err(HassError::Closed));
    }
}

/// Route a hub frame to the command waiting on its id.
async fn dispatch_message(msg: Value, pending: &Pending) {
    let Some(id) = msg["id"].as_u64() else {
        return;
    };
    let outcome = match msg["type"].as_str().unwrap_or("") {
        "result" => {
            if msg["success"].as_bool().unwrap_or(false) {
                Ok(msg.get("result").cloned().unwrap_or(Value::Null))
            } else {
                Err(HassError::Command {
                    code: msg["error"]["code"].as_str().unwrap_or("unknown_error").to_string(),
                    message: msg["error"]["message"].as_str().unwrap_or("").to_string(),
                })
            }
        }
        "pong" => Ok(Value::Null),
        // Subscription events; nothing subscribes yet.
        _ => return,
    };
    if let Some(waiter) = pending.lock().await.remove(&id) {
        let _ = waiter.send(outcome);
    }
}

/// Derive `ws(s)://host[:port]/api/websocket` from the configured hub URL.
pub fn build_ws_url(base_url: &str) -> Result<String, HassError> {
    let base = base_url.trim().trim_end_matches('/');
    let base = base.trim_end_matches("/api/websocket");
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(HassError::InvalidInput(format!(
            "Invalid URL scheme: {base_url}"
        )));
    };
    Ok(format!("{ws_base}/api/websocket"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal hub: auth with `token`, then answer `echo`, `fail`, `ping`
    /// and `close` commands.
    async fn fake_hub(token: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                    let hello = json!({ "type": "auth_required", "ha_version": "2025.1.0" });
                    ws.send(Message::Text(hello.to_string())).await.unwrap();

                    let Some(Ok(Message::Text(auth))) = ws.next().await else { return };
                    let auth: Value = serde_json::from_str(&auth).unwrap();
                    if auth["access_token"] != token {
                        let nope = json!({ "type": "auth_invalid", "message": "Invalid access token or password" });
                        ws.send(Message::Text(nope.to_string())).await.unwrap();
                        return;
                    }
                    let ok = json!({ "type": "auth_ok", "ha_version": "2025.1.0" });
                    ws.send(Message::Text(ok.to_string())).await.unwrap();

                    while let Some(Ok(Message::Text(text))) = ws.next().await {
                        let cmd: Value = serde_json::from_str(&text).unwrap();
                        let id = cmd["id"].clone();
                        let reply = match cmd["type"].as_str().unwrap() {
                            "ping" => json!({ "id": id, "type": "pong" }),
                            "fail" => json!({
                                "id": id, "type": "result", "success": false,
                                "error": { "code": "not_found", "message": "Entity not found" }
                            }),
                            "close" => {
                                let _ = ws.close(None).await;
                                return;
                            }
                            _ => json!({ "id": id, "type": "result", "success": true, "result": cmd }),
                        };
                        ws.send(Message::Text(reply.to_string())).await.unwrap();
                    }
                });
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn build_ws_url_maps_schemes() {
        assert_eq!(
            build_ws_url("http://localhost:8123").unwrap(),
            "ws://localhost:8123/api/websocket"
        );
        assert_eq!(
            build_ws_url("https://hass.example/").unwrap(),
            "wss://hass.example/api/websocket"
        );
        assert_eq!(
            build_ws_url("ws://localhost:8123").unwrap(),
            "ws://localhost:8123/api/websocket"
        );
        assert_eq!(
            build_ws_url("ws://localhost:8123/api/websocket").unwrap(),
            "ws://localhost:8123/api/websocket"
        );
        assert!(build_ws_url("ftp://nope").is_err());
    }

    #[tokio::test]
    async fn authenticates_and_correlates_concurrent_commands() {
        let url = fake_hub("good").await;
        let ws = HassWebSocket::connect(&url, "good").await.unwrap();
        assert!(ws.is_connected());

        let (a, b) = tokio::join!(
            ws.command("echo", json!({ "tag": "a" })),
            ws.command("echo", json!({ "tag": "b" })),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a["tag"], "a");
        assert_eq!(b["tag"], "b");
        assert_ne!(a["id"], b["id"]);

        assert_eq!(ws.command("ping", Value::Null).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn rejected_token_is_a_connection_error() {
        let url = fake_hub("good").await;
        let err = HassWebSocket::connect(&url, "bad").await.err().unwrap();
        assert!(matches!(err, HassError::Connection(_)));
        assert!(err.to_string().contains("Invalid access token"));
    }

    #[tokio::test]
    async fn failed_command_surfaces_code_and_message() {
        let url = fake_hub("good").await;
        let ws = HassWebSocket::connect(&url, "good").await.unwrap();
        let err = ws.command("fail", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "not_found : Entity not found");
    }

    #[tokio::test]
    async fn closed_socket_fails_pending_and_marks_disconnected() {
        let url = fake_hub("good").await;
        let ws = HassWebSocket::connect(&url, "good").await.unwrap();
        let err = ws.command("close", Value::Null).await.unwrap_err();
        assert!(matches!(err, HassError::Closed));
        assert!(!ws.is_connected());
    }
}
