//! In-process stand-in for a Home Assistant hub, shared by the test modules.
//!
//! Serves the websocket API (auth handshake, `get_states`, canned replies)
//! and the REST config endpoints for automations and scripts, keeping
//! entity states in sync the way the real hub does after a config write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::hass::script_object_id;

type Reply = Result<Value, (String, String)>;

pub struct FakeHass {
    pub url: String,
    hub: Arc<Hub>,
}

struct Hub {
    states: Mutex<Vec<Value>>,
    replies: Mutex<HashMap<String, Reply>>,
    commands: Mutex<Vec<Value>>,
    rest_calls: Mutex<Vec<(String, String, Value)>>,
    automations: Mutex<HashMap<String, Value>>,
    scripts: Mutex<HashMap<String, Value>>,
    connections: AtomicUsize,
    kick: watch::Sender<u64>,
}

impl FakeHass {
    pub const TOKEN: &'static str = "test-token";

    pub async fn start() -> Self {
        let (kick, _) = watch::channel(0);
        let hub = Arc::new(Hub {
            states: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            commands: Mutex::new(Vec::new()),
            rest_calls: Mutex::new(Vec::new()),
            automations: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            connections: AtomicUsize::new(0),
            kick,
        });

        let app = Router::new()
            .route("/api/websocket", get(ws_upgrade))
            .route(
                "/api/config/automation/config/{id}",
                get(get_automation).post(post_automation).delete(delete_automation),
            )
            .route(
                "/api/config/script/config/{id}",
                get(get_script).post(post_script).delete(delete_script),
            )
            .fallback(fallback)
            .with_state(Arc::clone(&hub));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}"),
            hub,
        }
    }

    pub fn set_states(&self, states: Vec<Value>) {
        *self.hub.states.lock().unwrap() = states;
    }

    /// Answer websocket command `kind` with `result`.
    pub fn reply(&self, kind: &str, result: Value) {
        self.hub
            .replies
            .lock()
            .unwrap()
            .insert(kind.to_string(), Ok(result));
    }

    /// Fail websocket command `kind` with `code : message`.
    pub fn reply_error(&self, kind: &str, code: &str, message: &str) {
        self.hub
            .replies
            .lock()
            .unwrap()
            .insert(kind.to_string(), Err((code.to_string(), message.to_string())));
    }

    /// Websocket commands received so far, in order.
    pub fn commands(&self) -> Vec<Value> {
        self.hub.commands.lock().unwrap().clone()
    }

    pub fn commands_of(&self, kind: &str) -> Vec<Value> {
        self.commands()
            .into_iter()
            .filter(|c| c["type"] == kind)
            .collect()
    }

    /// REST requests received so far as `(method, path, body)`.
    pub fn rest_calls(&self) -> Vec<(String, String, Value)> {
        self.hub.rest_calls.lock().unwrap().clone()
    }

    pub fn automation_config(&self, id: &str) -> Option<Value> {
        self.hub.automations.lock().unwrap().get(id).cloned()
    }

    /// Authenticated websocket connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.hub.connections.load(Ordering::SeqCst)
    }

    /// Close every open websocket from the hub side.
    pub fn kick(&self) {
        self.hub.kick.send_modify(|n| *n += 1);
    }
}

/// State object in the hub's wire shape.
pub fn raw_state(entity_id: &str, state: &str, attributes: Value) -> Value {
    json!({
        "entity_id": entity_id,
        "state": state,
        "attributes": attributes,
        "last_changed": "2025-01-01T00:00:00+00:00",
        "last_updated": "2025-01-01T00:00:00+00:00",
        "context": { "id": "01JTEST", "parent_id": null, "user_id": null }
    })
}

impl Hub {
    fn record(&self, method: &str, path: String, body: Value) {
        self.rest_calls
            .lock()
            .unwrap()
            .push((method.to_string(), path, body));
    }

    fn answer(&self, cmd: &Value) -> Value {
        let id = cmd["id"].clone();
        let kind = cmd["type"].as_str().unwrap_or("");
        let canned = self.replies.lock().unwrap().get(kind).cloned();
        let reply = match canned {
            Some(reply) => reply,
            None if kind == "get_states" => Ok(Value::Array(self.states.lock().unwrap().clone())),
            None => Ok(Value::Null),
        };
        match reply {
            Ok(result) => json!({ "id": id, "type": "result", "success": true, "result": result }),
            Err((code, message)) => json!({
                "id": id, "type": "result", "success": false,
                "error": { "code": code, "message": message }
            }),
        }
    }

    fn upsert_state(&self, entity_id: &str, attributes: Value, replaces: impl Fn(&Value) -> bool) {
        let mut states = self.states.lock().unwrap();
        states.retain(|s| s["entity_id"] != entity_id && !replaces(s));
        states.push(raw_state(entity_id, "on", attributes));
    }

    fn remove_states(&self, matches: impl Fn(&Value) -> bool) {
        self.states.lock().unwrap().retain(|s| !matches(s));
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<Hub>>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, hub))
}

async fn send(socket: &mut WebSocket, value: Value) -> bool {
    socket.send(Message::Text(value.to_string().into())).await.is_ok()
}

async fn serve_socket(mut socket: WebSocket, hub: Arc<Hub>) {
    if !send(&mut socket, json!({ "type": "auth_required", "ha_version": "2025.1.0" })).await {
        return;
    }
    let Some(Ok(Message::Text(auth))) = socket.recv().await else {
        return;
    };
    let auth: Value = serde_json::from_str(auth.as_str()).unwrap_or_default();
    if auth["access_token"] != FakeHass::TOKEN {
        let _ = send(
            &mut socket,
            json!({ "type": "auth_invalid", "message": "Invalid access token or password" }),
        )
        .await;
        return;
    }
    if !send(&mut socket, json!({ "type": "auth_ok", "ha_version": "2025.1.0" })).await {
        return;
    }
    hub.connections.fetch_add(1, Ordering::SeqCst);

    let mut kick = hub.kick.subscribe();
    loop {
        tokio::select! {
            _ = kick.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            msg = socket.recv() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                    _ => return,
                };
                let Ok(cmd) = serde_json::from_str::<Value>(text.as_str()) else {
                    continue;
                };
                hub.commands.lock().unwrap().push(cmd.clone());
                let reply = hub.answer(&cmd);
                if !send(&mut socket, reply).await {
                    return;
                }
            }
        }
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": "Resource not found" })),
    )
        .into_response()
}

fn ok() -> Response {
    Json(json!({ "result": "ok" })).into_response()
}

async fn get_automation(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Response {
    hub.record("GET", format!("/api/config/automation/config/{id}"), Value::Null);
    let config = hub.automations.lock().unwrap().get(&id).cloned();
    config.map_or_else(not_found, |c| Json(c).into_response())
}

async fn post_automation(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    Json(config): Json<Value>,
) -> Response {
    hub.record("POST", format!("/api/config/automation/config/{id}"), config.clone());
    let alias = config["alias"].as_str().unwrap_or(&id).to_string();
    let entity_id = format!("automation.{}", script_object_id(&alias));
    hub.automations.lock().unwrap().insert(id.clone(), config);
    hub.upsert_state(
        &entity_id,
        json!({ "id": id, "friendly_name": alias, "mode": "single" }),
        |s| s["entity_id"].as_str().is_some_and(|e| e.starts_with("automation.")) && s["attributes"]["id"] == id,
    );
    ok()
}

async fn delete_automation(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Response {
    hub.record("DELETE", format!("/api/config/automation/config/{id}"), Value::Null);
    if hub.automations.lock().unwrap().remove(&id).is_none() {
        return not_found();
    }
    hub.remove_states(|s| {
        s["entity_id"].as_str().is_some_and(|e| e.starts_with("automation.")) && s["attributes"]["id"] == id
    });
    ok()
}

async fn get_script(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Response {
    hub.record("GET", format!("/api/config/script/config/{id}"), Value::Null);
    let config = hub.scripts.lock().unwrap().get(&id).cloned();
    config.map_or_else(not_found, |c| Json(c).into_response())
}

async fn post_script(
    State(hub): State<Arc<Hub>>,
    Path(id): Path<String>,
    Json(config): Json<Value>,
) -> Response {
    hub.record("POST", format!("/api/config/script/config/{id}"), config.clone());
    let alias = config["alias"].clone();
    hub.scripts.lock().unwrap().insert(id.clone(), config);
    hub.upsert_state(
        &format!("script.{id}"),
        json!({ "friendly_name": alias }),
        |_| false,
    );
    ok()
}

async fn delete_script(State(hub): State<Arc<Hub>>, Path(id): Path<String>) -> Response {
    hub.record("DELETE", format!("/api/config/script/config/{id}"), Value::Null);
    if hub.scripts.lock().unwrap().remove(&id).is_none() {
        return not_found();
    }
    let entity_id = format!("script.{id}");
    hub.remove_states(|s| s["entity_id"] == entity_id.as_str());
    ok()
}

/// Everything else: record the call and echo it back.
async fn fallback(State(hub): State<Arc<Hub>>, method: Method, uri: Uri, body: Bytes) -> Response {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let path = uri.path().to_string();
    hub.record(method.as_str(), path.clone(), body.clone());

    if path == "/api/config/config_entries/flow_handlers" {
        return Json(json!(["template", "group", "utility_meter"])).into_response();
    }
    if let Some(entry) = path.strip_prefix("/api/config/config_entries/entry/") {
        if entry == "missing" {
            return (StatusCode::NOT_FOUND, "Config entry not found").into_response();
        }
        return Json(json!({ "require_restart": false })).into_response();
    }
    Json(json!({ "method": method.as_str(), "path": path, "body": body })).into_response()
}
