//! Bearer-authenticated REST calls against `{url}/api/{api}`.
//!
//! The hub's REST namespace carries the config CRUD endpoints that have no
//! websocket equivalent: automation and script configs, config entry flows,
//! and config entry deletion.
//!
//! Non-2xx responses become [`HassError::Api`] with the status text and the
//! raw response body, so the agent sees exactly what the hub complained about.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;

use super::error::HassError;

/// REST endpoint paths, relative to `/api/`.
pub mod api {
    pub const AUTOMATION_CONFIG: &str = "config/automation/config";
    pub const SCRIPT_CONFIG: &str = "config/script/config";
    pub const CONFIG_ENTRIES_FLOW: &str = "config/config_entries/flow";
    pub const CONFIG_ENTRIES_OPTIONS_FLOW: &str = "config/config_entries/options/flow";
    pub const CONFIG_ENTRIES_FLOW_HELPERS: &str = "config/config_entries/flow_handlers?type=helper";
    pub const CONFIG_ENTRY: &str = "config/config_entries/entry";
}

/// HTTP client for one Home Assistant instance.
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl RestClient {
    /// Create a client for the hub at `url` (any of http/https/ws/wss).
    pub fn new(url: &str, token: &str) -> Result<Self, HassError> {
        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(default_headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| HassError::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: rest_base_url(url),
            token: token.to_string(),
        })
    }

    pub async fn get(&self, api: &str) -> Result<Value, HassError> {
        self.call(Method::GET, api, None).await
    }

    pub async fn post(&self, api: &str, body: &Value) -> Result<Value, HassError> {
        self.call(Method::POST, api, Some(body)).await
    }

    pub async fn delete(&self, api: &str, body: Option<&Value>) -> Result<Value, HassError> {
        self.call(Method::DELETE, api, body).await
    }

    /// Issue one request against `/api/{api}` and decode the JSON reply.
    pub async fn call(
        &self,
        method: Method,
        api: &str,
        body: Option<&Value>,
    ) -> Result<Value, HassError> {
        let url = format!("{}/api/{}", self.base_url, api.trim_start_matches('/'));
        tracing::debug!(%method, %url, "REST call");

        let mut request = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.json(body);
        }
        let resp = request.send().await?;
        Self::handle_response(resp).await
    }

    async fn handle_response(resp: reqwest::Response) -> Result<Value, HassError> {
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(HassError::Api {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        // A few endpoints answer with plain text; keep it rather than fail.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }
}

/// Map a configured hub URL to its REST base (`ws` → `http`, `wss` → `https`).
pub fn rest_base_url(url: &str) -> String {
    let base = url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = base.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        base.to_string()
    };
    base.trim_end_matches("/api/websocket").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn rest_base_url_maps_websocket_schemes() {
        assert_eq!(rest_base_url("ws://localhost:8123"), "http://localhost:8123");
        assert_eq!(rest_base_url("wss://hass.example/"), "https://hass.example");
        assert_eq!(rest_base_url("http://10.0.0.2:8123"), "http://10.0.0.2:8123");
        assert_eq!(
            rest_base_url("ws://localhost:8123/api/websocket"),
            "http://localhost:8123"
        );
    }

    #[tokio::test]
    async fn sends_bearer_token_and_decodes_json() {
        let app = Router::new().route(
            "/api/config/automation/config/{id}",
            get(|headers: HeaderMap| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                Json(json!({ "auth": auth }))
            }),
        );
        let base = spawn(app).await;
        let client = RestClient::new(&base, "secret").unwrap();

        let value = client.get("config/automation/config/1").await.unwrap();
        assert_eq!(value["auth"], "Bearer secret");
    }

    #[tokio::test]
    async fn non_success_status_carries_reason_and_body() {
        let app = Router::new().route(
            "/api/config/config_entries/flow",
            post(|| async { (StatusCode::BAD_REQUEST, "Invalid handler specified") }),
        );
        let base = spawn(app).await;
        let client = RestClient::new(&base, "secret").unwrap();

        let err = client
            .post("config/config_entries/flow", &json!({ "handler": "nope" }))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "API call failed: Bad Request - Invalid handler specified"
        );
    }
}
