//! Error taxonomy for calls against the Home Assistant hub.
//!
//! Every [`HassClient`](super::HassClient) operation returns
//! `Result<_, HassError>`. The `Display` strings are what ends up in the text
//! of error-flagged tool results, so they are written for a human (or an
//! agent) to read.

/// Errors returned by the hub client layers.
#[derive(Debug)]
pub enum HassError {
    /// Hub unreachable, websocket handshake failed, or auth rejected.
    Connection(String),
    /// HTTP transport error (DNS, TLS, connection reset, body decode).
    Request(reqwest::Error),
    /// Non-2xx REST response.
    Api {
        status: u16,
        status_text: String,
        body: String,
    },
    /// Websocket command answered with `success: false`.
    Command { code: String, message: String },
    /// A targeted lookup found nothing.
    NotFound(String),
    /// Caller-supplied input rejected before any remote call.
    InvalidInput(String),
    /// The hub sent something we could not interpret.
    Protocol(String),
    /// The websocket closed while a command was in flight.
    Closed,
}

impl HassError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HassError::NotFound(_) | HassError::Api { status: 404, .. })
    }
}

impl std::fmt::Display for HassError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HassError::Connection(msg) => write!(f, "Connection failed: {msg}"),
            HassError::Request(e) => write!(f, "HTTP request failed: {e}"),
            HassError::Api {
                status_text, body, ..
            } => write!(f, "API call failed: {status_text} - {body}"),
            HassError::Command { code, message } => write!(f, "{code} : {message}"),
            HassError::NotFound(msg) | HassError::InvalidInput(msg) => f.write_str(msg),
            HassError::Protocol(msg) => write!(f, "Unexpected response from Home Assistant: {msg}"),
            HassError::Closed => f.write_str("Connection to Home Assistant closed"),
        }
    }
}

impl std::error::Error for HassError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HassError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for HassError {
    fn from(e: reqwest::Error) -> Self {
        HassError::Request(e)
    }
}

impl From<serde_json::Error> for HassError {
    fn from(e: serde_json::Error) -> Self {
        HassError::Protocol(e.to_string())
    }
}
