//! Lazily connected, shared hub client.
//!
//! No connection is made at startup. The first capability that needs the hub
//! opens it; concurrent first callers wait on the same attempt instead of
//! racing to open several. A client whose socket has dropped is replaced on
//! the next call.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::{HassClient, HassError};

pub struct ConnectionProvider {
    url: String,
    token: String,
    slot: Mutex<Option<Arc<HassClient>>>,
}

impl ConnectionProvider {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            slot: Mutex::new(None),
        }
    }

    /// Connected client, opening (or reopening) the connection if needed.
    ///
    /// A failed attempt leaves the slot empty so the next call retries.
    pub async fn client(&self) -> Result<Arc<HassClient>, HassError> {
        let mut slot = self.slot.lock().await;
        if let Some(client) = slot.as_ref() {
            if client.is_connected() {
                return Ok(Arc::clone(client));
            }
            tracing::info!("Home Assistant connection lost, reconnecting");
        }
        let client = Arc::new(HassClient::connect(&self.url, &self.token).await?);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }
}
