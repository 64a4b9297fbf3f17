//! The five capability groups and the registry they populate.
//!
//! Each group module exposes `capabilities(&GroupContext) -> Vec<Capability>`.
//! Handlers are plain async functions taking a connected [`HassClient`] plus
//! either a [`ResourceRequest`] or the tool's argument map; [`GroupContext`]
//! wires them to the shared [`ConnectionProvider`].

pub mod automation;
pub mod config;
pub mod entities;
pub mod entity_registry;
pub mod lovelace;

use std::future::Future;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::hass::provider::ConnectionProvider;
use crate::hass::{HassClient, HassError};
use crate::registry::{
    Capability, CapabilityRegistry, Presentation, ResourceContent, ResourceRequest, ToolResult,
};

/// Knobs that shape registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityOptions {
    pub presentation: Presentation,
    pub debug: bool,
    /// Registration ceiling; negative is unlimited.
    pub limit: i64,
    /// Leave entity-state output schemas out of tool definitions.
    pub no_long_output_types: bool,
}

impl Default for CapabilityOptions {
    fn default() -> Self {
        Self {
            presentation: Presentation::Resources,
            debug: false,
            limit: -1,
            no_long_output_types: false,
        }
    }
}

/// Shared by every group while it builds its capabilities.
#[derive(Clone)]
pub struct GroupContext {
    provider: Arc<ConnectionProvider>,
    pub options: CapabilityOptions,
}

impl GroupContext {
    pub fn new(provider: Arc<ConnectionProvider>, options: CapabilityOptions) -> Self {
        Self { provider, options }
    }

    /// Resource whose handler runs against a connected client.
    pub fn resource<F, Fut>(&self, name: &str, uri: &str, handler: F) -> Capability
    where
        F: Fn(Arc<HassClient>, ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResourceContent>, HassError>> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let handler = Arc::new(handler);
        Capability::resource(name, uri, move |req| {
            let provider = Arc::clone(&provider);
            let handler = Arc::clone(&handler);
            async move {
                let client = provider.client().await?;
                (*handler)(client, req).await
            }
        })
    }

    /// Resource whose request is checked by `prepare` before the hub is
    /// contacted; the handler receives what `prepare` produced.
    pub fn prepared_resource<P, T, F, Fut>(&self, name: &str, uri: &str, prepare: P, handler: F) -> Capability
    where
        P: Fn(&ResourceRequest) -> Result<T, HassError> + Send + Sync + 'static,
        T: Send + 'static,
        F: Fn(Arc<HassClient>, ResourceRequest, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResourceContent>, HassError>> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let prepare = Arc::new(prepare);
        let handler = Arc::new(handler);
        Capability::resource(name, uri, move |req| {
            let provider = Arc::clone(&provider);
            let prepare = Arc::clone(&prepare);
            let handler = Arc::clone(&handler);
            async move {
                let prepared = (*prepare)(&req)?;
                let client = provider.client().await?;
                (*handler)(client, req, prepared).await
            }
        })
    }

    /// Tool whose handler runs against a connected client. A failed
    /// connection is reported as a flagged result.
    pub fn tool<F, Fut>(&self, name: &str, handler: F) -> Capability
    where
        F: Fn(Arc<HassClient>, Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let handler = Arc::new(handler);
        Capability::tool(name, move |args| {
            let provider = Arc::clone(&provider);
            let handler = Arc::clone(&handler);
            async move {
                match provider.client().await {
                    Ok(client) => (*handler)(client, args).await,
                    Err(e) => ToolResult::failure("connect to Home Assistant", &e),
                }
            }
        })
    }
}

/// Build the registry, registering groups in a fixed order so a ceiling
/// always cuts the same capabilities.
pub fn build_registry(options: CapabilityOptions, provider: Arc<ConnectionProvider>) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new(options.presentation, options.debug, options.limit);
    let ctx = GroupContext::new(provider, options);

    let groups = [
        automation::capabilities(&ctx),
        config::capabilities(&ctx),
        entity_registry::capabilities(&ctx),
        entities::capabilities(&ctx),
        lovelace::capabilities(&ctx),
    ];
    for cap in groups.into_iter().flatten() {
        registry.register(cap);
    }

    tracing::info!(
        count = registry.len(),
        presentation = ?registry.presentation(),
        "capabilities registered"
    );
    if registry.is_empty() {
        tracing::warn!("No capabilities registered; LIMIT_RESOURCES leaves nothing to expose");
    }
    registry
}

/// Single JSON content at the request URI.
pub(crate) fn json_content<T: serde::Serialize + ?Sized>(
    req: &ResourceRequest,
    value: &T,
) -> Result<Vec<ResourceContent>, HassError> {
    Ok(vec![ResourceContent::json(req.uri.as_str(), value)?])
}

/// String argument; required ones are checked before the handler runs.
pub(crate) fn str_arg<'a>(args: &'a Map<String, Value>, name: &str) -> &'a str {
    args.get(name).and_then(Value::as_str).unwrap_or_default()
}

pub(crate) fn object_arg(args: &Map<String, Value>, name: &str) -> Map<String, Value> {
    match args.get(name) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

pub(crate) fn success() -> ToolResult {
    ToolResult::json(&json!({ "success": true }))
}

/// JSON schema of a single entity state as returned to the agent.
pub(crate) fn entity_state_schema() -> Value {
    json!({
        "type": "object",
        "description": "Home Assistant entity state object with entity ID, state value, attributes, and context information",
        "properties": {
            "entityId": { "type": "string" },
            "state": { "type": "string" },
            "attributes": { "type": "object" },
            "lastChanged": { "type": "string" },
            "lastUpdated": { "type": "string" },
            "context": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "parent_id": { "type": ["string", "null"] },
                    "user_id": { "type": ["string", "null"] }
                },
                "required": ["id"]
            }
        },
        "required": ["entityId", "state", "attributes", "lastChanged", "lastUpdated", "context"]
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::FakeHass;

    pub(crate) fn registry_for(hub: &FakeHass, presentation: Presentation) -> CapabilityRegistry {
        let provider = Arc::new(ConnectionProvider::new(hub.url.clone(), FakeHass::TOKEN));
        build_registry(
            CapabilityOptions {
                presentation,
                ..CapabilityOptions::default()
            },
            provider,
        )
    }

    /// Read `uri` and parse the single content's text as JSON.
    pub(crate) async fn read_json(registry: &CapabilityRegistry, uri: &str) -> Value {
        let contents = registry
            .read_resource(uri)
            .await
            .unwrap_or_else(|| panic!("no resource at {uri}"))
            .unwrap();
        assert_eq!(contents.len(), 1, "expected one content for {uri}");
        assert_eq!(contents[0].uri, uri);
        serde_json::from_str(contents[0].text.as_deref().unwrap()).unwrap()
    }

    pub(crate) async fn call(registry: &CapabilityRegistry, name: &str, args: Value) -> ToolResult {
        registry
            .call_tool(name, args)
            .await
            .unwrap_or_else(|| panic!("no tool named {name}"))
    }

    #[tokio::test]
    async fn registers_every_capability_without_connecting() {
        let hub = FakeHass::start().await;

        let resources = registry_for(&hub, Presentation::Resources);
        let tools = registry_for(&hub, Presentation::Tools);
        assert_eq!(resources.len(), tools.len());
        assert_eq!(tools.tool_definitions().len(), tools.len());
        assert!(tools.resource_definitions().is_empty());
        assert!(!resources.resource_definitions().is_empty());
        assert!(!resources.resource_template_definitions().is_empty());
        assert_eq!(hub.connection_count(), 0);

        let names: Vec<String> = tools
            .tool_definitions()
            .iter()
            .map(|d| d["name"].as_str().unwrap().to_string())
            .collect();
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert_eq!(names[0], "get-rest-automation-trace");
        assert_eq!(names.last().map(String::as_str), Some("update-lovelace-resource"));
    }

    #[tokio::test]
    async fn ceiling_cuts_registrations_in_group_order() {
        let hub = FakeHass::start().await;
        let provider = Arc::new(ConnectionProvider::new(hub.url.clone(), FakeHass::TOKEN));
        let registry = build_registry(
            CapabilityOptions {
                presentation: Presentation::Tools,
                limit: 4,
                ..CapabilityOptions::default()
            },
            provider,
        );
        let names: Vec<Value> = registry
            .tool_definitions()
            .iter()
            .map(|d| d["name"].clone())
            .collect();
        assert_eq!(
            names,
            vec![
                json!("get-rest-automation-trace"),
                json!("list-rest-automation-traces"),
                json!("list-automations"),
                json!("delete-automation"),
            ]
        );
    }

    #[tokio::test]
    async fn zero_ceiling_registers_nothing() {
        let hub = FakeHass::start().await;
        let provider = Arc::new(ConnectionProvider::new(hub.url.clone(), FakeHass::TOKEN));
        let registry = build_registry(
            CapabilityOptions {
                limit: 0,
                ..CapabilityOptions::default()
            },
            provider,
        );
        assert!(registry.is_empty());
        assert!(registry.resource_template_definitions().is_empty());
    }

    #[tokio::test]
    async fn unreachable_hub_is_a_flagged_tool_result() {
        let provider = Arc::new(ConnectionProvider::new("http://127.0.0.1:1", "t"));
        let registry = build_registry(
            CapabilityOptions {
                presentation: Presentation::Tools,
                ..CapabilityOptions::default()
            },
            provider,
        );

        let result = call(&registry, "call-service", json!({ "domain": "light", "service": "toggle" })).await;
        assert!(result.is_error);
        assert!(result
            .first_text()
            .unwrap()
            .starts_with("Failed to connect to Home Assistant: Connection failed"));

        let result = call(&registry, "list-automations", json!({})).await;
        assert!(result.is_error);
        assert!(result.first_text().unwrap().starts_with("Failed to list all automations: "));
    }
}
