//! Connection status, config validation, service calls and integration manifests.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{json_content, object_arg, str_arg, success, GroupContext};
use crate::hass::types::{HassStatus, ValidateConfig};
use crate::hass::{HassClient, HassError};
use crate::registry::{Capability, ResourceContent, ResourceRequest, ToolResult};

pub fn capabilities(ctx: &GroupContext) -> Vec<Capability> {
    vec![
        ctx.resource("get-status", "config://status", get_status)
            .title("Get Home Assistant connection status")
            .description("Get Home Assistant connection status")
            .output(json!({
                "type": "object",
                "properties": {
                    "connected": { "type": "boolean" },
                    "entityCount": { "type": "number" }
                },
                "required": ["connected", "entityCount"]
            })),
        ctx.tool("validate-config", validate_config)
            .title("Validate triggers, conditions and actions for any automation change")
            .description(
                "Validate triggers, conditions and actions configurations as if part of an automation. \
                 Any changes to automation should be checked with this tool",
            )
            .input(json!({
                "type": "object",
                "properties": {
                    "config": {
                        "type": "object",
                        "properties": {
                            "triggers": { "type": "array", "items": {} },
                            "conditions": { "type": "array", "items": {} },
                            "actions": { "type": "array", "items": {} }
                        },
                        "additionalProperties": true
                    }
                },
                "required": ["config"]
            })),
        ctx.tool("call-service", call_service)
            .title("Call a Home Assistant service")
            .description("Call a Home Assistant service")
            .input(json!({
                "type": "object",
                "properties": {
                    "domain": { "type": "string", "description": "Service domain (e.g., light, switch)" },
                    "service": { "type": "string", "description": "Service name" },
                    "data": { "type": "object", "additionalProperties": true }
                },
                "required": ["domain", "service"]
            })),
        ctx.resource("get-manifest", "config://manifest/{integration}", get_manifest)
            .title("Get Home Assistant integration manifest")
            .description("Get the manifest of a Home Assistant integration")
            .input(json!({
                "type": "object",
                "properties": {
                    "integration": { "type": "string", "description": "Integration name, e.g. 'light'" }
                },
                "required": ["integration"]
            })),
    ]
}

async fn get_status(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let states = client.get_states().await?;
    let status = HassStatus {
        connected: client.is_connected(),
        entity_count: states.len(),
    };
    json_content(&req, &status)
}

async fn get_manifest(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let manifest = client.get_manifest(req.param("integration")?).await?;
    json_content(&req, &manifest)
}

async fn validate_config(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let config: ValidateConfig = match serde_json::from_value(Value::Object(object_arg(&args, "config"))) {
        Ok(config) => config,
        Err(e) => return ToolResult::error(format!("Invalid config: {e}")),
    };
    match client.validate_config(&config).await {
        Ok(response) => ToolResult::json(&response),
        Err(e) => {
            tracing::debug!("config validation error: {e}");
            ToolResult::error(format!("Config validation failed: {e}"))
        }
    }
}

async fn call_service(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let domain = str_arg(&args, "domain");
    let service = str_arg(&args, "service");
    let data = match args.get("data") {
        Some(Value::Object(data)) => Some(data.clone()),
        _ => None,
    };
    match client.call_service(domain, service, data).await {
        Ok(_) => success(),
        Err(e) => ToolResult::failure(&format!("call service {domain}.{service}"), &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::tests::{call, read_json, registry_for};
    use crate::registry::Presentation;
    use crate::testing::{raw_state, FakeHass};

    #[tokio::test]
    async fn status_counts_live_states() {
        let hub = FakeHass::start().await;
        hub.set_states(vec![
            raw_state("light.a", "on", json!({})),
            raw_state("light.b", "off", json!({})),
        ]);
        let resources = registry_for(&hub, Presentation::Resources);
        let status = read_json(&resources, "config://status").await;
        assert_eq!(status, json!({ "connected": true, "entityCount": 2 }));

        let tools = registry_for(&hub, Presentation::Tools);
        let result = call(&tools, "get-status", json!({})).await;
        assert_eq!(result.structured, Some(json!({ "connected": true, "entityCount": 2 })));
    }

    #[tokio::test]
    async fn validate_config_sends_only_present_sections() {
        let hub = FakeHass::start().await;
        hub.reply("validate_config", json!({ "triggers": { "valid": true, "error": null } }));
        let tools = registry_for(&hub, Presentation::Tools);

        let result = call(
            &tools,
            "validate-config",
            json!({ "config": { "triggers": [{ "trigger": "state", "entity_id": "sun.sun" }] } }),
        )
        .await;
        assert!(!result.is_error);
        let response: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
        assert_eq!(response, json!({ "triggers": { "valid": true, "error": null } }));

        let sent = hub.commands_of("validate_config").pop().unwrap();
        assert!(sent.get("triggers").is_some());
        assert!(sent.get("conditions").is_none());
        assert!(sent.get("actions").is_none());
    }

    #[tokio::test]
    async fn validate_config_rejection_is_flagged() {
        let hub = FakeHass::start().await;
        hub.reply_error("validate_config", "invalid_format", "expected a dictionary");
        let tools = registry_for(&hub, Presentation::Tools);

        let result = call(&tools, "validate-config", json!({ "config": { "actions": ["nope"] } })).await;
        assert!(result.is_error);
        assert_eq!(
            result.first_text(),
            Some("Config validation failed: invalid_format : expected a dictionary")
        );
    }

    #[tokio::test]
    async fn call_service_wraps_payload_as_service_data() {
        let hub = FakeHass::start().await;
        let tools = registry_for(&hub, Presentation::Tools);

        let result = call(
            &tools,
            "call-service",
            json!({ "domain": "light", "service": "turn_on", "data": { "entity_id": "light.kitchen" } }),
        )
        .await;
        assert_eq!(result.first_text(), Some(r#"{"success":true}"#));
        let sent = hub.commands_of("call_service").pop().unwrap();
        assert_eq!(sent["domain"], "light");
        assert_eq!(sent["service"], "turn_on");
        assert_eq!(sent["service_data"]["entity_id"], "light.kitchen");

        hub.reply_error("call_service", "service_not_found", "Service light.nope not found.");
        let result = call(&tools, "call-service", json!({ "domain": "light", "service": "nope" })).await;
        assert!(result.is_error);
        assert_eq!(
            result.first_text(),
            Some("Failed to call service light.nope: service_not_found : Service light.nope not found.")
        );
    }

    #[tokio::test]
    async fn manifest_lookup_by_integration() {
        let hub = FakeHass::start().await;
        hub.reply("manifest/get", json!({ "domain": "hue", "name": "Philips Hue" }));
        let resources = registry_for(&hub, Presentation::Resources);
        let manifest = read_json(&resources, "config://manifest/hue").await;
        assert_eq!(manifest["name"], "Philips Hue");
        assert_eq!(hub.commands_of("manifest/get")[0]["integration"], "hue");
    }
}
