//! Entity and device registries, config entry flows, and scripts.
//!
//! Config entry flows are the hub's multi-step setup wizard (used to create
//! template helpers and the like). Each step's response is passed through
//! verbatim so the agent can read the next `step_id` and `data_schema`.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{json_content, object_arg, str_arg, GroupContext};
use crate::hass::{HassClient, HassError};
use crate::registry::{Capability, ResourceContent, ResourceRequest, ToolResult};

pub fn capabilities(ctx: &GroupContext) -> Vec<Capability> {
    vec![
        ctx.resource(
            "get-entity-registry-by-entity-id",
            "entity://registry/by-entity-id/{entityId}",
            get_registry_entry,
        )
        .title("Get entity registry by entity_id")
        .description("Get registry info for a specific entity_id")
        .input(entity_id_input("Entity ID, e.g. 'sensor.temperature'"))
        .output(json!({
            "type": "object",
            "properties": { "registry": { "type": ["object", "null"] } },
            "required": ["registry"]
        })),
        ctx.resource("get-device-id-by-entity-id", "device://by-entity-id/{entityId}", get_device_id)
            .title("Get device_id by entity_id")
            .description("Get the device_id for a given entity_id")
            .input(entity_id_input("Entity ID, e.g. 'sensor.temperature'"))
            .output(json!({
                "type": "object",
                "properties": { "deviceId": { "type": ["string", "null"] } },
                "required": ["deviceId"]
            })),
        ctx.resource(
            "get-config-entry-id-by-entity-id",
            "config_entry://by-entity-id/{entityId}",
            get_config_entry_id,
        )
        .title("Get config_entry_id by entity_id")
        .description(
            "Get the config_entry_id for a given entity_id, useful for templated sensors and other config entry flows alike",
        )
        .input(entity_id_input("Entity ID, e.g. 'sensor.temperature'"))
        .output(json!({
            "type": "object",
            "properties": {
                "configEntryId": {
                    "type": ["string", "null"],
                    "description": "Config entry ID for the entity"
                }
            },
            "required": ["configEntryId"]
        })),
        ctx.tool("update-device-registry", update_device_registry)
            .title("Update device registry")
            .description("Update the device registry for a specific device_id")
            .input(json!({
                "type": "object",
                "properties": {
                    "device_id": { "type": "string", "description": "Device ID, e.g. 'device_123'" },
                    "device_config": {
                        "type": "object",
                        "description": "Any field device configuration to update",
                        "properties": {
                            "area_id": { "type": "string", "description": "Area ID to assign the device to" }
                        },
                        "additionalProperties": true
                    }
                },
                "required": ["device_id", "device_config"]
            })),
        ctx.tool("create-config-entry-flow", create_flow)
            .title("Create config entry flow with a handler helpers")
            .description(
                "Create a new config entry in the Home Assistant entity registry for a new config entry (new templated helpers for ex)",
            )
            .input(json!({
                "type": "object",
                "properties": {
                    "handler": { "type": "string", "description": "The handler for the config entry flow" }
                },
                "required": ["handler"]
            })),
        ctx.tool("continue-config-entry-flow", continue_flow)
            .title("Continue config entry flow")
            .description("Continue an existing config entry flow with a next step Id")
            .input(json!({
                "type": "object",
                "properties": {
                    "flow_id": { "type": "string", "description": "The ID of the config entry flow to continue" },
                    "next_step_id": { "type": "string", "description": "The ID of the next step to execute" }
                },
                "required": ["flow_id", "next_step_id"]
            })),
        ctx.tool("finish-config-entry-flow", finish_flow)
            .title("Finish config entry flow")
            .description("Finish an existing config entry flow")
            .input(flow_options_input(
                "The ID of the config entry flow to finish",
                "Parameters to finish the flow",
            )),
        ctx.tool("create-config-entry-options-flow", create_options_flow)
            .title("Create config entry options flow for a config entry id")
            .description(
                "Create a new config entry options flow for a specific config entry (already existing config entry, templated helpers for ex)",
            )
            .input(json!({
                "type": "object",
                "properties": {
                    "config_entry_id": {
                        "type": "string",
                        "description": "The ID of the config entry to create options flow for"
                    }
                },
                "required": ["config_entry_id"]
            })),
        ctx.tool("update-config-entry-options-flow", update_options_flow)
            .title("Update config entry options flow")
            .description("Update an existing config entry options flow")
            .input(flow_options_input(
                "The ID of the config entry flow to update",
                "Parameters to update the flow",
            )),
        ctx.tool("delete-config-entry", delete_config_entry)
            .title("Delete config entry")
            .description("Delete a config entry (a helper or integration instance) by its config_entry_id")
            .input(json!({
                "type": "object",
                "properties": {
                    "config_entry_id": { "type": "string", "description": "The ID of the config entry to delete" }
                },
                "required": ["config_entry_id"]
            })),
        ctx.resource("list-config-entry-flows-helpers", "config_entry://flows_helpers", list_helper_flows)
            .title("List helpers types")
            .description("List available config entry flow handlers for helpers")
            .output(json!({
                "type": "object",
                "properties": { "flows": { "type": "array", "items": { "type": "string" } } },
                "required": ["flows"]
            })),
        ctx.resource("list-scripts", "script://all", list_scripts)
            .title("List all scripts")
            .description("List all scripts in Home Assistant, friendly_name = alias")
            .output(json!({
                "type": "object",
                "properties": { "scripts": { "type": "array", "items": { "type": "object" } } },
                "required": ["scripts"]
            })),
        ctx.resource("get-rest-script-by-entity-id", "script://by-entity-id/{entityId}", get_script_by_entity_id)
            .title("Get a script by entity_id")
            .description("Get the details of a specific script by its entity_id")
            .input(entity_id_input("Entity ID of the script, e.g. 'my_script'"))
            .output(script_output()),
        ctx.resource("get-rest-script-by-alias", "script://{alias}", get_script_by_alias)
            .title("Get a script by alias")
            .description("Get the details of a specific script by its alias, not script.entity_id")
            .input(json!({
                "type": "object",
                "properties": {
                    "alias": {
                        "type": "string",
                        "description": "Alias of the script, e.g. 'My Script' not 'script.script_entity_id'"
                    }
                },
                "required": ["alias"]
            }))
            .output(script_output()),
        ctx.tool("upsertScriptRest-rest-script-by-alias", upsert_script)
            .title("Create or Update a script by alias")
            .description("Create or Update the details of a specific script by its alias")
            .input(json!({
                "type": "object",
                "properties": {
                    "alias": { "type": "string", "description": "alias of the script, e.g. 'My Script'" },
                    "data": {
                        "type": "object",
                        "description": "The script configuration data to create/update",
                        "additionalProperties": true
                    }
                },
                "required": ["alias", "data"]
            })),
        ctx.tool("delete-rest-script-by-alias", delete_script)
            .title("Delete a script by alias")
            .description("Delete a specific script by its alias")
            .input(json!({
                "type": "object",
                "properties": {
                    "alias": { "type": "string", "description": "Alias of the script, e.g. 'My Script'" }
                },
                "required": ["alias"]
            })),
    ]
}

fn entity_id_input(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "entityId": { "type": "string", "description": description }
        },
        "required": ["entityId"]
    })
}

fn flow_options_input(flow_id: &str, options: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "flow_id": { "type": "string", "description": flow_id },
            "options": { "type": "object", "description": options, "additionalProperties": true }
        },
        "required": ["flow_id", "options"]
    })
}

fn script_output() -> Value {
    json!({
        "type": "object",
        "properties": { "script": { "type": ["object", "null"] } },
        "required": ["script"]
    })
}

async fn get_registry_entry(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let registry = client.get_entity_registry_entry(req.param("entityId")?).await?;
    json_content(&req, &json!({ "registry": registry }))
}

async fn get_device_id(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let device_id = client.get_device_id_by_entity_id(req.param("entityId")?).await?;
    json_content(&req, &json!({ "deviceId": device_id }))
}

async fn get_config_entry_id(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let config_entry_id = client
        .get_config_entry_id_by_entity_id(req.param("entityId")?)
        .await?;
    json_content(&req, &json!({ "configEntryId": config_entry_id }))
}

async fn list_helper_flows(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let flows = client.get_helper_flow_handlers().await?;
    json_content(&req, &json!({ "flows": flows }))
}

async fn list_scripts(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let scripts = client.list_scripts().await?;
    json_content(&req, &json!({ "scripts": scripts }))
}

async fn get_script_by_entity_id(
    client: Arc<HassClient>,
    req: ResourceRequest,
) -> Result<Vec<ResourceContent>, HassError> {
    let script = client
        .get_script_config_by_entity_id(req.param("entityId")?)
        .await?;
    json_content(&req, &json!({ "script": script }))
}

async fn get_script_by_alias(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let script = client.get_script_config_by_alias(req.param("alias")?).await?;
    json_content(&req, &json!({ "script": script }))
}

async fn update_device_registry(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let device_id = str_arg(&args, "device_id");
    match client
        .update_device_registry(device_id, object_arg(&args, "device_config"))
        .await
    {
        Ok(_) => ToolResult::text(format!("Device registry updated for device_id: {device_id}")),
        Err(e) => ToolResult::failure(&format!("update device registry for {device_id}"), &e),
    }
}

/// Pass a flow step's response through, or report `action` as failed.
fn flow_result(action: &str, result: Result<Value, HassError>) -> ToolResult {
    match result {
        Ok(flow) => ToolResult::json(&flow),
        Err(e) => ToolResult::failure(action, &e),
    }
}

async fn create_flow(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let result = client.create_config_entry_flow(str_arg(&args, "handler")).await;
    flow_result("create entity flow", result)
}

async fn continue_flow(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let result = client
        .continue_config_entry_flow(str_arg(&args, "flow_id"), str_arg(&args, "next_step_id"))
        .await;
    flow_result("continue config entry flow", result)
}

async fn finish_flow(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let result = client
        .update_config_entry_flow(str_arg(&args, "flow_id"), &object_arg(&args, "options"))
        .await;
    flow_result("finish config entry flow", result)
}

async fn create_options_flow(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let result = client
        .create_config_entry_options_flow(str_arg(&args, "config_entry_id"))
        .await;
    flow_result("create config entry options flow", result)
}

async fn update_options_flow(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let result = client
        .update_config_entry_options_flow(str_arg(&args, "flow_id"), &object_arg(&args, "options"))
        .await;
    flow_result("update config entry options flow", result)
}

async fn delete_config_entry(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let id = str_arg(&args, "config_entry_id");
    match client.delete_config_entry(id).await {
        Ok(_) => ToolResult::text(format!("Config entry deleted: {id}")),
        Err(e) => ToolResult::failure(&format!("delete config entry {id}"), &e),
    }
}

async fn upsert_script(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let alias = str_arg(&args, "alias");
    match client.upsert_script_config(alias, object_arg(&args, "data")).await {
        Ok(()) => ToolResult::text(format!("Script updated: {alias}")),
        Err(e) => ToolResult::failure(&format!("update script {alias}"), &e),
    }
}

async fn delete_script(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let alias = str_arg(&args, "alias");
    match client.delete_script_config(alias).await {
        Ok(()) => ToolResult::text(format!("Script deleted: {alias}")),
        Err(e) => ToolResult::failure(&format!("delete script {alias}"), &e),
    }
}
