//! Automations: listing and lookup in both id spaces, REST CRUD, traces and
//! device triggers.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{json_content, str_arg, success, GroupContext};
use crate::hass::types::AutomationConfig;
use crate::hass::{HassClient, HassError};
use crate::registry::{Capability, ResourceContent, ResourceRequest, ToolResult};

pub fn capabilities(ctx: &GroupContext) -> Vec<Capability> {
    vec![
        ctx.resource("get-rest-automation-trace", "automation://rest/trace/{rest_id}/{run_id}", get_trace)
            .title("Get automation trace by rest_id and run_id")
            .description("Fetches the trace for a specific automation run using its REST id and run id.")
            .input(json!({
                "type": "object",
                "properties": {
                    "rest_id": { "type": "string", "description": "Automation REST API id" },
                    "run_id": { "type": "string", "description": "Automation run id" }
                },
                "required": ["rest_id", "run_id"]
            }))
            .output(trace_schema()),
        ctx.resource("list-rest-automation-traces", "automation://rest/traces/{rest_id}", list_traces)
            .title("List automation traces by rest_id")
            .description("List all traces for a specific automation using its REST id.")
            .input(rest_id_input()),
        ctx.resource("list-automations", "automation://list", list_automations)
            .title("List all automations")
            .description("List all automations"),
        ctx.tool("delete-automation", delete_automation)
            .title("Delete an automation")
            .description("Delete an automation by id")
            .input(json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "Automation unique ID" }
                },
                "required": ["id"]
            })),
        ctx.resource("get-automation-by-entity-id", "automation://by-entity-id/{entity_id}", get_by_entity_id)
            .title("Get automation by entity_id")
            .description("Find an automation entity using its entity_id (e.g. automation.my_automation).")
            .input(entity_id_input())
            .output(automation_schema()),
        ctx.resource(
            "get-rest-automation-by-entity-id",
            "automation://rest/by-entity-id/{entity_id}",
            get_rest_by_entity_id,
        )
        .title("Get REST automation by entity_id")
        .description("Get an automation's REST definition using its entity_id (e.g. automation.my_automation).")
        .input(entity_id_input())
        .output(automation_config_schema(true)),
        ctx.tool("update-automation-by-entity-id", update_by_entity_id)
            .title("Update automation by entity_id")
            .description("Update an automation using its entity_id (e.g. automation.my_automation).")
            .input(json!({
                "type": "object",
                "properties": {
                    "entity_id": {
                        "type": "string",
                        "description": "Automation entity_id, e.g. 'automation.my_automation'"
                    },
                    "automation": automation_config_schema(true)
                },
                "required": ["entity_id", "automation"]
            })),
        ctx.resource("get-automation-by-rest-id", "automation://by-rest-id/{rest_id}", get_by_rest_id)
            .title("Get automation by rest_id")
            .description("Find an automation entity using its REST API id (rest_id, not entity_id).")
            .input(rest_id_input())
            .output(automation_schema()),
        ctx.resource("get-rest-automation-by-rest-id", "automation://rest/by-rest-id/{rest_id}", get_rest_by_rest_id)
            .title("Get REST automation by rest_id")
            .description("Get an automation's REST definition using its rest_id (REST API id, not entity_id).")
            .input(rest_id_input())
            .output(automation_config_schema(true)),
        ctx.tool("update-rest-automation-by-rest-id", update_by_rest_id)
            .title("Update REST automation by rest_id")
            .description("Update an automation using its rest_id (REST API id, not entity_id).")
            .input(json!({
                "type": "object",
                "properties": { "automation": automation_config_schema(true) },
                "required": ["automation"]
            })),
        ctx.tool("delete-rest-automation-by-rest-id", delete_by_rest_id)
            .title("Delete REST automation by rest_id")
            .description("Delete an automation using its rest_id (REST API id, not entity_id).")
            .input(rest_id_input()),
        ctx.tool("create-rest-automation", create_automation)
            .title("Create REST automation")
            .description("Create a new automation via the Home Assistant REST API. Returns the new rest_id.")
            .input(json!({
                "type": "object",
                "properties": { "automation": automation_config_schema(false) },
                "required": ["automation"]
            })),
        ctx.resource("list-device-automation-triggers", "automation://device/{device_id}/triggers", device_triggers)
            .title("List device automation triggers")
            .description("List all triggers for a specific device's automations.")
            .input(json!({
                "type": "object",
                "properties": {
                    "device_id": { "type": "string", "description": "Device ID" }
                },
                "required": ["device_id"]
            })),
    ]
}

async fn get_trace(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let trace = client
        .get_automation_trace(req.param("rest_id")?, req.param("run_id")?)
        .await?;
    json_content(&req, &trace)
}

async fn list_traces(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let traces = client.list_automation_traces(req.param("rest_id")?).await?;
    json_content(&req, &traces)
}

async fn list_automations(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    json_content(&req, &client.get_automations().await?)
}

async fn get_by_entity_id(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let automation = client.get_automation_by_entity_id(req.param("entity_id")?).await?;
    json_content(&req, &automation)
}

async fn get_rest_by_entity_id(
    client: Arc<HassClient>,
    req: ResourceRequest,
) -> Result<Vec<ResourceContent>, HassError> {
    let config = client
        .get_automation_config_by_entity_id(req.param("entity_id")?)
        .await?;
    json_content(&req, &config)
}

async fn get_by_rest_id(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let automation = client.get_automation_by_rest_id(req.param("rest_id")?).await?;
    json_content(&req, &automation)
}

async fn get_rest_by_rest_id(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let config = client.get_automation_config(req.param("rest_id")?).await?;
    json_content(&req, &config)
}

async fn device_triggers(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let triggers = client
        .list_device_automation_triggers(req.param("device_id")?)
        .await?;
    json_content(&req, &triggers)
}

fn automation_arg(args: &Map<String, Value>) -> Result<AutomationConfig, ToolResult> {
    let raw = args.get("automation").cloned().unwrap_or(Value::Null);
    serde_json::from_value(raw).map_err(|e| ToolResult::error(format!("Invalid automation: {e}")))
}

async fn delete_automation(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let id = str_arg(&args, "id");
    match client.delete_automation(id).await {
        Ok(()) => success(),
        Err(e) => ToolResult::failure(&format!("delete automation {id}"), &e),
    }
}

async fn update_by_entity_id(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let entity_id = str_arg(&args, "entity_id");
    let config = match automation_arg(&args) {
        Ok(config) => config,
        Err(invalid) => return invalid,
    };
    match client.update_automation_by_entity_id(entity_id, config).await {
        Ok(()) => success(),
        Err(e) => ToolResult::failure(&format!("update automation {entity_id}"), &e),
    }
}

async fn update_by_rest_id(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let config = match automation_arg(&args) {
        Ok(config) => config,
        Err(invalid) => return invalid,
    };
    match client.update_automation_config(&config).await {
        Ok(()) => success(),
        Err(e) => ToolResult::failure("update automation", &e),
    }
}

async fn delete_by_rest_id(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let rest_id = str_arg(&args, "rest_id");
    match client.delete_automation_config(rest_id).await {
        Ok(()) => success(),
        Err(e) => ToolResult::failure(&format!("delete automation {rest_id}"), &e),
    }
}

async fn create_automation(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let mut config = match automation_arg(&args) {
        Ok(config) => config,
        Err(invalid) => return invalid,
    };
    // The id is always assigned here.
    config.id = None;
    match client.create_automation(config).await {
        Ok(rest_id) => ToolResult::json(&json!({ "rest_id": rest_id })),
        Err(e) => ToolResult::failure("create automation", &e),
    }
}

fn rest_id_input() -> Value {
    json!({
        "type": "object",
        "properties": {
            "rest_id": { "type": "string", "description": "Automation REST API id" }
        },
        "required": ["rest_id"]
    })
}

fn entity_id_input() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entity_id": {
                "type": "string",
                "description": "Automation entity_id, e.g. 'automation.my_automation'"
            }
        },
        "required": ["entity_id"]
    })
}

/// REST automation definition; `with_id` is false for creation.
fn automation_config_schema(with_id: bool) -> Value {
    let mut schema = json!({
        "type": "object",
        "description": "Home Assistant automation configuration object with ID, alias, description, triggers, conditions, actions, and execution mode",
        "properties": {
            "id": { "type": "string" },
            "alias": { "type": "string" },
            "description": { "type": "string" },
            "triggers": { "type": "array", "items": {} },
            "conditions": { "type": "array", "items": {} },
            "actions": { "type": "array", "items": {} },
            "mode": { "type": "string", "enum": ["single", "parallel", "queued", "restart"] }
        },
        "required": ["id", "alias", "description", "triggers", "conditions", "actions", "mode"]
    });
    if !with_id {
        schema["description"] = json!(
            "Home Assistant automation creation object without ID, used when creating new automations"
        );
        if let Some(props) = schema["properties"].as_object_mut() {
            props.remove("id");
        }
        schema["required"] = json!(["alias", "description", "triggers", "conditions", "actions", "mode"]);
    }
    schema
}

fn automation_schema() -> Value {
    json!({
        "type": "object",
        "description": "Home Assistant automation entity with state, attributes including automation ID, mode, and execution details",
        "properties": {
            "entityId": { "type": "string" },
            "state": { "type": "string" },
            "attributes": {
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "last_triggered": { "type": ["string", "null"] },
                    "mode": { "type": "string" },
                    "current": { "type": "number" },
                    "friendly_name": { "type": "string" }
                }
            },
            "lastChanged": { "type": "string" },
            "lastUpdated": { "type": "string" },
            "context": { "type": "object" }
        },
        "required": ["entityId", "state", "attributes", "lastChanged", "lastUpdated", "context"]
    })
}

fn trace_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "run_id": { "type": "string" },
            "state": { "type": "string" },
            "script_execution": { "type": "string" },
            "timestamp": {
                "type": "object",
                "properties": {
                    "start": { "type": "string" },
                    "finish": { "type": ["string", "null"] }
                }
            },
            "domain": { "type": "string" },
            "item_id": { "type": "string" },
            "trace": { "type": "object" },
            "config": { "type": "object" },
            "context": { "type": "object" }
        }
    })
}
