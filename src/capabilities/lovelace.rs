//! Lovelace dashboards, their configs and frontend resources.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::{json_content, str_arg, GroupContext};
use crate::hass::lovelace::{dashboard_config_schema, validate_dashboard_config, validate_url_path};
use crate::hass::{HassClient, HassError};
use crate::registry::{Capability, ResourceContent, ResourceRequest, ToolResult};

const URL_PATH_HELP: &str = "The URL must contain a dash ('-') and must not contain spaces or special characters, except '_' and '-'";

pub fn capabilities(ctx: &GroupContext) -> Vec<Capability> {
    vec![
        ctx.resource("get-lovelace-config", "lovelace://config/{url_path}", get_config)
            .title("Get Lovelace Config")
            .description(format!("Fetch Lovelace dashboard config by url_path. {URL_PATH_HELP}"))
            .input(json!({
                "type": "object",
                "properties": {
                    "url_path": { "type": "string", "description": URL_PATH_HELP },
                    "force": { "type": "boolean", "description": "Bypass the frontend cache" }
                },
                "required": ["url_path"]
            })),
        ctx.tool("update-lovelace-config", update_config)
            .title("Update Lovelace Config")
            .description("Update Lovelace dashboard config by url_path.")
            .input(json!({
                "type": "object",
                "properties": {
                    "url_path": { "type": "string", "description": URL_PATH_HELP },
                    "config": dashboard_config_schema()
                },
                "required": ["url_path", "config"]
            })),
        ctx.resource("list-lovelace-dashboards", "lovelace://dashboards/list", list_dashboards)
            .title("List Lovelace Dashboards")
            .description("List all Lovelace dashboards."),
        ctx.tool("create-lovelace-dashboard", create_dashboard)
            .title("Create Lovelace Dashboard")
            .description("Create a new Lovelace dashboard.")
            .input(json!({
                "type": "object",
                "properties": {
                    "title": { "type": "string" },
                    "url_path": { "type": "string", "description": URL_PATH_HELP },
                    "require_admin": { "type": "boolean", "default": false },
                    "show_in_sidebar": { "type": "boolean", "default": true }
                },
                "required": ["title", "url_path"]
            })),
        ctx.tool("delete-lovelace-dashboard", delete_dashboard)
            .title("Delete Lovelace Dashboard")
            .description("Delete a Lovelace dashboard by dashboard_id.")
            .input(json!({
                "type": "object",
                "properties": {
                    "dashboard_id": { "type": "string" }
                },
                "required": ["dashboard_id"]
            })),
        ctx.resource("get-lovelace-resources", "lovelace://resources", get_resources)
            .title("Get Lovelace Resources")
            .description("Fetch Lovelace resources."),
        ctx.tool("update-lovelace-resource", update_resource)
            .title("Update Lovelace Resource")
            .description("Update a Lovelace resource.")
            .input(json!({
                "type": "object",
                "properties": {
                    "resource_id": { "type": "string" },
                    "res_type": { "type": "string", "description": "Resource type, e.g. 'module' or 'css'" },
                    "url": { "type": "string" }
                },
                "required": ["resource_id", "res_type", "url"]
            })),
    ]
}

async fn get_config(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let url_path = req.param("url_path")?;
    let force = req.flag("force").unwrap_or(false);
    let config = client.get_lovelace_config(url_path, force).await?;
    json_content(&req, &config)
}

async fn list_dashboards(client: Arc<HassClient>, _req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    client
        .list_lovelace_dashboards()
        .await?
        .iter()
        .map(|dashboard| ResourceContent::json(format!("lovelace://config/{}", dashboard.config_key()), dashboard))
        .collect()
}

async fn get_resources(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let resources = client.get_lovelace_resources().await?;
    json_content(&req, &resources)
}

async fn update_config(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let url_path = str_arg(&args, "url_path");
    let action = format!("update Lovelace config for {url_path}");
    let config = args.get("config").cloned().unwrap_or(Value::Null);

    if let Err(e) = validate_dashboard_config(&config) {
        return ToolResult::failure(&action, &e);
    }
    // The validated form drops unknown keys; the hub gets what was sent.
    match client.save_lovelace_config(url_path, &config).await {
        Ok(()) => ToolResult::text("Lovelace config updated successfully"),
        Err(e) => ToolResult::failure(&action, &e),
    }
}

async fn create_dashboard(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let title = str_arg(&args, "title");
    let url_path = str_arg(&args, "url_path");
    let require_admin = args.get("require_admin").and_then(Value::as_bool).unwrap_or(false);
    let show_in_sidebar = args.get("show_in_sidebar").and_then(Value::as_bool).unwrap_or(true);
    let action = format!("create Lovelace dashboard {url_path}");

    if let Err(e) = validate_url_path(url_path) {
        return ToolResult::failure(&action, &e);
    }
    match client
        .create_lovelace_dashboard(title, url_path, require_admin, show_in_sidebar)
        .await
    {
        Ok(_) => ToolResult::text("Lovelace dashboard created successfully"),
        Err(e) => ToolResult::failure(&action, &e),
    }
}

async fn delete_dashboard(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let dashboard_id = str_arg(&args, "dashboard_id");
    match client.delete_lovelace_dashboard(dashboard_id).await {
        Ok(()) => ToolResult::text("Lovelace dashboard deleted successfully"),
        Err(e) => ToolResult::failure(&format!("delete Lovelace dashboard {dashboard_id}"), &e),
    }
}

async fn update_resource(client: Arc<HassClient>, args: Map<String, Value>) -> ToolResult {
    let resource_id = str_arg(&args, "resource_id");
    let res_type = str_arg(&args, "res_type");
    let url = str_arg(&args, "url");
    match client.update_lovelace_resource(resource_id, res_type, url).await {
        Ok(_) => ToolResult::text("Lovelace resource updated successfully"),
        Err(e) => ToolResult::failure(&format!("update Lovelace resource {resource_id}"), &e),
    }
}
