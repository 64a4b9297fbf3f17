//! Entity state queries, domain lookup, areas and related-item search.

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};

use super::{entity_state_schema, json_content, GroupContext};
use crate::hass::{HassClient, HassError};
use crate::registry::{Capability, ResourceContent, ResourceRequest};

const SEARCH_ITEM_TYPES: &[&str] = &[
    "area",
    "automation",
    "automation_blueprint",
    "config_entry",
    "device",
    "entity",
    "floor",
    "group",
    "label",
    "scene",
    "script",
    "script_blueprint",
];

pub fn capabilities(ctx: &GroupContext) -> Vec<Capability> {
    let long_types = !ctx.options.no_long_output_types;

    let mut get_state = ctx
        .resource("get-entity-state", "entity://state/{entityId}", get_entity_state)
        .title("Get state of a specific entity")
        .description("Get state of a specific entity")
        .input(entity_id_input());
    if long_types {
        get_state = get_state.output(entity_state_schema());
    }

    vec![
        ctx.resource("list-entities-by-prefix", "entity://list/by-prefix/{prefix}", list_by_prefix)
            .title("List all entities by prefix")
            .description("List all Home Assistant entities by prefix")
            .input(json!({
                "type": "object",
                "properties": {
                    "prefix": { "type": "string", "description": "Prefix to filter entities, e.g. 'sensor.'" }
                },
                "required": ["prefix"]
            })),
        ctx.prepared_resource(
            "list-entities-by-regex",
            "entity://list/by-regex/{pattern}/{flags}",
            request_regex,
            list_by_regex,
        )
            .title("List all entities by regex")
            .description("List all Home Assistant entities matching a regex pattern")
            .input(json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string", "description": "Regex pattern for entity IDs, e.g. '^sensor\\.'" },
                    "flags": { "type": "string", "description": "Regex flags, e.g. 'i' for ignore case" }
                },
                "required": ["pattern", "flags"]
            })),
        get_state,
        ctx.resource("get-entity-domain", "entity://domain/by-entity-id/{entityId}", get_entity_domain)
            .title("Get domain of a specific entity")
            .description("Get domain of a specific entity")
            .input(entity_id_input()),
        ctx.resource("list-areas", "area://list", list_areas)
            .title("List all areas")
            .description("List all areas defined in Home Assistant"),
        ctx.resource("search-related", "search://related/{item_type}/{item_id}", search_related)
            .title("Search related items")
            .description(
                "Find everything related to an item (entities, devices, automations, scripts, areas...), \
                 one result per related item category",
            )
            .input(json!({
                "type": "object",
                "properties": {
                    "item_type": { "type": "string", "enum": SEARCH_ITEM_TYPES, "description": "Kind of item to search from" },
                    "item_id": { "type": "string", "description": "Item id, e.g. 'light.kitchen' for an entity" }
                },
                "required": ["item_type", "item_id"]
            })),
    ]
}

fn entity_id_input() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entityId": { "type": "string", "description": "Entity ID, e.g. 'sensor.temperature'" }
        },
        "required": ["entityId"]
    })
}

/// Compile `pattern` under JavaScript-style `flags`.
///
/// `i`, `m` and `s` become inline flags, `y` anchors the match at the start
/// of the id, and `g`, `u`, `d`, `v` do not change which ids match.
pub fn compile_js_regex(pattern: &str, flags: &str) -> Result<Regex, HassError> {
    let invalid = || HassError::InvalidInput(format!("Invalid regex pattern or flags: {pattern} / {flags}"));

    let mut seen = String::new();
    let mut inline = String::new();
    let mut sticky = false;
    for flag in flags.chars() {
        if seen.contains(flag) {
            return Err(invalid());
        }
        seen.push(flag);
        match flag {
            'i' | 'm' | 's' => inline.push(flag),
            'y' => sticky = true,
            'g' | 'u' | 'd' | 'v' => {}
            _ => return Err(invalid()),
        }
    }
    if seen.contains('u') && seen.contains('v') {
        return Err(invalid());
    }

    let mut source = String::new();
    if !inline.is_empty() {
        source.push_str(&format!("(?{inline})"));
    }
    if sticky {
        source.push_str(&format!(r"\A(?:{pattern})"));
    } else {
        source.push_str(pattern);
    }
    Regex::new(&source).map_err(|_| invalid())
}

async fn list_by_prefix(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let entities = client.get_entities_by_prefix(req.param("prefix")?).await?;
    json_content(&req, &entities)
}

fn request_regex(req: &ResourceRequest) -> Result<Regex, HassError> {
    compile_js_regex(req.param("pattern")?, req.param("flags").unwrap_or_default())
}

async fn list_by_regex(
    client: Arc<HassClient>,
    req: ResourceRequest,
    regex: Regex,
) -> Result<Vec<ResourceContent>, HassError> {
    let entities = client.get_entities_matching(&regex).await?;
    json_content(&req, &entities)
}

async fn get_entity_state(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let state = client.get_entity_state(req.param("entityId")?).await?;
    json_content(&req, &state)
}

async fn get_entity_domain(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let domain = client.get_entity_domain(req.param("entityId")?).await?;
    json_content(&req, &domain)
}

async fn list_areas(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    json_content(&req, &client.list_areas().await?)
}

/// One content per related category, keyed `{uri}#{category}`.
async fn search_related(client: Arc<HassClient>, req: ResourceRequest) -> Result<Vec<ResourceContent>, HassError> {
    let related = client
        .search_related(req.param("item_type")?, req.param("item_id")?)
        .await?;
    related
        .iter()
        .map(|(category, items)| {
            ResourceContent::json(format!("{}#{category}", req.uri), &json!({ category: items }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::tests::{call, read_json, registry_for};
    use crate::capabilities::{build_registry, CapabilityOptions};
    use crate::hass::provider::ConnectionProvider;
    use crate::registry::{Presentation, NO_DATA};
    use crate::testing::{raw_state, FakeHass};

    fn seed(hub: &FakeHass) {
        hub.set_states(vec![
            raw_state("sensor.kitchen_temp", "21.5", json!({ "unit_of_measurement": "°C" })),
            raw_state("sensor.Hall_Temp", "19.0", json!({})),
            raw_state("light.kitchen", "on", json!({ "friendly_name": "Kitchen" })),
        ]);
    }

    #[test]
    fn js_flags_map_onto_regex_syntax() {
        assert!(compile_js_regex("KITCHEN", "i").unwrap().is_match("light.kitchen"));
        assert!(!compile_js_regex("KITCHEN", "").unwrap().is_match("light.kitchen"));
        assert!(compile_js_regex("kitchen", "gu").unwrap().is_match("light.kitchen"));

        let sticky = compile_js_regex("kitchen", "y").unwrap();
        assert!(!sticky.is_match("light.kitchen"));
        assert!(sticky.is_match("kitchen.light"));

        let sticky_alt = compile_js_regex("a|light", "y").unwrap();
        assert!(sticky_alt.is_match("light.x"));
        assert!(!sticky_alt.is_match("sensor.a"));
    }

    #[test]
    fn bad_patterns_and_flags_are_input_errors() {
        for (pattern, flags) in [("(", ""), ("ok", "q"), ("ok", "ii"), ("ok", "uv")] {
            let err = compile_js_regex(pattern, flags).unwrap_err();
            assert!(matches!(err, HassError::InvalidInput(_)));
            assert_eq!(err.to_string(), format!("Invalid regex pattern or flags: {pattern} / {flags}"));
        }
    }

    #[tokio::test]
    async fn prefix_and_regex_listings() {
        let hub = FakeHass::start().await;
        seed(&hub);
        let resources = registry_for(&hub, Presentation::Resources);

        let sensors = read_json(&resources, "entity://list/by-prefix/sensor.").await;
        let ids: Vec<&str> = sensors
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["entityId"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["sensor.kitchen_temp", "sensor.Hall_Temp"]);

        let temps = read_json(&resources, "entity://list/by-regex/_temp%24/i").await;
        assert_eq!(temps.as_array().unwrap().len(), 2);
        let none = read_json(&resources, "entity://list/by-prefix/switch.").await;
        assert_eq!(none, json!([]));
    }

    #[tokio::test]
    async fn invalid_regex_is_rejected_before_any_remote_call() {
        let hub = FakeHass::start().await;
        seed(&hub);
        let tools = registry_for(&hub, Presentation::Tools);

        let result = call(&tools, "list-entities-by-regex", json!({ "pattern": "[", "flags": "i" })).await;
        assert!(result.is_error);
        assert_eq!(
            result.first_text(),
            Some("Failed to list all entities by regex: Invalid regex pattern or flags: [ / i")
        );
        assert!(hub.commands_of("get_states").is_empty());
    }

    #[tokio::test]
    async fn invalid_regex_wins_over_an_unreachable_hub() {
        let provider = Arc::new(ConnectionProvider::new("http://127.0.0.1:1", "t"));
        let resources = build_registry(CapabilityOptions::default(), provider);

        let read = resources
            .read_resource("entity://list/by-regex/%5B/i")
            .await
            .unwrap();
        assert_eq!(
            read.unwrap_err(),
            "Failed to list all entities by regex: Invalid regex pattern or flags: [ / i"
        );
    }

    #[tokio::test]
    async fn entity_state_distinguishes_absent_from_empty() {
        let hub = FakeHass::start().await;
        seed(&hub);
        let resources = registry_for(&hub, Presentation::Resources);

        let state = read_json(&resources, "entity://state/light.kitchen").await;
        assert_eq!(state["state"], "on");
        assert_eq!(state["attributes"]["friendly_name"], "Kitchen");

        let err = resources
            .read_resource("entity://state/light.nope")
            .await
            .unwrap()
            .unwrap_err();
        assert_eq!(err, "Failed to get state of a specific entity: Entity not found: light.nope");
    }

    #[tokio::test]
    async fn output_schema_follows_long_types_option() {
        let hub = FakeHass::start().await;
        let schema_of = |registry: &crate::registry::CapabilityRegistry| {
            registry
                .tool_definitions()
                .into_iter()
                .find(|d| d["name"] == "get-entity-state")
                .unwrap()
                .get("outputSchema")
                .cloned()
        };

        let with = registry_for(&hub, Presentation::Tools);
        assert_eq!(schema_of(&with).unwrap()["required"][0], "entityId");

        let without = build_registry(
            CapabilityOptions {
                presentation: Presentation::Tools,
                no_long_output_types: true,
                ..CapabilityOptions::default()
            },
            Arc::new(ConnectionProvider::new(hub.url.clone(), FakeHass::TOKEN)),
        );
        assert!(schema_of(&without).is_none());
    }

    #[tokio::test]
    async fn domain_areas_and_related_search() {
        let hub = FakeHass::start().await;
        hub.reply("entity/source", json!({ "light.kitchen": { "domain": "hue" } }));
        hub.reply("config/area_registry/list", json!([{ "area_id": "kitchen", "name": "Kitchen" }]));
        hub.reply(
            "search/related",
            json!({ "device": ["dev1"], "automation": ["automation.wake_up", "automation.night"] }),
        );
        let resources = registry_for(&hub, Presentation::Resources);

        assert_eq!(read_json(&resources, "entity://domain/by-entity-id/light.kitchen").await, json!("hue"));
        assert_eq!(read_json(&resources, "entity://domain/by-entity-id/light.other").await, Value::Null);

        let areas = read_json(&resources, "area://list").await;
        assert_eq!(areas[0]["area_id"], "kitchen");

        let related = resources
            .read_resource("search://related/entity/light.kitchen")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].uri, "search://related/entity/light.kitchen#automation");
        let sent = hub.commands_of("search/related").pop().unwrap();
        assert_eq!(sent["item_type"], "entity");
        assert_eq!(sent["item_id"], "light.kitchen");

        let tools = registry_for(&hub, Presentation::Tools);
        let flattened = call(&tools, "search-related", json!({ "item_type": "entity", "item_id": "light.kitchen" })).await;
        let parsed: Value = serde_json::from_str(flattened.first_text().unwrap()).unwrap();
        assert_eq!(
            parsed,
            json!([
                { "automation": ["automation.wake_up", "automation.night"] },
                { "device": ["dev1"] }
            ])
        );

        hub.reply("search/related", json!({}));
        let empty = call(&tools, "search-related", json!({ "item_type": "area", "item_id": "garage" })).await;
        assert_eq!(empty.first_text(), Some(NO_DATA));
    }
}
