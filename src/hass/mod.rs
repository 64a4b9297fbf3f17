//! Home Assistant client.
//!
//! [`HassClient`] is a typed facade over two channels to the same hub: the
//! persistent websocket ([`websocket::HassWebSocket`]) for state, service,
//! registry and dashboard commands, and discrete REST calls
//! ([`rest::RestClient`]) for config CRUD. Each operation issues one remote
//! call, occasionally two (resolve an entity id to a REST id, then act).
//!
//! Automations and scripts live in two identifier spaces: the entity id
//! (`automation.wake_up`) and the config id used by the REST API. Resolving
//! one to the other scans the full state list.

pub mod error;
pub mod lovelace;
pub mod provider;
pub mod rest;
pub mod types;
pub mod websocket;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use regex::Regex;
use serde_json::{json, Map, Value};

pub use error::HassError;
use rest::{api, RestClient};
use types::{
    Area, Automation, AutomationConfig, AutomationTrace, AutomationTraceSummary, EntityRegistryEntry,
    EntityState, LovelaceDashboard, ValidateConfig, ValidateConfigResponse,
};
use websocket::HassWebSocket;

const AUTOMATION_PREFIX: &str = "automation.";
const SCRIPT_PREFIX: &str = "script.";

/// Connected client for one Home Assistant instance.
pub struct HassClient {
    rest: RestClient,
    ws: HassWebSocket,
}

impl HassClient {
    /// Authenticate the websocket and prepare the REST client.
    pub async fn connect(url: &str, token: &str) -> Result<Self, HassError> {
        let rest = RestClient::new(url, token)?;
        let ws = HassWebSocket::connect(url, token).await?;
        Ok(Self { rest, ws })
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_connected()
    }

    async fn command<T: serde::de::DeserializeOwned>(
        &self,
        kind: &str,
        fields: Value,
    ) -> Result<T, HassError> {
        let result = self.ws.command(kind, fields).await?;
        Ok(serde_json::from_value(result)?)
    }

    // --- States and entities ---

    pub async fn get_states(&self) -> Result<Vec<EntityState>, HassError> {
        self.command("get_states", Value::Null).await
    }

    pub async fn get_entities_by_prefix(&self, prefix: &str) -> Result<Vec<EntityState>, HassError> {
        let states = self.get_states().await?;
        Ok(states
            .into_iter()
            .filter(|s| s.entity_id.starts_with(prefix))
            .collect())
    }

    pub async fn get_entities_matching(&self, regex: &Regex) -> Result<Vec<EntityState>, HassError> {
        let states = self.get_states().await?;
        Ok(states
            .into_iter()
            .filter(|s| regex.is_match(&s.entity_id))
            .collect())
    }

    /// Single entity; absence is an error, unlike the list queries.
    pub async fn get_entity_state(&self, entity_id: &str) -> Result<EntityState, HassError> {
        self.get_states()
            .await?
            .into_iter()
            .find(|s| s.entity_id == entity_id)
            .ok_or_else(|| HassError::NotFound(format!("Entity not found: {entity_id}")))
    }

    /// Integration domain that provides `entity_id`, via the `entity/source` index.
    pub async fn get_entity_domain(&self, entity_id: &str) -> Result<Option<String>, HassError> {
        let sources: Map<String, Value> = self.command("entity/source", Value::Null).await?;
        Ok(sources
            .get(entity_id)
            .and_then(|source| source["domain"].as_str())
            .map(String::from))
    }

    pub async fn list_areas(&self) -> Result<Vec<Area>, HassError> {
        self.command("config/area_registry/list", Value::Null).await
    }

    /// Items related to `item_type`/`item_id`, grouped by category.
    pub async fn search_related(
        &self,
        item_type: &str,
        item_id: &str,
    ) -> Result<Map<String, Value>, HassError> {
        self.command(
            "search/related",
            json!({ "item_type": item_type, "item_id": item_id }),
        )
        .await
    }

    // --- Services and config ---

    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        data: Option<Map<String, Value>>,
    ) -> Result<Value, HassError> {
        self.ws
            .command(
                "call_service",
                json!({
                    "domain": domain,
                    "service": service,
                    "service_data": data.unwrap_or_default(),
                }),
            )
            .await
    }

    pub async fn validate_config(
        &self,
        config: &ValidateConfig,
    ) -> Result<ValidateConfigResponse, HassError> {
        self.command("validate_config", serde_json::to_value(config)?)
            .await
    }

    pub async fn get_manifest(&self, integration: &str) -> Result<Value, HassError> {
        self.ws
            .command("manifest/get", json!({ "integration": integration }))
            .await
    }

    // --- Automations ---

    pub async fn get_automations(&self) -> Result<Vec<Automation>, HassError> {
        let states = self.get_entities_by_prefix(AUTOMATION_PREFIX).await?;
        Ok(states.into_iter().map(Automation::from).collect())
    }

    /// Look up an automation entity; `entity_id` may omit the `automation.` prefix.
    pub async fn find_automation_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<Option<Automation>, HassError> {
        let wanted = qualify(AUTOMATION_PREFIX, entity_id);
        Ok(self
            .get_automations()
            .await?
            .into_iter()
            .find(|a| a.entity_id == wanted))
    }

    pub async fn get_automation_by_entity_id(&self, entity_id: &str) -> Result<Automation, HassError> {
        self.find_automation_by_entity_id(entity_id)
            .await?
            .ok_or_else(|| HassError::NotFound(format!("Automation state or id not found for entity: {entity_id}")))
    }

    pub async fn get_automation_by_rest_id(&self, rest_id: &str) -> Result<Automation, HassError> {
        self.get_automations()
            .await?
            .into_iter()
            .find(|a| a.rest_id() == Some(rest_id))
            .ok_or_else(|| HassError::NotFound(format!("Automation with id {rest_id} not found")))
    }

    /// Entity id → REST id.
    pub async fn resolve_automation_rest_id(&self, entity_id: &str) -> Result<String, HassError> {
        self.find_automation_by_entity_id(entity_id)
            .await?
            .and_then(|a| a.attributes.id)
            .ok_or_else(|| {
                HassError::NotFound(format!(
                    "Automation state or id not found for entity: {entity_id}"
                ))
            })
    }

    pub async fn get_automation_config(&self, rest_id: &str) -> Result<AutomationConfig, HassError> {
        let value = self
            .rest
            .get(&id_path(api::AUTOMATION_CONFIG, rest_id)?)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn get_automation_config_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<AutomationConfig, HassError> {
        let rest_id = self.resolve_automation_rest_id(entity_id).await?;
        self.get_automation_config(&rest_id).await
    }

    /// Store a new automation and return its freshly assigned REST id.
    pub async fn create_automation(&self, mut config: AutomationConfig) -> Result<String, HassError> {
        let id = next_automation_id();
        config.id = Some(id.clone());
        self.rest
            .post(
                &id_path(api::AUTOMATION_CONFIG, &id)?,
                &serde_json::to_value(&config)?,
            )
            .await?;
        Ok(id)
    }

    /// Overwrite the automation identified by `config.id`.
    pub async fn update_automation_config(&self, config: &AutomationConfig) -> Result<(), HassError> {
        let id = config
            .id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| HassError::InvalidInput("Missing required parameter: automation.id".into()))?;
        self.rest
            .post(
                &id_path(api::AUTOMATION_CONFIG, id)?,
                &serde_json::to_value(config)?,
            )
            .await?;
        Ok(())
    }

    /// Overwrite an automation addressed by entity id; the REST id always wins
    /// over whatever `id` the caller put in `config`.
    pub async fn update_automation_by_entity_id(
        &self,
        entity_id: &str,
        mut config: AutomationConfig,
    ) -> Result<(), HassError> {
        config.id = Some(self.resolve_automation_rest_id(entity_id).await?);
        self.update_automation_config(&config).await
    }

    pub async fn delete_automation_config(&self, rest_id: &str) -> Result<(), HassError> {
        self.rest
            .delete(&id_path(api::AUTOMATION_CONFIG, rest_id)?, None)
            .await?;
        Ok(())
    }

    pub async fn delete_automation(&self, entity_id: &str) -> Result<(), HassError> {
        let rest_id = self.resolve_automation_rest_id(entity_id).await?;
        self.delete_automation_config(&rest_id).await
    }

    pub async fn get_automation_trace(
        &self,
        rest_id: &str,
        run_id: &str,
    ) -> Result<Option<AutomationTrace>, HassError> {
        self.command(
            "trace/get",
            json!({ "domain": "automation", "item_id": rest_id, "run_id": run_id }),
        )
        .await
    }

    pub async fn list_automation_traces(
        &self,
        rest_id: &str,
    ) -> Result<Vec<AutomationTraceSummary>, HassError> {
        let traces: Option<Vec<AutomationTraceSummary>> = self
            .command(
                "trace/list",
                json!({ "domain": "automation", "item_id": rest_id }),
            )
            .await?;
        Ok(traces.unwrap_or_default())
    }

    pub async fn list_device_automation_triggers(
        &self,
        device_id: &str,
    ) -> Result<Vec<Value>, HassError> {
        self.command(
            "device_automation/trigger/list",
            json!({ "device_id": device_id }),
        )
        .await
    }

    // --- Entity and device registries ---

    pub async fn get_entity_registry_entry(
        &self,
        entity_id: &str,
    ) -> Result<Option<EntityRegistryEntry>, HassError> {
        self.command(
            "config/entity_registry/get",
            json!({ "entity_id": entity_id }),
        )
        .await
    }

    pub async fn get_device_id_by_entity_id(&self, entity_id: &str) -> Result<Option<String>, HassError> {
        Ok(self
            .get_entity_registry_entry(entity_id)
            .await?
            .and_then(|entry| entry.device_id))
    }

    pub async fn get_config_entry_id_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<Option<String>, HassError> {
        Ok(self
            .get_entity_registry_entry(entity_id)
            .await?
            .and_then(|entry| entry.config_entry_id))
    }

    /// Apply `changes` (area_id, name_by_user, ...) to a device registry entry.
    pub async fn update_device_registry(
        &self,
        device_id: &str,
        changes: Map<String, Value>,
    ) -> Result<Value, HassError> {
        let mut fields = changes;
        fields.insert("device_id".into(), json!(device_id));
        self.ws
            .command("config/device_registry/update", Value::Object(fields))
            .await
    }

    // --- Config entry flows (REST, passed through verbatim) ---

    pub async fn create_config_entry_flow(&self, handler: &str) -> Result<Value, HassError> {
        self.rest
            .post(
                api::CONFIG_ENTRIES_FLOW,
                &json!({ "handler": handler, "show_advanced_options": true }),
            )
            .await
    }

    pub async fn continue_config_entry_flow(
        &self,
        flow_id: &str,
        next_step_id: &str,
    ) -> Result<Value, HassError> {
        self.rest
            .post(
                &id_path(api::CONFIG_ENTRIES_FLOW, flow_id)?,
                &json!({ "next_step_id": next_step_id }),
            )
            .await
    }

    pub async fn update_config_entry_flow(
        &self,
        flow_id: &str,
        options: &Map<String, Value>,
    ) -> Result<Value, HassError> {
        self.rest
            .post(
                &id_path(api::CONFIG_ENTRIES_FLOW, flow_id)?,
                &Value::Object(options.clone()),
            )
            .await
    }

    pub async fn create_config_entry_options_flow(
        &self,
        config_entry_id: &str,
    ) -> Result<Value, HassError> {
        self.rest
            .post(
                api::CONFIG_ENTRIES_OPTIONS_FLOW,
                &json!({ "handler": config_entry_id, "show_advanced_options": true }),
            )
            .await
    }

    pub async fn update_config_entry_options_flow(
        &self,
        flow_id: &str,
        options: &Map<String, Value>,
    ) -> Result<Value, HassError> {
        self.rest
            .post(
                &id_path(api::CONFIG_ENTRIES_OPTIONS_FLOW, flow_id)?,
                &Value::Object(options.clone()),
            )
            .await
    }

    pub async fn delete_config_entry(&self, config_entry_id: &str) -> Result<Value, HassError> {
        self.rest
            .delete(
                &id_path(api::CONFIG_ENTRY, config_entry_id)?,
                Some(&json!({ "require_restart": false })),
            )
            .await
    }

    /// Config flow handlers that create helpers (template, group, ...).
    pub async fn get_helper_flow_handlers(&self) -> Result<Value, HassError> {
        self.rest.get(api::CONFIG_ENTRIES_FLOW_HELPERS).await
    }

    // --- Scripts ---

    pub async fn list_scripts(&self) -> Result<Vec<EntityState>, HassError> {
        self.get_entities_by_prefix(SCRIPT_PREFIX).await
    }

    /// Script config stored under `object_id`, or `None` if the hub has none.
    pub async fn get_script_config(&self, object_id: &str) -> Result<Option<Value>, HassError> {
        match self
            .rest
            .get(&id_path(api::SCRIPT_CONFIG, object_id)?)
            .await
        {
            Ok(config) => Ok(Some(config)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn get_script_config_by_alias(&self, alias: &str) -> Result<Option<Value>, HassError> {
        self.get_script_config(&script_slug(alias)?).await
    }

    /// Script config for an existing `script.*` entity; `None` if the entity is unknown.
    pub async fn get_script_config_by_entity_id(
        &self,
        entity_id: &str,
    ) -> Result<Option<Value>, HassError> {
        let wanted = qualify(SCRIPT_PREFIX, entity_id);
        let exists = self
            .list_scripts()
            .await?
            .iter()
            .any(|s| s.entity_id == wanted);
        if !exists {
            return Ok(None);
        }
        self.get_script_config(&wanted[SCRIPT_PREFIX.len()..]).await
    }

    /// Create or replace the script whose id derives from `alias`.
    pub async fn upsert_script_config(
        &self,
        alias: &str,
        mut data: Map<String, Value>,
    ) -> Result<(), HassError> {
        let object_id = script_slug(alias)?;
        data.entry("alias").or_insert_with(|| json!(alias));
        self.rest
            .post(
                &id_path(api::SCRIPT_CONFIG, &object_id)?,
                &Value::Object(data),
            )
            .await?;
        Ok(())
    }

    pub async fn delete_script_config(&self, alias: &str) -> Result<(), HassError> {
        self.rest
            .delete(
                &id_path(api::SCRIPT_CONFIG, &script_slug(alias)?)?,
                None,
            )
            .await?;
        Ok(())
    }

    // --- Lovelace ---

    pub async fn get_lovelace_config(&self, url_path: &str, force: bool) -> Result<Value, HassError> {
        self.ws
            .command(
                "lovelace/config",
                json!({ "url_path": url_path, "force": force }),
            )
            .await
    }

    pub async fn save_lovelace_config(&self, url_path: &str, config: &Value) -> Result<(), HassError> {
        self.ws
            .command(
                "lovelace/config/save",
                json!({ "url_path": url_path, "config": config }),
            )
            .await?;
        Ok(())
    }

    pub async fn list_lovelace_dashboards(&self) -> Result<Vec<LovelaceDashboard>, HassError> {
        self.command("lovelace/dashboards/list", Value::Null).await
    }

    pub async fn create_lovelace_dashboard(
        &self,
        title: &str,
        url_path: &str,
        require_admin: bool,
        show_in_sidebar: bool,
    ) -> Result<Value, HassError> {
        self.ws
            .command(
                "lovelace/dashboards/create",
                json!({
                    "mode": "storage",
                    "title": title,
                    "url_path": url_path,
                    "require_admin": require_admin,
                    "show_in_sidebar": show_in_sidebar,
                }),
            )
            .await
    }

    pub async fn delete_lovelace_dashboard(&self, dashboard_id: &str) -> Result<(), HassError> {
        self.ws
            .command(
                "lovelace/dashboards/delete",
                json!({ "dashboard_id": dashboard_id }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_lovelace_resources(&self) -> Result<Value, HassError> {
        self.ws.command("lovelace/resources", Value::Null).await
    }

    pub async fn update_lovelace_resource(
        &self,
        resource_id: &str,
        res_type: &str,
        url: &str,
    ) -> Result<Value, HassError> {
        self.ws
            .command(
                "lovelace/resources/update",
                json!({ "resource_id": resource_id, "res_type": res_type, "url": url }),
            )
            .await
    }
}

/// Prefix `id` with `prefix` unless it already carries it.
fn qualify(prefix: &str, id: &str) -> String {
    format!("{prefix}{}", id.strip_prefix(prefix).unwrap_or(id))
}

/// `{base}/{id}` with `id` as exactly one percent-encoded path segment.
fn id_path(base: &str, id: &str) -> Result<String, HassError> {
    if id.is_empty() || id.contains('/') || id == "." || id == ".." {
        return Err(HassError::InvalidInput(format!("Invalid id '{id}'")));
    }
    Ok(format!("{base}/{}", urlencoding::encode(id)))
}

/// Non-empty object id for `alias`.
fn script_slug(alias: &str) -> Result<String, HassError> {
    let object_id = script_object_id(alias);
    if object_id.is_empty() {
        return Err(HassError::InvalidInput(format!(
            "Script alias '{alias}' has no usable characters"
        )));
    }
    Ok(object_id)
}

/// Object id the hub derives from a script alias: lowercase ASCII, runs of
/// anything else collapsed to `_`, no leading/trailing `_`.
pub fn script_object_id(alias: &str) -> String {
    let mut out = String::with_capacity(alias.len());
    for c in alias.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

static LAST_AUTOMATION_ID: AtomicU64 = AtomicU64::new(0);

/// Millisecond-timestamp id, strictly increasing within the process so two
/// creations in the same millisecond never collide.
pub fn next_automation_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    let mut last = LAST_AUTOMATION_ID.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_AUTOMATION_ID.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return next.to_string(),
            Err(actual) => last = actual,
        }
    }
}
