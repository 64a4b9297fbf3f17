//! Typed records mirroring the hub's domain objects.
//!
//! These are never stored locally: each capability fetches, decodes, and
//! serializes them straight back out to the agent. Unknown fields are kept in
//! `extra` maps where the hub is known to grow its payloads.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Causal context attached to every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateContext {
    pub id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Snapshot of one entity's state, re-keyed to camelCase for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    #[serde(alias = "entity_id")]
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, alias = "last_changed")]
    pub last_changed: String,
    #[serde(default, alias = "last_updated")]
    pub last_updated: String,
    pub context: StateContext,
}

/// Automation run mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutomationMode {
    #[default]
    Single,
    Parallel,
    Queued,
    Restart,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutomationAttributes {
    /// REST id; absent for automations not managed through the config API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AutomationMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An `automation.*` entity state with typed attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Automation {
    pub entity_id: String,
    pub state: String,
    pub attributes: AutomationAttributes,
    pub last_changed: String,
    pub last_updated: String,
    pub context: StateContext,
}

impl Automation {
    pub fn rest_id(&self) -> Option<&str> {
        self.attributes.id.as_deref()
    }
}

impl From<EntityState> for Automation {
    fn from(state: EntityState) -> Self {
        let attributes =
            serde_json::from_value(Value::Object(state.attributes.clone())).unwrap_or_else(|_| {
                AutomationAttributes {
                    extra: state.attributes.clone(),
                    ..AutomationAttributes::default()
                }
            });
        Self {
            entity_id: state.entity_id,
            state: state.state,
            attributes,
            last_changed: state.last_changed,
            last_updated: state.last_updated,
            context: state.context,
        }
    }
}

/// Automation definition as stored by the config REST API.
///
/// `id` is omitted on creation and filled in by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub alias: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "trigger", deserialize_with = "one_or_many")]
    pub triggers: Vec<Value>,
    #[serde(default, alias = "condition", deserialize_with = "one_or_many")]
    pub conditions: Vec<Value>,
    #[serde(default, alias = "action", deserialize_with = "one_or_many")]
    pub actions: Vec<Value>,
    #[serde(default)]
    pub mode: AutomationMode,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Accept both `x: {...}` and `x: [{...}]` (older YAML-era configs use the former).
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceTimestamp {
    pub start: String,
    #[serde(default)]
    pub finish: Option<String>,
}

/// One entry of `trace/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTraceSummary {
    pub run_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_execution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_step: Option<String>,
    pub timestamp: TraceTimestamp,
    pub domain: String,
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Full trace of one run, as returned by `trace/get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationTrace {
    pub run_id: String,
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_execution: Option<String>,
    pub timestamp: TraceTimestamp,
    pub domain: String,
    pub item_id: String,
    /// Step path → list of step results.
    #[serde(default)]
    pub trace: Map<String, Value>,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub context: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entity registry entry (`config/entity_registry/get`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRegistryEntry {
    pub entity_id: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub area_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub config_entry_id: Option<String>,
    #[serde(default)]
    pub categories: HashMap<String, Value>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub capabilities: Option<Value>,
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub original_device_class: Option<String>,
    #[serde(default)]
    pub disabled_by: Option<String>,
    #[serde(default)]
    pub hidden_by: Option<String>,
    #[serde(default)]
    pub entity_category: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub options: HashMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Area registry entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub area_id: String,
    pub name: String,
    #[serde(default)]
    pub floor_id: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Lovelace dashboard as listed by `lovelace/dashboards/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LovelaceDashboard {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub url_path: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub require_admin: bool,
    #[serde(default = "default_true")]
    pub show_in_sidebar: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LovelaceDashboard {
    /// Key used to address the dashboard's config resource.
    pub fn config_key(&self) -> &str {
        self.url_path
            .as_deref()
            .or(self.id.as_deref())
            .or(self.title.as_deref())
            .unwrap_or("unknown")
    }
}

fn default_true() -> bool {
    true
}

/// Input to `validate_config`. Absent keys are not sent, so the hub does not
/// report on them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-section verdict from the hub's validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub valid: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateConfigResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<ValidationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<ValidationOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<ValidationOutcome>,
}

impl ValidateConfigResponse {
    pub fn is_valid(&self) -> bool {
        [&self.triggers, &self.conditions, &self.actions]
            .into_iter()
            .flatten()
            .all(|outcome| outcome.valid)
    }
}

/// `{"connected": true, "entityCount": N}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HassStatus {
    pub connected: bool,
    pub entity_count: usize,
}
