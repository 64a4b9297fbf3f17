//! Capability registry: the single point through which every capability
//! reaches the protocol boundary.
//!
//! A [`Capability`] is a descriptor plus a handler. Resource-shaped
//! capabilities are addressed by a literal URI or a [`UriTemplate`] and return
//! a list of [`ResourceContent`]; tool-shaped ones take a flat argument object
//! and return a [`ToolResult`]. The [`Presentation`] chosen at startup decides
//! how resource-shaped capabilities are exposed. Under
//! [`Presentation::Tools`] they become tools whose output is transcoded by
//! [`resource_result_to_tool`].
//!
//! Every registration, tool or resource, draws from one [`RegistrationBudget`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::hass::HassError;

/// Text returned when a resource produced nothing to show.
pub const NO_DATA: &str = "No data found";

/// How resource-shaped capabilities are presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presentation {
    Resources,
    Tools,
}

/// One entry of a `resources/read` result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceContent {
    pub uri: String,
    pub mime_type: Option<String>,
    pub text: Option<String>,
}

impl ResourceContent {
    /// Compact JSON body tagged `application/json`.
    pub fn json<T: Serialize + ?Sized>(uri: impl Into<String>, value: &T) -> Result<Self, HassError> {
        Ok(Self {
            uri: uri.into(),
            mime_type: Some("application/json".into()),
            text: Some(serde_json::to_string(value)?),
        })
    }

    pub fn to_json(&self) -> Value {
        let mut out = json!({ "uri": self.uri });
        if let Some(mime) = &self.mime_type {
            out["mimeType"] = json!(mime);
        }
        if let Some(text) = &self.text {
            out["text"] = json!(text);
        }
        out
    }
}

/// Arguments to a resource handler: the URI it was read at and the bound
/// template variables (or, under tool presentation, the tool arguments).
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub uri: String,
    pub params: Map<String, Value>,
}

impl ResourceRequest {
    /// Required string parameter.
    pub fn param(&self, name: &str) -> Result<&str, HassError> {
        self.params
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| HassError::InvalidInput(format!("Missing required parameter: {name}")))
    }

    /// Optional boolean, accepting `true`/`"true"` and `false`/`"false"`.
    pub fn flag(&self, name: &str) -> Option<bool> {
        match self.params.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

pub type ResourceHandler =
    Arc<dyn Fn(ResourceRequest) -> BoxFuture<'static, Result<Vec<ResourceContent>, HassError>> + Send + Sync>;
pub type ToolHandler = Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Outcome of a tool call, rendered as MCP `content` blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<Value>,
    pub is_error: bool,
    pub structured: Option<Value>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![json!({ "type": "text", "text": text.into() })],
            is_error: false,
            structured: None,
        }
    }

    /// Compact JSON text block.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(text) => Self::text(text),
            Err(e) => Self::error(format!("Failed to serialize result: {e}")),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            ..Self::text(message)
        }
    }

    /// `Failed to {action}: {err}`, flagged as an error.
    pub fn failure(action: &str, err: &dyn fmt::Display) -> Self {
        Self::error(format!("Failed to {action}: {err}"))
    }

    /// Text of the first content block.
    pub fn first_text(&self) -> Option<&str> {
        self.content.first()?.get("text")?.as_str()
    }

    pub fn to_json(&self) -> Value {
        let mut out = json!({ "content": self.content });
        if self.is_error {
            out["isError"] = json!(true);
        }
        if let Some(structured) = &self.structured {
            out["structuredContent"] = structured.clone();
        }
        out
    }

    fn with_structured_content(mut self) -> Self {
        if !self.is_error && self.content.len() == 1 {
            if let Some(Ok(value @ Value::Object(_))) = self.first_text().map(serde_json::from_str::<Value>) {
                self.structured = Some(value);
            }
        }
        self
    }
}

/// Where a resource lives.
#[derive(Debug, Clone)]
pub enum ResourceAddress {
    Fixed(String),
    Template(UriTemplate),
}

pub enum CapabilityKind {
    Resource {
        address: ResourceAddress,
        mime_type: String,
        handler: ResourceHandler,
    },
    Tool {
        handler: ToolHandler,
    },
}

/// Descriptor and handler for one exposed operation.
pub struct Capability {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub kind: CapabilityKind,
}

impl Capability {
    /// Resource at `uri`; a `{var}` anywhere in it makes it a template.
    pub fn resource<F, Fut>(name: &str, uri: &str, handler: F) -> Self
    where
        F: Fn(ResourceRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<ResourceContent>, HassError>> + Send + 'static,
    {
        let address = if uri.contains('{') {
            ResourceAddress::Template(UriTemplate::parse(uri))
        } else {
            ResourceAddress::Fixed(uri.to_string())
        };
        let handler: ResourceHandler = Arc::new(move |req| handler(req).boxed());
        Self::new(
            name,
            CapabilityKind::Resource {
                address,
                mime_type: "application/json".into(),
                handler,
            },
        )
    }

    pub fn tool<F, Fut>(name: &str, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(move |args| handler(args).boxed());
        Self::new(name, CapabilityKind::Tool { handler })
    }

    fn new(name: &str, kind: CapabilityKind) -> Self {
        Self {
            name: name.to_string(),
            title: String::new(),
            description: String::new(),
            input_schema: None,
            output_schema: None,
            kind,
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn input(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Output schema; only object schemas are advertised, others are dropped.
    pub fn output(mut self, schema: Value) -> Self {
        self.output_schema = (schema["type"] == "object").then_some(schema);
        self
    }

    /// Input schema as given, or derived from the template variables.
    fn effective_input_schema(&self) -> Value {
        if let Some(schema) = &self.input_schema {
            return schema.clone();
        }
        match &self.kind {
            CapabilityKind::Resource {
                address: ResourceAddress::Template(template),
                ..
            } => {
                let vars = template.variables();
                let properties: Map<String, Value> = vars
                    .iter()
                    .map(|v| (v.to_string(), json!({ "type": "string" })))
                    .collect();
                json!({ "type": "object", "properties": properties, "required": vars })
            }
            _ => json!({ "type": "object", "properties": {} }),
        }
    }

    /// Lower-cased title for failure messages (`Failed to get entity state: ...`).
    fn action(&self) -> String {
        let mut chars = self.title.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => self.name.clone(),
        }
    }
}

/// Countdown of registrations still allowed; `None` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationBudget {
    remaining: Option<u64>,
}

impl RegistrationBudget {
    /// Any negative limit is unlimited.
    pub fn from_limit(limit: i64) -> Self {
        Self {
            remaining: u64::try_from(limit).ok(),
        }
    }

    /// Spend one registration for `name`; `false` if the budget is exhausted.
    pub fn try_take(&mut self, name: &str) -> bool {
        match self.remaining.as_mut() {
            None => true,
            Some(0) => {
                tracing::warn!("Limit reached for resources, cannot register {name}");
                false
            }
            Some(n) => {
                *n -= 1;
                if *n == 0 {
                    tracing::warn!("Limit reached for resources, this is the last one registered: {name}");
                }
                true
            }
        }
    }
}

enum ToolInvoke {
    Direct(ToolHandler),
    FromResource {
        fixed_uri: Option<String>,
        handler: ResourceHandler,
    },
}

struct RegisteredTool {
    name: String,
    title: String,
    description: String,
    action: String,
    input_schema: Value,
    output_schema: Option<Value>,
    invoke: ToolInvoke,
}

struct RegisteredResource {
    name: String,
    title: String,
    description: String,
    action: String,
    address: ResourceAddress,
    mime_type: String,
    handler: ResourceHandler,
}

pub struct CapabilityRegistry {
    presentation: Presentation,
    debug: bool,
    budget: RegistrationBudget,
    tools: Vec<RegisteredTool>,
    resources: Vec<RegisteredResource>,
}

impl CapabilityRegistry {
    pub fn new(presentation: Presentation, debug: bool, limit: i64) -> Self {
        Self {
            presentation,
            debug,
            budget: RegistrationBudget::from_limit(limit),
            tools: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    /// Register `cap`; `false` if the registration budget refused it.
    pub fn register(&mut self, cap: Capability) -> bool {
        if !self.budget.try_take(&cap.name) {
            return false;
        }
        let input_schema = cap.effective_input_schema();
        let action = cap.action();
        match cap.kind {
            CapabilityKind::Tool { handler } => self.tools.push(RegisteredTool {
                name: cap.name,
                title: cap.title,
                description: cap.description,
                action,
                input_schema,
                output_schema: cap.output_schema,
                invoke: ToolInvoke::Direct(handler),
            }),
            CapabilityKind::Resource {
                address, handler, ..
            } if self.presentation == Presentation::Tools => {
                let fixed_uri = match address {
                    ResourceAddress::Fixed(uri) => Some(uri),
                    ResourceAddress::Template(_) => None,
                };
                self.tools.push(RegisteredTool {
                    name: cap.name,
                    title: cap.title,
                    description: cap.description,
                    action,
                    input_schema,
                    output_schema: cap.output_schema,
                    invoke: ToolInvoke::FromResource { fixed_uri, handler },
                });
            }
            CapabilityKind::Resource {
                address,
                mime_type,
                handler,
            } => self.resources.push(RegisteredResource {
                name: cap.name,
                title: cap.title,
                description: cap.description,
                action,
                address,
                mime_type,
                handler,
            }),
        }
        true
    }

    pub fn len(&self) -> usize {
        self.tools.len() + self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tool_definitions(&self) -> Vec<Value> {
        self.tools
            .iter()
            .map(|t| {
                let mut def = json!({
                    "name": t.name,
                    "title": t.title,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                });
                if let Some(schema) = &t.output_schema {
                    def["outputSchema"] = schema.clone();
                }
                def
            })
            .collect()
    }

    pub fn resource_definitions(&self) -> Vec<Value> {
        self.resources
            .iter()
            .filter_map(|r| match &r.address {
                ResourceAddress::Fixed(uri) => Some(json!({
                    "uri": uri,
                    "name": r.name,
                    "title": r.title,
                    "description": r.description,
                    "mimeType": r.mime_type,
                })),
                ResourceAddress::Template(_) => None,
            })
            .collect()
    }

    pub fn resource_template_definitions(&self) -> Vec<Value> {
        self.resources
            .iter()
            .filter_map(|r| match &r.address {
                ResourceAddress::Template(template) => Some(json!({
                    "uriTemplate": template.as_str(),
                    "name": r.name,
                    "title": r.title,
                    "description": r.description,
                    "mimeType": r.mime_type,
                })),
                ResourceAddress::Fixed(_) => None,
            })
            .collect()
    }

    /// Invoke tool `name`; `None` if no such tool is registered.
    pub async fn call_tool(&self, name: &str, args: Value) -> Option<ToolResult> {
        let tool = self.tools.iter().find(|t| t.name == name)?;
        let args = match check_arguments(&tool.input_schema, args) {
            Ok(args) => args,
            Err(message) => return Some(ToolResult::error(message)),
        };

        let result = match &tool.invoke {
            ToolInvoke::Direct(handler) => handler(args).await,
            ToolInvoke::FromResource { fixed_uri, handler } => {
                let uri = fixed_uri
                    .clone()
                    .unwrap_or_else(|| format!("http://dummy/{name}"));
                match handler(ResourceRequest { uri, params: args }).await {
                    Ok(contents) => resource_result_to_tool(name, &contents, self.debug),
                    Err(e) => ToolResult::failure(&tool.action, &e),
                }
            }
        };

        Some(match tool.output_schema {
            Some(_) => result.with_structured_content(),
            None => result,
        })
    }

    /// Read the resource at `uri`. Fixed URIs win over templates; templates
    /// are tried in registration order. `None` if nothing matches; `Err`
    /// carries the failure text.
    pub async fn read_resource(&self, uri: &str) -> Option<Result<Vec<ResourceContent>, String>> {
        let (resource, params) = self.match_resource(uri)?;
        let request = ResourceRequest {
            uri: uri.to_string(),
            params,
        };
        let result = (resource.handler)(request).await;
        if self.debug {
            if let Ok(contents) = &result {
                tracing::debug!(resource = %resource.name, count = contents.len(), "resource read");
            }
        }
        Some(result.map_err(|e| format!("Failed to {}: {e}", resource.action)))
    }

    fn match_resource(&self, uri: &str) -> Option<(&RegisteredResource, Map<String, Value>)> {
        let fixed = self.resources.iter().find(|r| match &r.address {
            ResourceAddress::Fixed(fixed) => fixed == uri,
            ResourceAddress::Template(_) => false,
        });
        if let Some(resource) = fixed {
            return Some((resource, Map::new()));
        }
        self.resources.iter().find_map(|r| match &r.address {
            ResourceAddress::Template(template) => template.matches(uri).map(|params| (r, params)),
            ResourceAddress::Fixed(_) => None,
        })
    }
}

/// Check `args` against the required list and declared property types of
/// `schema`, returning the argument object.
pub fn check_arguments(schema: &Value, args: Value) -> Result<Map<String, Value>, String> {
    let args = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        _ => return Err("Tool arguments must be an object".into()),
    };

    if let Some(required) = schema["required"].as_array() {
        for name in required.iter().filter_map(Value::as_str) {
            if args.get(name).map_or(true, Value::is_null) {
                return Err(format!("Missing required parameter: {name}"));
            }
        }
    }

    if let Some(properties) = schema["properties"].as_object() {
        for (name, value) in &args {
            let Some(expected) = properties.get(name).and_then(|p| p["type"].as_str()) else {
                continue;
            };
            let ok = match expected {
                "string" => value.is_string(),
                "boolean" => value.is_boolean(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "object" => value.is_object(),
                "array" => value.is_array(),
                _ => true,
            };
            if !ok && !value.is_null() {
                return Err(format!("Invalid type for parameter {name}: expected {expected}"));
            }
        }
    }

    Ok(args)
}

/// Fold resource contents into a single text block.
///
/// Several contents become one JSON array (each text embedded as JSON when it
/// parses, as a string otherwise). No contents, or a first content without
/// text, become [`NO_DATA`].
pub fn resource_result_to_tool(name: &str, contents: &[ResourceContent], debug: bool) -> ToolResult {
    if debug {
        let raw = Value::Array(contents.iter().map(ResourceContent::to_json).collect());
        tracing::debug!(resource = name, raw = %raw, "raw resource result");
    }

    let text = match contents {
        [] => NO_DATA.to_string(),
        [first, ..] if first.text.as_deref().map_or(true, str::is_empty) => NO_DATA.to_string(),
        [only] => only.text.clone().unwrap_or_default(),
        many => {
            let items: Vec<Value> = many
                .iter()
                .map(|c| match c.text.as_deref() {
                    Some(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
                    None => Value::Null,
                })
                .collect();
            Value::Array(items).to_string()
        }
    };

    let result = ToolResult::text(text);
    if debug {
        tracing::debug!(resource = name, transformed = %result.to_json(), "resource to tool");
    }
    result
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Literal(String),
    Var(String),
}

/// URI template with `{name}` placeholders, each matching one path segment.
///
/// Query parameters on a matched URI bind as extra parameters; `true` and
/// `false` become booleans.
#[derive(Debug, Clone, PartialEq)]
pub struct UriTemplate {
    raw: String,
    parts: Vec<Part>,
}

impl UriTemplate {
    pub fn parse(raw: &str) -> Self {
        let mut parts = Vec::new();
        let mut rest = raw;
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}').map(|i| open + i) else {
                break;
            };
            if open > 0 {
                parts.push(Part::Literal(rest[..open].to_string()));
            }
            parts.push(Part::Var(rest[open + 1..close].to_string()));
            rest = &rest[close + 1..];
        }
        if !rest.is_empty() {
            parts.push(Part::Literal(rest.to_string()));
        }
        Self {
            raw: raw.to_string(),
            parts,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn variables(&self) -> Vec<&str> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Var(name) => Some(name.as_str()),
                Part::Literal(_) => None,
            })
            .collect()
    }

    /// Bind `uri` against the template.
    pub fn matches(&self, uri: &str) -> Option<Map<String, Value>> {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (uri, None),
        };

        let mut params = Map::new();
        let mut rest = path;
        for part in &self.parts {
            match part {
                Part::Literal(lit) => rest = rest.strip_prefix(lit.as_str())?,
                Part::Var(name) => {
                    let end = rest.find('/').unwrap_or(rest.len());
                    let value = urlencoding::decode(&rest[..end]).ok()?;
                    params.insert(name.clone(), Value::String(value.into_owned()));
                    rest = &rest[end..];
                }
            }
        }
        if !rest.is_empty() {
            return None;
        }

        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let key = urlencoding::decode(key).ok()?.into_owned();
            let value = urlencoding::decode(value).ok()?.into_owned();
            let value = match value.as_str() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::String(value),
            };
            params.entry(key).or_insert(value);
        }
        Some(params)
    }
}
