//! Dashboard (Lovelace) config schema.
//!
//! A dashboard is `views → sections → cards`, where every card is one of a
//! closed set of variants discriminated by its `type` field. Configs coming
//! from the agent are decoded into [`DashboardConfig`] before anything is sent
//! to the hub; unknown card types, missing required fields, and bad enum
//! values are rejected locally.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::error::HassError;

/// Card `type` values accepted in a dashboard config.
pub const CARD_TYPES: &[&str] = &[
    "heading",
    "custom:mushroom-light-card",
    "tile",
    "custom:webrtc-camera",
    "history-graph",
    "custom:mushroom-select-card",
    "custom:mushroom-climate-card",
    "entities",
    "custom:mushroom-number-card",
    "custom:auto-entities",
    "vertical-stack",
    "custom:apexcharts-card",
    "grid",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    pub views: Vec<View>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewType {
    #[serde(rename = "sections")]
    Sections,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub title: String,
    #[serde(rename = "type")]
    pub view_type: ViewType,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub badges: Vec<Badge>,
    /// Legacy masonry cards; normally empty for section views.
    #[serde(default)]
    pub cards: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_columns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_section_placement: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SectionType {
    #[serde(rename = "grid")]
    Grid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub cards: Vec<LovelaceCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Vec<VisibilityCondition>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BadgeType {
    #[serde(rename = "entity")]
    Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Badge {
    #[serde(rename = "type")]
    pub badge_type: BadgeType,
    pub entity: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    State,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityCondition {
    pub condition: ConditionKind,
    pub entity: String,
    pub state: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    None,
    Toggle,
    MoreInfo,
    PerformAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTarget {
    pub entity_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardAction {
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub perform_action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActionTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridOptions {
    pub columns: f64,
    pub rows: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityReference {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Every card variant, keyed by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LovelaceCard {
    #[serde(rename = "heading")]
    Heading(HeadingCard),
    #[serde(rename = "custom:mushroom-light-card")]
    MushroomLight(MushroomLightCard),
    #[serde(rename = "tile")]
    Tile(TileCard),
    #[serde(rename = "custom:webrtc-camera")]
    WebRtcCamera(WebRtcCameraCard),
    #[serde(rename = "history-graph")]
    HistoryGraph(HistoryGraphCard),
    #[serde(rename = "custom:mushroom-select-card")]
    MushroomSelect(MushroomSelectCard),
    #[serde(rename = "custom:mushroom-climate-card")]
    MushroomClimate(MushroomClimateCard),
    #[serde(rename = "entities")]
    Entities(EntitiesCard),
    #[serde(rename = "custom:mushroom-number-card")]
    MushroomNumber(MushroomNumberCard),
    #[serde(rename = "custom:auto-entities")]
    AutoEntities(AutoEntitiesCard),
    #[serde(rename = "vertical-stack")]
    VerticalStack(StackCard),
    #[serde(rename = "custom:apexcharts-card")]
    ApexCharts(ApexChartsCard),
    #[serde(rename = "grid")]
    Grid(GridCard),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadingStyle {
    Title,
    Subtitle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadingCard {
    pub heading: String,
    pub heading_style: HeadingStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MushroomLightCard {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_light_color: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_brightness_control: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_color_temp_control: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_color_control: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsible_controls: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_action: Option<CardAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_action: Option<CardAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_tap_action: Option<CardAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeaturesPosition {
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileCard {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features_position: Option<FeaturesPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_entity_picture: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide_state: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_content: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_action: Option<CardAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebRtcCameraCard {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryGraphCard {
    pub entities: Vec<EntityReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logarithmic_scale: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_y_axis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_y_axis: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_options: Option<GridOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_to_show: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MushroomSelectCard {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MushroomClimateCard {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_container: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_temperature_control: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsible_controls: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecondaryInfo {
    LastChanged,
    LastUpdated,
    EntityId,
    None,
}

/// A row of an entities card: bare entity id or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntitiesRow {
    Id(String),
    Detailed {
        entity: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        secondary_info: Option<SecondaryInfo>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitiesCard {
    pub entities: Vec<EntitiesRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_color: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumberDisplayMode {
    Slider,
    Buttons,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MushroomNumberCard {
    pub entity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<Layout>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_container: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<NumberDisplayMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoEntitiesInclude {
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoEntitiesExclude {
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoEntitiesFilter {
    pub include: Vec<AutoEntitiesInclude>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<Vec<AutoEntitiesExclude>>,
}

/// Inner card template of an auto-entities card; only its `type` is checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardTemplate {
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoEntitiesCard {
    pub filter: AutoEntitiesFilter,
    pub card: CardTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_empty: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_param: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackCard {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<LovelaceCard>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridCard {
    pub cards: Vec<LovelaceCard>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub square: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesType {
    Line,
    Area,
    Column,
    Scatter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApexChartsGroupBy {
    pub duration: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApexChartsSeries {
    pub entity: String,
    pub name: String,
    #[serde(rename = "type")]
    pub series_type: SeriesType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<ApexChartsGroupBy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChartType {
    #[serde(rename = "line")]
    Line,
    #[serde(rename = "area")]
    Area,
    #[serde(rename = "column")]
    Column,
    #[serde(rename = "pie")]
    Pie,
    #[serde(rename = "donut")]
    Donut,
    #[serde(rename = "radialBar")]
    RadialBar,
    #[serde(rename = "scatter")]
    Scatter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApexChartsHeader {
    pub title: String,
    pub show: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApexChartsSpan {
    pub start: String,
    pub offset: String,
}

/// ApexCharts card. The many ApexCharts option blocks are passed through as
/// objects; only their shape (an object) is checked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApexChartsCard {
    pub series: Vec<ApexChartsSeries>,
    pub chart_type: ChartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<ApexChartsHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<ApexChartsSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_span: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apex_config: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Map<String, Value>>,
    #[serde(default, rename = "plotOptions", skip_serializing_if = "Option::is_none")]
    pub plot_options: Option<Map<String, Value>>,
}

/// Decode and check a dashboard config supplied by the caller.
pub fn validate_dashboard_config(config: &Value) -> Result<DashboardConfig, HassError> {
    serde_json::from_value(config.clone())
        .map_err(|e| HassError::InvalidInput(format!("Invalid dashboard config: {e}")))
}

/// Dashboard url paths must contain a dash and only `[A-Za-z0-9_-]`.
pub fn validate_url_path(url_path: &str) -> Result<(), HassError> {
    let charset_ok = url_path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if url_path.contains('-') && charset_ok {
        Ok(())
    } else {
        Err(HassError::InvalidInput(format!(
            "Invalid url_path '{url_path}': it must contain a dash ('-') and only letters, digits, '_' and '-'"
        )))
    }
}

/// JSON schema advertised for the `config` argument of dashboard updates.
pub fn dashboard_config_schema() -> Value {
    let card = json!({
        "type": "object",
        "properties": {
            "type": { "type": "string", "enum": CARD_TYPES }
        },
        "required": ["type"],
        "additionalProperties": true
    });
    json!({
        "type": "object",
        "properties": {
            "views": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "string" },
                        "type": { "type": "string", "const": "sections" },
                        "max_columns": { "type": "integer" },
                        "dense_section_placement": { "type": "boolean" },
                        "badges": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "type": { "type": "string", "const": "entity" },
                                    "entity": { "type": "string" }
                                },
                                "required": ["type", "entity"]
                            }
                        },
                        "sections": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "properties": {
                                    "type": { "type": "string", "const": "grid" },
                                    "cards": { "type": "array", "items": card }
                                },
                                "required": ["type", "cards"]
                            }
                        },
                        "cards": { "type": "array" }
                    },
                    "required": ["title", "type", "sections"]
                }
            }
        },
        "required": ["views"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dashboard(cards: Value) -> Value {
        json!({
            "views": [{
                "title": "Home",
                "type": "sections",
                "max_columns": 4,
                "badges": [{ "type": "entity", "entity": "person.alex" }],
                "sections": [{ "type": "grid", "cards": cards }],
                "cards": []
            }]
        })
    }

    #[test]
    fn accepts_nested_cards_of_every_family() {
        let config = dashboard(json!([
            { "type": "heading", "heading": "Living room", "heading_style": "title" },
            { "type": "tile", "entity": "light.sofa", "features_position": "bottom" },
            { "type": "entities", "entities": ["sensor.a", { "entity": "sensor.b", "secondary_info": "last-changed" }] },
            { "type": "custom:mushroom-light-card", "entity": "light.sofa",
              "tap_action": { "action": "perform-action", "perform_action": "light.toggle",
                              "target": { "entity_id": "light.sofa" } } },
            { "type": "grid", "cards": [
                { "type": "vertical-stack", "cards": [
                    { "type": "custom:webrtc-camera", "url": "rtsp://cam" }
                ] }
            ] },
            { "type": "custom:apexcharts-card", "chart_type": "radialBar",
              "series": [{ "entity": "sensor.power", "name": "Power", "type": "line" }],
              "plotOptions": { "radialBar": { "startAngle": -90 } } }
        ]));

        let parsed = validate_dashboard_config(&config).unwrap();
        let cards = &parsed.views[0].sections[0].cards;
        assert_eq!(cards.len(), 6);
        assert!(matches!(cards[0], LovelaceCard::Heading(_)));
        match &cards[4] {
            LovelaceCard::Grid(grid) => {
                assert!(matches!(grid.cards[0], LovelaceCard::VerticalStack(_)));
            }
            other => panic!("expected grid, got {other:?}"),
        }
        assert_eq!(parsed.views[0].max_columns, Some(4));
    }

    #[test]
    fn rejects_unknown_card_type() {
        let config = dashboard(json!([{ "type": "picture-glance", "entity": "camera.door" }]));
        let err = validate_dashboard_config(&config).unwrap_err();
        assert!(err.to_string().starts_with("Invalid dashboard config"));
    }

    #[test]
    fn rejects_missing_required_card_field() {
        let config = dashboard(json!([{ "type": "tile" }]));
        assert!(validate_dashboard_config(&config).is_err());
    }

    #[test]
    fn rejects_bad_enum_value() {
        let config = dashboard(json!([
            { "type": "heading", "heading": "x", "heading_style": "banner" }
        ]));
        assert!(validate_dashboard_config(&config).is_err());
    }

    #[test]
    fn card_serializes_with_its_type_tag() {
        let card = LovelaceCard::WebRtcCamera(WebRtcCameraCard { url: "rtsp://cam".into() });
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value, json!({ "type": "custom:webrtc-camera", "url": "rtsp://cam" }));
    }

    #[test]
    fn url_path_rules() {
        assert!(validate_url_path("energy-view").is_ok());
        assert!(validate_url_path("my_dash-2").is_ok());
        assert!(validate_url_path("nodash").is_err());
        assert!(validate_url_path("has space-x").is_err());
        assert!(validate_url_path("slash/x-y").is_err());
    }
}
