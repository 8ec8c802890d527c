use crate::app::HeksherService;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<HeksherService>,
    pub sentinel: Arc<crate::app::Sentinel>,
}

/// The envelope every handler responds with, mirrored from the teacher's
/// `ApiResponse { success, data, error }` shape.
#[derive(Serialize, Debug, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `{major, minor}` wire representation of `domain::settings::Version`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, ToSchema)]
pub struct VersionDto {
    pub major: u32,
    pub minor: u32,
}

impl From<VersionDto> for (u32, u32) {
    fn from(v: VersionDto) -> Self {
        (v.major, v.minor)
    }
}

impl From<(u32, u32)> for VersionDto {
    fn from((major, minor): (u32, u32)) -> Self {
        VersionDto { major, minor }
    }
}

impl ApiResponse {
    pub fn ok(data: JsonValue) -> Self {
        ApiResponse { success: true, data: Some(data), error: None }
    }

    pub fn ok_empty() -> Self {
        ApiResponse { success: true, data: None, error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        ApiResponse { success: false, data: None, error: Some(message.into()) }
    }
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct DeclareSettingRequest {
    pub name: String,
    #[serde(default)]
    pub configurable_features: BTreeSet<String>,
    #[serde(rename = "type")]
    pub type_expr: String,
    #[serde(default)]
    pub default_value: Option<JsonValue>,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default = "default_version")]
    pub version: VersionDto,
}

fn default_version() -> VersionDto {
    VersionDto { major: 1, minor: 0 }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct DeclareSettingResponse {
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<VersionDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<DiffDto>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct DiffDto {
    pub attribute: String,
    pub level: String,
    pub detail: String,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct SettingResponse {
    pub name: String,
    #[serde(rename = "type")]
    pub type_expr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
    pub configurable_features: BTreeSet<String>,
    pub metadata: HashMap<String, JsonValue>,
    pub aliases: BTreeSet<String>,
    pub version: VersionDto,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SetTypeRequest {
    #[serde(rename = "type")]
    pub type_expr: String,
    pub version: VersionDto,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SetNameRequest {
    pub name: String,
    pub version: VersionDto,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SetConfigurableFeaturesRequest {
    pub configurable_features: BTreeSet<String>,
    pub version: VersionDto,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ConflictResponse {
    pub conflicts: Vec<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct AddContextFeatureRequest {
    pub context_feature: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct MoveContextFeatureRequest {
    #[serde(default)]
    pub to_before: Option<String>,
    #[serde(default)]
    pub to_after: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CreateRuleRequest {
    pub setting: String,
    pub feature_values: HashMap<String, String>,
    pub value: JsonValue,
    #[serde(default)]
    pub metadata: HashMap<String, JsonValue>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct CreateRuleResponse {
    pub rule_id: Uuid,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct RuleResponse {
    pub rule_id: Uuid,
    pub setting: String,
    pub feature_values: HashMap<String, String>,
    pub value: JsonValue,
    pub metadata: HashMap<String, JsonValue>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct SetRuleValueRequest {
    pub value: JsonValue,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RuleSearchQuery {
    pub setting: String,
    /// `feature:value,feature:value` pairs.
    pub feature_values: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct QueryParams {
    /// Comma-separated setting names/aliases; absent means all settings.
    #[serde(default)]
    pub settings: Option<String>,
    /// `*` for the wildcard, or `feature:(v1,v2),feature2:*` pairs.
    #[serde(default)]
    pub context_filters: Option<String>,
    #[serde(default)]
    pub include_metadata: Option<bool>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QueryRuleDto {
    pub value: JsonValue,
    /// `[[feature, value], ...]` ordered by the registry's current feature order.
    pub feature_values: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, JsonValue>>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QuerySettingDto {
    pub rules: Vec<QueryRuleDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<JsonValue>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct QueryResponse {
    pub settings: HashMap<String, QuerySettingDto>,
}

/// Body shape for the deprecated `POST /api/v1/rules/query` compatibility
/// endpoint (spec.md §9 legacy endpoint surface).
#[derive(Deserialize, Debug, ToSchema)]
pub struct LegacyQueryRequest {
    #[serde(default)]
    pub settings: Option<Vec<String>>,
    #[serde(default)]
    pub context_filters: Option<String>,
    #[serde(default)]
    pub include_metadata: Option<bool>,
    #[serde(default)]
    pub cache_time: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct HealthResponse {
    pub version: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct MetadataPutRequest {
    #[serde(flatten)]
    pub entries: HashMap<String, JsonValue>,
}
