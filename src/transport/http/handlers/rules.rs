use crate::storage::metadata::{is_valid_metadata_key, RULE_METADATA};
use crate::transport::http::error::ApiError;
use crate::transport::http::types::{
    ApiResponse, AppState, CreateRuleRequest, CreateRuleResponse, MetadataPutRequest, RuleResponse, SetRuleValueRequest,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

fn to_response(rule: crate::domain::rules::Rule) -> RuleResponse {
    RuleResponse {
        rule_id: rule.id,
        setting: rule.setting,
        feature_values: rule.feature_values,
        value: rule.value,
        metadata: rule.metadata,
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, body = CreateRuleResponse),
        (status = 422, description = "unknown feature, value does not conform to setting type")
    )
)]
pub async fn create_handler(State(state): State<AppState>, Json(body): Json<CreateRuleRequest>) -> Result<impl IntoResponse, ApiError> {
    let rule_id = state.service.create_rule(&body.setting, body.feature_values, body.value, body.metadata).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(serde_json::to_value(CreateRuleResponse { rule_id }).unwrap_or_default()))))
}

#[utoipa::path(
    get,
    path = "/api/v1/rules/{id}",
    responses((status = 200, body = RuleResponse), (status = 404, description = "unknown rule"))
)]
pub async fn get_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    let rule = state.service.get_rule(id).await?;
    Ok(Json(ApiResponse::ok(serde_json::to_value(to_response(rule)).unwrap_or_default())))
}

#[utoipa::path(
    delete,
    path = "/api/v1/rules/{id}",
    responses((status = 204, description = "deleted"), (status = 404, description = "unknown rule"))
)]
pub async fn delete_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_rule(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/rules/{id}/value",
    request_body = SetRuleValueRequest,
    responses((status = 204, description = "updated"), (status = 422, description = "value does not conform to setting type"))
)]
pub async fn set_value_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetRuleValueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.set_rule_value(id, body.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deprecated alias for [`set_value_handler`], kept for clients still on the
/// pre-`/value` sub-resource shape.
#[utoipa::path(
    patch,
    path = "/api/v1/rules/{id}",
    request_body = SetRuleValueRequest,
    responses((status = 204, description = "updated (deprecated, use PUT .../value)"))
)]
pub async fn patch_handler(
    state: State<AppState>,
    id: Path<Uuid>,
    body: Json<SetRuleValueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    set_value_handler(state, id, body).await
}

#[derive(Deserialize)]
pub struct SearchQuery {
    pub setting: String,
    #[serde(default)]
    pub feature_values: Option<String>,
}

fn parse_feature_values(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[utoipa::path(
    get,
    path = "/api/v1/rules/search",
    params(
        ("setting" = String, Query,),
        ("feature_values" = Option<String>, Query, description = "feature:value,feature:value pairs"),
    ),
    responses((status = 200, body = RuleResponse), (status = 404, description = "no matching rule"))
)]
pub async fn search_handler(State(state): State<AppState>, Query(q): Query<SearchQuery>) -> Result<impl IntoResponse, ApiError> {
    let feature_values = q.feature_values.as_deref().map(parse_feature_values).unwrap_or_default();
    let rule = state.service.search_rule(&q.setting, &feature_values).await?;
    Ok(Json(ApiResponse::ok(serde_json::to_value(to_response(rule)).unwrap_or_default())))
}

// ---- rule metadata -------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/rules/{id}/metadata",
    responses((status = 200, body = ApiResponse))
)]
pub async fn get_metadata_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    let metadata = RULE_METADATA.get_all(state.service.pool(), &id.to_string()).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(Json(ApiResponse::ok(serde_json::to_value(as_btree_values(metadata)).unwrap_or_default())))
}

fn as_btree_values(m: HashMap<String, JsonValue>) -> std::collections::BTreeMap<String, JsonValue> {
    m.into_iter().collect()
}

#[utoipa::path(
    get,
    path = "/api/v1/rules/{id}/metadata/{key}",
    responses((status = 200, body = ApiResponse), (status = 404, description = "unknown key"))
)]
pub async fn get_metadata_key_handler(
    State(state): State<AppState>,
    Path((id, key)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let value = RULE_METADATA.get_key(state.service.pool(), &id.to_string(), &key).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    match value {
        Some(v) => Ok(Json(ApiResponse::ok(v))),
        None => Err(ApiError::NotFound(format!("metadata key '{}'", key))),
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/rules/{id}/metadata/{key}",
    request_body = serde_json::Value,
    responses((status = 204, description = "set"), (status = 422, description = "invalid key"))
)]
pub async fn put_metadata_key_handler(
    State(state): State<AppState>,
    Path((id, key)): Path<(Uuid, String)>,
    Json(value): Json<JsonValue>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_metadata_key(&key) {
        return Err(ApiError::Validation(format!("invalid metadata key '{}'", key)));
    }
    state.service.get_rule(id).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    RULE_METADATA.put_key_tx(&mut tx, &id.to_string(), &key, &value).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/rules/{id}/metadata",
    request_body = MetadataPutRequest,
    responses((status = 204, description = "merged"))
)]
pub async fn merge_metadata_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<MetadataPutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for key in body.entries.keys() {
        if !is_valid_metadata_key(key) {
            return Err(ApiError::Validation(format!("invalid metadata key '{}'", key)));
        }
    }
    state.service.get_rule(id).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    RULE_METADATA.merge(&mut tx, &id.to_string(), &body.entries).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/rules/{id}/metadata",
    request_body = MetadataPutRequest,
    responses((status = 204, description = "replaced"))
)]
pub async fn replace_metadata_handler(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<MetadataPutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for key in body.entries.keys() {
        if !is_valid_metadata_key(key) {
            return Err(ApiError::Validation(format!("invalid metadata key '{}'", key)));
        }
    }
    state.service.get_rule(id).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    RULE_METADATA.replace(&mut tx, &id.to_string(), &body.entries).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/rules/{id}/metadata",
    responses((status = 204, description = "cleared"))
)]
pub async fn clear_metadata_handler(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<impl IntoResponse, ApiError> {
    state.service.get_rule(id).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    RULE_METADATA.clear(&mut tx, &id.to_string()).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/rules/{id}/metadata/{key}",
    responses((status = 204, description = "deleted"))
)]
pub async fn delete_metadata_key_handler(
    State(state): State<AppState>,
    Path((id, key)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.get_rule(id).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    RULE_METADATA.delete_key(&mut tx, &id.to_string(), &key).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
