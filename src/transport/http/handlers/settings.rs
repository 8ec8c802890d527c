use crate::domain::settings::{AttributeDiff, DeclarationOutcome, DeclareRequest};
use crate::domain::type_algebra::TypeExpr;
use crate::storage::metadata::{is_valid_metadata_key, SETTING_METADATA};
use crate::transport::http::error::ApiError;
use crate::transport::http::types::{
    ApiResponse, AppState, ConflictResponse, DeclareSettingRequest, DeclareSettingResponse, DiffDto, MetadataPutRequest,
    SetConfigurableFeaturesRequest, SetNameRequest, SetTypeRequest, SettingResponse, VersionDto,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;

fn diff_dtos(diffs: Vec<AttributeDiff>) -> Vec<DiffDto> {
    diffs
        .into_iter()
        .map(|d| DiffDto { attribute: d.attribute, level: format!("{:?}", d.level).to_lowercase(), detail: d.detail })
        .collect()
}

fn outcome_response(outcome: DeclarationOutcome) -> Response {
    match outcome {
        DeclarationOutcome::Created | DeclarationOutcome::UpToDate | DeclarationOutcome::Upgraded => {
            let body = DeclareSettingResponse { outcome: outcome_tag(&outcome), latest_version: None, diffs: Vec::new() };
            (StatusCode::OK, Json(ApiResponse::ok(serde_json::to_value(body).unwrap_or_default()))).into_response()
        }
        DeclarationOutcome::Outdated { latest_version, diffs } => {
            let body = DeclareSettingResponse {
                outcome: "outdated".to_string(),
                latest_version: Some(VersionDto::from(latest_version)),
                diffs: diff_dtos(diffs),
            };
            (StatusCode::OK, Json(ApiResponse::ok(serde_json::to_value(body).unwrap_or_default()))).into_response()
        }
        DeclarationOutcome::Rejected { diffs } => {
            let body = DeclareSettingResponse { outcome: "rejected".to_string(), latest_version: None, diffs: diff_dtos(diffs) };
            (StatusCode::CONFLICT, Json(ApiResponse::ok(serde_json::to_value(body).unwrap_or_default()))).into_response()
        }
        DeclarationOutcome::Mismatch { diffs } => {
            let body = DeclareSettingResponse { outcome: "mismatch".to_string(), latest_version: None, diffs: diff_dtos(diffs) };
            (StatusCode::CONFLICT, Json(ApiResponse::ok(serde_json::to_value(body).unwrap_or_default()))).into_response()
        }
    }
}

fn outcome_tag(outcome: &DeclarationOutcome) -> String {
    outcome.tag().to_string()
}

#[utoipa::path(
    post,
    path = "/api/v1/settings/declare",
    request_body = DeclareSettingRequest,
    responses(
        (status = 200, description = "created/uptodate/upgraded/outdated", body = DeclareSettingResponse),
        (status = 409, description = "rejected/mismatch", body = DeclareSettingResponse),
        (status = 422, description = "malformed type expression or value")
    )
)]
pub async fn declare_handler(State(state): State<AppState>, Json(body): Json<DeclareSettingRequest>) -> Result<Response, ApiError> {
    let type_expr = TypeExpr::parse(&body.type_expr).map_err(|e| ApiError::Validation(e.to_string()))?;
    if let Some(default) = &body.default_value {
        if !type_expr.validate(default) {
            return Err(ApiError::Validation(format!("default_value does not conform to {}", type_expr.format())));
        }
    }
    let req = DeclareRequest {
        name: body.name,
        configurable_features: body.configurable_features,
        type_expr,
        default_value: body.default_value,
        metadata: body.metadata,
        alias: body.alias,
        version: body.version.into(),
    };
    let outcome = state.service.declare(req).await?;
    Ok(outcome_response(outcome))
}

fn to_response(s: crate::domain::settings::Setting) -> SettingResponse {
    SettingResponse {
        name: s.name,
        type_expr: s.type_expr.format(),
        default_value: s.default_value,
        configurable_features: s.configurable_features,
        metadata: s.metadata,
        aliases: s.aliases,
        version: VersionDto::from(s.version),
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/{name}",
    responses((status = 200, body = SettingResponse), (status = 404, description = "unknown setting"))
)]
pub async fn get_handler(State(state): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let setting = state.service.get_setting(&name).await?;
    Ok(Json(ApiResponse::ok(serde_json::to_value(to_response(setting)).unwrap_or_default())))
}

#[derive(Deserialize)]
pub struct ListSettingsQuery {
    #[serde(default)]
    pub include_additional_data: Option<bool>,
}

#[utoipa::path(
    get,
    path = "/api/v1/settings",
    params(("include_additional_data" = Option<bool>, Query,),),
    responses((status = 200, body = ApiResponse))
)]
pub async fn list_handler(State(state): State<AppState>, Query(q): Query<ListSettingsQuery>) -> Result<impl IntoResponse, ApiError> {
    let names = state.service.list_settings().await?;
    if q.include_additional_data.unwrap_or(false) {
        let mut out = Vec::with_capacity(names.len());
        for name in &names {
            out.push(to_response(state.service.get_setting(name).await?));
        }
        Ok(Json(ApiResponse::ok(serde_json::to_value(out).unwrap_or_default())))
    } else {
        Ok(Json(ApiResponse::ok(serde_json::json!(names))))
    }
}

#[utoipa::path(
    delete,
    path = "/api/v1/settings/{name}",
    responses((status = 204, description = "deleted"), (status = 404, description = "unknown setting"))
)]
pub async fn delete_handler(State(state): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_setting(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/{name}/type",
    request_body = SetTypeRequest,
    responses(
        (status = 204, description = "type changed"),
        (status = 409, description = "version too low or value conflicts", body = ConflictResponse)
    )
)]
pub async fn set_type_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SetTypeRequest>,
) -> Result<Response, ApiError> {
    let type_expr = TypeExpr::parse(&body.type_expr).map_err(|e| ApiError::Validation(e.to_string()))?;
    match state.service.set_type(&name, body.version.into(), type_expr).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(crate::app::ServiceError::Conflict(m)) => {
            let conflicts: Vec<String> = m.split("; ").map(str::to_string).collect();
            Ok((StatusCode::CONFLICT, Json(ConflictResponse { conflicts })).into_response())
        }
        Err(e) => Err(ApiError::from(e)),
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/{name}/name",
    request_body = SetNameRequest,
    responses((status = 204, description = "renamed"), (status = 409, description = "name collision"))
)]
pub async fn set_name_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SetNameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.rename_setting(&name, body.version.into(), &body.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/{name}/configurable_features",
    request_body = SetConfigurableFeaturesRequest,
    responses(
        (status = 204, description = "updated"),
        (status = 409, description = "feature still referenced by rules", body = ConflictResponse)
    )
)]
pub async fn set_configurable_features_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<SetConfigurableFeaturesRequest>,
) -> Result<Response, ApiError> {
    match state.service.set_configurable_features(&name, body.version.into(), body.configurable_features).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(crate::app::ServiceError::Conflict(m)) => {
            let conflicts: Vec<String> = m.split("; ").map(str::to_string).collect();
            Ok((StatusCode::CONFLICT, Json(ConflictResponse { conflicts })).into_response())
        }
        Err(e) => Err(ApiError::from(e)),
    }
}

// ---- setting metadata ---------------------------------------------------

async fn canonical_name(state: &AppState, name: &str) -> Result<String, ApiError> {
    Ok(state.service.get_setting(name).await?.name)
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/{name}/metadata",
    responses((status = 200, body = ApiResponse))
)]
pub async fn get_metadata_handler(State(state): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let canonical = canonical_name(&state, &name).await?;
    let metadata = SETTING_METADATA.get_all(state.service.pool(), &canonical).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(Json(ApiResponse::ok(serde_json::to_value(metadata).unwrap_or_default())))
}

#[utoipa::path(
    get,
    path = "/api/v1/settings/{name}/metadata/{key}",
    responses((status = 200, body = ApiResponse), (status = 404, description = "unknown key"))
)]
pub async fn get_metadata_key_handler(
    State(state): State<AppState>,
    Path((name, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let canonical = canonical_name(&state, &name).await?;
    let value: Option<JsonValue> =
        SETTING_METADATA.get_key(state.service.pool(), &canonical, &key).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    match value {
        Some(v) => Ok(Json(ApiResponse::ok(v))),
        None => Err(ApiError::NotFound(format!("metadata key '{}'", key))),
    }
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/{name}/metadata/{key}",
    request_body = serde_json::Value,
    responses((status = 204, description = "set"), (status = 422, description = "invalid key"))
)]
pub async fn put_metadata_key_handler(
    State(state): State<AppState>,
    Path((name, key)): Path<(String, String)>,
    Json(value): Json<JsonValue>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_metadata_key(&key) {
        return Err(ApiError::Validation(format!("invalid metadata key '{}'", key)));
    }
    let canonical = canonical_name(&state, &name).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    SETTING_METADATA.put_key_tx(&mut tx, &canonical, &key, &value).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/settings/{name}/metadata",
    request_body = MetadataPutRequest,
    responses((status = 204, description = "merged"))
)]
pub async fn merge_metadata_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<MetadataPutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for key in body.entries.keys() {
        if !is_valid_metadata_key(key) {
            return Err(ApiError::Validation(format!("invalid metadata key '{}'", key)));
        }
    }
    let canonical = canonical_name(&state, &name).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    SETTING_METADATA.merge(&mut tx, &canonical, &body.entries).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/api/v1/settings/{name}/metadata",
    request_body = MetadataPutRequest,
    responses((status = 204, description = "replaced"))
)]
pub async fn replace_metadata_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<MetadataPutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    for key in body.entries.keys() {
        if !is_valid_metadata_key(key) {
            return Err(ApiError::Validation(format!("invalid metadata key '{}'", key)));
        }
    }
    let canonical = canonical_name(&state, &name).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    SETTING_METADATA.replace(&mut tx, &canonical, &body.entries).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/settings/{name}/metadata",
    responses((status = 204, description = "cleared"))
)]
pub async fn clear_metadata_handler(State(state): State<AppState>, Path(name): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let canonical = canonical_name(&state, &name).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    SETTING_METADATA.clear(&mut tx, &canonical).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/settings/{name}/metadata/{key}",
    responses((status = 204, description = "deleted"))
)]
pub async fn delete_metadata_key_handler(
    State(state): State<AppState>,
    Path((name, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let canonical = canonical_name(&state, &name).await?;
    let mut tx = state.service.pool().begin().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    SETTING_METADATA.delete_key(&mut tx, &canonical, &key).await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    tx.commit().await.map_err(|e| ApiError::Fatal(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
