use crate::transport::http::error::ApiError;
use crate::transport::http::types::{AddContextFeatureRequest, ApiResponse, AppState, MoveContextFeatureRequest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[utoipa::path(
    get,
    path = "/api/v1/context_features",
    responses((status = 200, description = "Ordered list of context feature names", body = ApiResponse))
)]
pub async fn list_handler(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let features = state.service.list_context_features().await?;
    Ok(Json(ApiResponse::ok(serde_json::json!(features))))
}

#[utoipa::path(
    post,
    path = "/api/v1/context_features",
    request_body = AddContextFeatureRequest,
    responses(
        (status = 204, description = "Created"),
        (status = 409, description = "Already exists")
    )
)]
pub async fn add_handler(State(state): State<AppState>, Json(req): Json<AddContextFeatureRequest>) -> Result<impl IntoResponse, ApiError> {
    state.service.add_context_feature(&req.context_feature).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/context_features/{feature}",
    responses(
        (status = 200, description = "Feature exists", body = ApiResponse),
        (status = 404, description = "Unknown feature")
    )
)]
pub async fn get_handler(State(state): State<AppState>, Path(feature): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let index = state
        .service
        .context_features
        .get_index(&feature)
        .await
        .map_err(crate::app::ServiceError::from)?
        .ok_or_else(|| ApiError::NotFound(format!("context feature '{}'", feature)))?;
    Ok(Json(ApiResponse::ok(serde_json::json!({ "name": feature, "index": index }))))
}

#[utoipa::path(
    delete,
    path = "/api/v1/context_features/{feature}",
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Unknown feature"),
        (status = 409, description = "Still referenced by a setting")
    )
)]
pub async fn delete_handler(State(state): State<AppState>, Path(feature): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_context_feature(&feature).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    patch,
    path = "/api/v1/context_features/{feature}/index",
    request_body = MoveContextFeatureRequest,
    responses(
        (status = 204, description = "Reordered"),
        (status = 404, description = "Unknown feature or pivot")
    )
)]
pub async fn move_handler(
    State(state): State<AppState>,
    Path(feature): Path<String>,
    Json(req): Json<MoveContextFeatureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.move_context_feature(&feature, req.to_before.as_deref(), req.to_after.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}
