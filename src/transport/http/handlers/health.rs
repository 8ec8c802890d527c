use crate::transport::http::types::{AppState, HealthResponse};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Sentinel's latest ping was ok", body = HealthResponse),
        (status = 500, description = "Sentinel's latest ping failed or none has landed yet")
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let version = state.sentinel.version().to_string();
    match state.sentinel.latest().await {
        Some(record) if record.status == crate::app::sentinel::HealthStatus::Ok => {
            (StatusCode::OK, Json(HealthResponse { version })).into_response()
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, Json(HealthResponse { version })).into_response(),
    }
}
