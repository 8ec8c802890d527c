//! Maps `ServiceError`/validation failures onto the taxonomy from spec.md
//! §7: not-found -> 404, conflict -> 409, validation -> 422, fatal -> 500.

use crate::app::ServiceError;
use crate::transport::http::types::ApiResponse;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Fatal(String),
    /// Only api endpoints other than docs/health hit this, and only in
    /// `DOC_ONLY` mode.
    #[error("this server is running in DOC_ONLY mode")]
    DocOnly,
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(m) => ApiError::NotFound(m),
            ServiceError::Conflict(m) => ApiError::Conflict(m),
            ServiceError::Validation(m) => ApiError::Validation(m),
            ServiceError::Fatal(e) => {
                tracing::error!(error = %e, "fatal service error");
                ApiError::Fatal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::Validation(m) => (StatusCode::UNPROCESSABLE_ENTITY, m.clone()),
            ApiError::Fatal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
            ApiError::DocOnly => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };
        (status, Json(ApiResponse::err(message))).into_response()
    }
}

pub fn json_422(err: JsonRejection) -> (StatusCode, Json<ApiResponse>) {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(ApiResponse::err(format!("invalid JSON body: {}", err))))
}
