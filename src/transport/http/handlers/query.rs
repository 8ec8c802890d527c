//! `GET /api/v1/query` and its deprecated `POST /api/v1/rules/query` alias.

use crate::domain::query::{ContextFilter, FeatureFilter};
use crate::transport::http::error::ApiError;
use crate::transport::http::types::{AppState, LegacyQueryRequest, QueryParams, QueryResponse, QueryRuleDto, QuerySettingDto};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use std::collections::{HashMap, HashSet};

/// Parses the `context_filters` query parameter per spec.md §4.5:
/// `*` for the wildcard, or `feature:(v1,v2),feature2:*` pairs.
fn parse_context_filters(raw: &str) -> Result<ContextFilter, ApiError> {
    let trimmed = raw.trim();
    if trimmed == "*" {
        return Ok(ContextFilter::All);
    }
    let mut map = HashMap::new();
    for pair in split_top_level(trimmed) {
        let (feature, spec) = pair
            .split_once(':')
            .ok_or_else(|| ApiError::Validation(format!("malformed context_filters entry '{}'", pair)))?;
        let feature = feature.trim().to_string();
        let spec = spec.trim();
        let filter = if spec == "*" {
            FeatureFilter::Any
        } else {
            let inner = spec
                .strip_prefix('(')
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| ApiError::Validation(format!("malformed context_filters value list '{}'", spec)))?;
            let values: HashSet<String> = inner.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect();
            FeatureFilter::Values(values)
        };
        map.insert(feature, filter);
    }
    Ok(ContextFilter::Features(map))
}

/// Splits on top-level commas only, i.e. not commas nested inside `(...)`.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = s[start..].trim();
    if !last.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_settings(raw: &str) -> Vec<String> {
    raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

#[utoipa::path(
    get,
    path = "/api/v1/query",
    params(
        ("settings" = Option<String>, Query, description = "comma-separated setting names/aliases"),
        ("context_filters" = Option<String>, Query, description = "'*' or 'feature:(v1,v2),...'"),
        ("include_metadata" = Option<bool>, Query,),
    ),
    responses(
        (status = 200, description = "Query result", body = QueryResponse),
        (status = 304, description = "ETag matches If-None-Match"),
    )
)]
pub async fn query_handler(State(state): State<AppState>, headers: HeaderMap, Query(params): Query<QueryParams>) -> Result<Response, ApiError> {
    let setting_names = params.settings.as_deref().map(parse_settings).unwrap_or_default();
    let filter = match &params.context_filters {
        Some(raw) => parse_context_filters(raw)?,
        None => ContextFilter::All,
    };
    let include_metadata = params.include_metadata.unwrap_or(false);

    let (etag, body) = run_query(&state, &setting_names, &filter, include_metadata).await?;

    if let Some(if_none_match) = headers.get(axum::http::header::IF_NONE_MATCH) {
        if if_none_match.to_str().ok() == Some(etag.as_str()) {
            return Ok(StatusCode::NOT_MODIFIED.into_response());
        }
    }

    let etag_header = HeaderValue::from_str(&etag).map_err(|e| ApiError::Fatal(e.to_string()))?;
    let mut response = (StatusCode::OK, Json(body)).into_response();
    response.headers_mut().insert(axum::http::header::ETAG, etag_header);
    Ok(response)
}

async fn run_query(
    state: &AppState,
    setting_names: &[String],
    filter: &ContextFilter,
    include_metadata: bool,
) -> Result<(String, QueryResponse), ApiError> {
    let result = state.service.query(setting_names, filter, include_metadata).await?;
    let body = QueryResponse {
        settings: result
            .settings
            .into_iter()
            .map(|(name, setting)| {
                (
                    name,
                    QuerySettingDto {
                        rules: setting
                            .rules
                            .into_iter()
                            .map(|r| QueryRuleDto {
                                value: r.value,
                                feature_values: r.feature_values.into_iter().map(|(f, v)| vec![f, v]).collect(),
                                metadata: r.metadata,
                            })
                            .collect(),
                        default_value: setting.default_value,
                    },
                )
            })
            .collect(),
    };
    Ok((result.etag, body))
}

/// Deprecated body-based compatibility wrapper kept per spec.md §9's legacy
/// endpoint surface: a `cache_time` in the future is rejected per §7's
/// "malformed input" class rather than silently accepted.
#[utoipa::path(
    post,
    path = "/api/v1/rules/query",
    request_body = LegacyQueryRequest,
    responses(
        (status = 200, description = "deprecated, use GET /api/v1/query", body = QueryResponse),
        (status = 422, description = "cache_time is in the future")
    )
)]
pub async fn legacy_query_handler(State(state): State<AppState>, Json(body): Json<LegacyQueryRequest>) -> Result<Response, ApiError> {
    if let Some(cache_time) = body.cache_time {
        if cache_time > Utc::now() {
            return Err(ApiError::Validation("cache_time must not be in the future".to_string()));
        }
    }
    let filter = match &body.context_filters {
        Some(raw) => parse_context_filters(raw)?,
        None => ContextFilter::All,
    };
    let settings = body.settings.unwrap_or_default();
    let include_metadata = body.include_metadata.unwrap_or(false);

    let (_etag, response_body) = run_query(&state, &settings, &filter, include_metadata).await?;
    let mut response = (StatusCode::OK, Json(response_body)).into_response();
    response.headers_mut().insert("Deprecated", HeaderValue::from_static("true"));
    Ok(response)
}
