//! Centralized configuration (environment variables + defaults).

/// Postgres connection string (required).
pub fn database_connection_string() -> anyhow::Result<String> {
    std::env::var("HEKSHER_DB_CONNECTION_STRING")
        .map_err(|_| anyhow::anyhow!("HEKSHER_DB_CONNECTION_STRING must be set"))
}

/// The ordered context-feature list to reconcile against the registry at
/// startup, semicolon-delimited (e.g. `"account;user;theme"`). Empty if
/// unset — an empty startup list never deletes features that already exist.
pub fn startup_context_features() -> Vec<String> {
    std::env::var("HEKSHER_STARTUP_CONTEXT_FEATURES")
        .ok()
        .map(|raw| raw.split(';').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// When `true`, the server serves only `/docs` and `/api/health` without
/// ever connecting to the database — used to publish the OpenAPI schema in
/// CI without a live Postgres instance.
pub fn doc_only() -> bool {
    std::env::var("DOC_ONLY").map(|v| v == "true" || v == "1").unwrap_or(false)
}

pub fn log_level() -> String {
    std::env::var("HEKSHER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string())
}

pub fn request_timeout_seconds() -> u64 {
    std::env::var("HEKSHER_REQUEST_TIMEOUT_SECONDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(30)
}

pub fn bind_addr() -> String {
    std::env::var("HEKSHER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
}
