use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use heksher::app::Sentinel;
use heksher::{infra::config, storage, transport, HeksherService};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower::timeout::TimeoutLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let log_level = config::log_level();
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::new(log_level)).init();

    if config::doc_only() {
        tracing::info!("DOC_ONLY=true: serving only /api/health and /docs, no database connection");
        let app = axum::Router::new()
            .route("/api/health", axum::routing::get(|| async { "ok (doc-only mode)" }))
            .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()))
            .fallback(doc_only_fallback);
        let bind_addr = config::bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
        tracing::info!(%bind_addr, "heksher listening (doc-only mode)");
        axum::serve(listener, app).await?;
        return Ok(());
    }

    tracing::info!("connecting to database");
    let pool = storage::pool::connect().await?;

    reconcile_startup_context_features(&pool).await?;

    let service = Arc::new(HeksherService::new(pool.clone()));
    let sentinel = Arc::new(Sentinel::new(pool.clone(), env!("CARGO_PKG_VERSION")));
    sentinel.clone().spawn();
    tracing::info!("sentinel background task started");

    let app_state = transport::http::AppState { service, sentinel: sentinel.clone() };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let timeout = Duration::from_secs(config::request_timeout_seconds());
    let deadline = ServiceBuilder::new().layer(HandleErrorLayer::new(handle_timeout)).layer(TimeoutLayer::new(timeout));
    let app = transport::http::create_router(app_state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", transport::http::ApiDoc::openapi()))
        .layer(cors)
        .layer(deadline);

    let bind_addr = config::bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "heksher listening");
    tracing::info!("swagger UI available at /docs");

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            sentinel.shutdown();
        }
    }

    Ok(())
}

/// Converts a [`TimeoutLayer`] timeout into spec.md §5's global per-request
/// deadline response; any other error bubbling up through the middleware
/// stack is reported as a fatal 500 instead of a raw panic.
async fn handle_timeout(err: tower::BoxError) -> (StatusCode, axum::Json<heksher::transport::http::types::ApiResponse>) {
    use heksher::transport::http::types::ApiResponse;
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, axum::Json(ApiResponse::err("request exceeded the configured deadline".to_string())))
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(ApiResponse::err(format!("unhandled error: {}", err))))
    }
}

/// Per spec.md §7: any api endpoint other than docs/health hit while running
/// in `DOC_ONLY` mode answers 500 rather than a plain 404, since the server
/// genuinely cannot serve it without a database connection.
async fn doc_only_fallback() -> transport::http::error::ApiError {
    transport::http::error::ApiError::DocOnly
}

/// Adds any context feature named in `HEKSHER_STARTUP_CONTEXT_FEATURES` that
/// the registry doesn't already have, in the order given. Per spec.md §4.7,
/// an empty or unset list never deletes features that already exist, and
/// features already present are left untouched (including their position).
async fn reconcile_startup_context_features(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let wanted = config::startup_context_features();
    if wanted.is_empty() {
        return Ok(());
    }
    let store = storage::ContextFeatureStore::new(pool.clone());
    let existing = store.list().await.map_err(|e| anyhow::anyhow!(e))?;
    for feature in &wanted {
        if existing.contains(feature) {
            continue;
        }
        match store.add(feature).await {
            Ok(()) => tracing::info!(%feature, "registered startup context feature"),
            Err(storage::ContextFeatureStoreError::Conflict(_)) => {}
            Err(e) => return Err(anyhow::anyhow!(e)),
        }
    }
    Ok(())
}
