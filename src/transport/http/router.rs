use crate::transport::http::handlers::{context_features, health, query, rules, settings};
use crate::transport::http::types::{
    AddContextFeatureRequest, ApiResponse, ConflictResponse, CreateRuleRequest, CreateRuleResponse,
    DeclareSettingRequest, DeclareSettingResponse, DiffDto, HealthResponse, LegacyQueryRequest, MetadataPutRequest,
    MoveContextFeatureRequest, QueryResponse, QueryRuleDto, QuerySettingDto, RuleResponse, SetConfigurableFeaturesRequest,
    SetNameRequest, SetRuleValueRequest, SetTypeRequest, SettingResponse, VersionDto,
};
use axum::routing::{get, patch, post, put};
use axum::Router;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_handler,
        query::query_handler,
        query::legacy_query_handler,
        context_features::list_handler,
        context_features::add_handler,
        context_features::get_handler,
        context_features::delete_handler,
        context_features::move_handler,
        settings::declare_handler,
        settings::get_handler,
        settings::list_handler,
        settings::delete_handler,
        settings::set_type_handler,
        settings::set_name_handler,
        settings::set_configurable_features_handler,
        settings::get_metadata_handler,
        settings::get_metadata_key_handler,
        settings::put_metadata_key_handler,
        settings::merge_metadata_handler,
        settings::replace_metadata_handler,
        settings::clear_metadata_handler,
        settings::delete_metadata_key_handler,
        rules::create_handler,
        rules::get_handler,
        rules::delete_handler,
        rules::set_value_handler,
        rules::patch_handler,
        rules::search_handler,
        rules::get_metadata_handler,
        rules::get_metadata_key_handler,
        rules::put_metadata_key_handler,
        rules::merge_metadata_handler,
        rules::replace_metadata_handler,
        rules::clear_metadata_handler,
        rules::delete_metadata_key_handler,
    ),
    components(schemas(
        ApiResponse,
        HealthResponse,
        QueryResponse,
        QuerySettingDto,
        QueryRuleDto,
        LegacyQueryRequest,
        AddContextFeatureRequest,
        MoveContextFeatureRequest,
        DeclareSettingRequest,
        DeclareSettingResponse,
        DiffDto,
        SettingResponse,
        SetTypeRequest,
        SetNameRequest,
        SetConfigurableFeaturesRequest,
        ConflictResponse,
        VersionDto,
        CreateRuleRequest,
        CreateRuleResponse,
        RuleResponse,
        SetRuleValueRequest,
        MetadataPutRequest,
    ))
)]
#[allow(dead_code)]
pub struct ApiDoc;

pub fn create_router(app_state: crate::transport::http::types::AppState) -> Router {
    Router::new()
        .route("/api/health", get(health::health_handler))
        .route("/api/v1/query", get(query::query_handler))
        .route("/api/v1/rules/query", post(query::legacy_query_handler))
        .route(
            "/api/v1/context_features",
            get(context_features::list_handler).post(context_features::add_handler),
        )
        .route(
            "/api/v1/context_features/:feature",
            get(context_features::get_handler).delete(context_features::delete_handler),
        )
        .route("/api/v1/context_features/:feature/index", patch(context_features::move_handler))
        .route("/api/v1/settings/declare", post(settings::declare_handler))
        .route("/api/v1/settings", get(settings::list_handler))
        .route(
            "/api/v1/settings/:name",
            get(settings::get_handler).delete(settings::delete_handler),
        )
        .route("/api/v1/settings/:name/type", put(settings::set_type_handler))
        .route("/api/v1/settings/:name/name", put(settings::set_name_handler))
        .route(
            "/api/v1/settings/:name/configurable_features",
            put(settings::set_configurable_features_handler),
        )
        .route(
            "/api/v1/settings/:name/metadata",
            get(settings::get_metadata_handler)
                .post(settings::merge_metadata_handler)
                .put(settings::replace_metadata_handler)
                .delete(settings::clear_metadata_handler),
        )
        .route(
            "/api/v1/settings/:name/metadata/:key",
            get(settings::get_metadata_key_handler)
                .put(settings::put_metadata_key_handler)
                .delete(settings::delete_metadata_key_handler),
        )
        .route("/api/v1/rules", post(rules::create_handler))
        .route("/api/v1/rules/search", get(rules::search_handler))
        .route(
            "/api/v1/rules/:id",
            get(rules::get_handler).delete(rules::delete_handler).patch(rules::patch_handler),
        )
        .route("/api/v1/rules/:id/value", put(rules::set_value_handler))
        .route(
            "/api/v1/rules/:id/metadata",
            get(rules::get_metadata_handler)
                .post(rules::merge_metadata_handler)
                .put(rules::replace_metadata_handler)
                .delete(rules::clear_metadata_handler),
        )
        .route(
            "/api/v1/rules/:id/metadata/:key",
            get(rules::get_metadata_key_handler)
                .put(rules::put_metadata_key_handler)
                .delete(rules::delete_metadata_key_handler),
        )
        .with_state(app_state)
}
