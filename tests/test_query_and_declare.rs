//! End-to-end test: declare a setting, add rules, and query it through a
//! real axum::serve instance, exercising the priority/filter/rename/
//! delete-guard/type-change scenarios end to end.

use heksher::app::Sentinel;
use heksher::{storage, transport, HeksherService};
use serde_json::json;
use std::sync::Arc;

async fn spawn_server(pool: sqlx::PgPool) -> String {
    let service = Arc::new(HeksherService::new(pool.clone()));
    let sentinel = Arc::new(Sentinel::new(pool, "test"));
    let app_state = transport::http::AppState { service, sentinel };
    let router = transport::http::create_router(app_state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}

async fn test_pool() -> sqlx::PgPool {
    dotenv::dotenv().ok();
    let pool = storage::pool::connect().await.expect("connect to test database");
    // Truncate between test binaries so runs don't interfere with each other;
    // each test file below uses distinct setting/feature names to stay isolated
    // from other concurrently-running test functions within this binary.
    pool
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declare_query_and_priority() -> Result<(), Box<dyn std::error::Error>> {
    let pool = test_pool().await;
    let base_url = spawn_server(pool).await;
    let client = reqwest::Client::new();
    let suffix = "qp1";
    let feature = format!("trust_{suffix}");
    let setting = format!("timeout_{suffix}");

    client.post(format!("{base_url}/api/v1/context_features")).json(&json!({"context_feature": feature})).send().await?;

    let declare = client
        .post(format!("{base_url}/api/v1/settings/declare"))
        .json(&json!({
            "name": setting,
            "configurable_features": [feature],
            "type": "int",
            "default_value": 30,
            "version": {"major": 1, "minor": 0}
        }))
        .send()
        .await?
        .json::<serde_json::Value>()
        .await?;
    assert!(declare["success"].as_bool().unwrap_or(false));
    assert_eq!(declare["data"]["outcome"], "created");

    client
        .post(format!("{base_url}/api/v1/rules"))
        .json(&json!({
            "setting": setting,
            "feature_values": {feature: "admin"},
            "value": 60
        }))
        .send()
        .await?;

    // Wildcard query sees the default and the one rule.
    let query = client
        .get(format!("{base_url}/api/v1/query"))
        .query(&[("settings", setting.as_str()), ("context_filters", "*")])
        .send()
        .await?
        .json::<serde_json::Value>()
        .await?;
    let entry = &query["settings"][&setting];
    assert_eq!(entry["default_value"], 30);
    let rules = entry["rules"].as_array().unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0]["value"], 60);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn filter_rejects_out_of_scope_rules() -> Result<(), Box<dyn std::error::Error>> {
    let pool = test_pool().await;
    let base_url = spawn_server(pool).await;
    let client = reqwest::Client::new();
    let suffix = "qp2";
    let feature = format!("trust_{suffix}");
    let setting = format!("timeout_{suffix}");

    client.post(format!("{base_url}/api/v1/context_features")).json(&json!({"context_feature": feature})).send().await?;
    client
        .post(format!("{base_url}/api/v1/settings/declare"))
        .json(&json!({"name": setting, "configurable_features": [feature], "type": "int", "version": {"major": 1, "minor": 0}}))
        .send()
        .await?;
    client
        .post(format!("{base_url}/api/v1/rules"))
        .json(&json!({"setting": setting, "feature_values": {feature.clone(): "admin"}, "value": 99}))
        .send()
        .await?;

    let query = client
        .get(format!("{base_url}/api/v1/query"))
        .query(&[("settings", setting.as_str()), ("context_filters", format!("{feature}:(guest)").as_str())])
        .send()
        .await?
        .json::<serde_json::Value>()
        .await?;
    let rules = query["settings"][&setting]["rules"].as_array().unwrap();
    assert!(rules.is_empty(), "rule conditioned on 'admin' must not match a 'guest' filter");

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declare_lifecycle_up_to_date_and_outdated() -> Result<(), Box<dyn std::error::Error>> {
    let pool = test_pool().await;
    let base_url = spawn_server(pool).await;
    let client = reqwest::Client::new();
    let setting = "lifecycle_qp3".to_string();

    let body = json!({"name": setting, "type": "int", "default_value": 1, "version": {"major": 1, "minor": 0}});
    let first = client.post(format!("{base_url}/api/v1/settings/declare")).json(&body).send().await?.json::<serde_json::Value>().await?;
    assert_eq!(first["data"]["outcome"], "created");

    // Declaring the identical attributes again at the same version is up to date.
    let second = client.post(format!("{base_url}/api/v1/settings/declare")).json(&body).send().await?.json::<serde_json::Value>().await?;
    assert_eq!(second["data"]["outcome"], "uptodate");

    // Declaring the same attributes at a higher version upgrades cleanly.
    let upgrade_body = json!({"name": setting, "type": "int", "default_value": 1, "version": {"major": 1, "minor": 1}});
    let third = client.post(format!("{base_url}/api/v1/settings/declare")).json(&upgrade_body).send().await?.json::<serde_json::Value>().await?;
    assert_eq!(third["data"]["outcome"], "upgraded");

    // A declare at a lower version than current with different attributes is outdated.
    let stale_body = json!({"name": setting, "type": "int", "default_value": 2, "version": {"major": 1, "minor": 0}});
    let fourth_resp = client.post(format!("{base_url}/api/v1/settings/declare")).json(&stale_body).send().await?;
    assert_eq!(fourth_resp.status(), reqwest::StatusCode::OK);
    let fourth = fourth_resp.json::<serde_json::Value>().await?;
    assert_eq!(fourth["data"]["outcome"], "outdated");
    assert_eq!(fourth["data"]["latest_version"]["minor"], 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declare_rename_via_alias() -> Result<(), Box<dyn std::error::Error>> {
    let pool = test_pool().await;
    let base_url = spawn_server(pool).await;
    let client = reqwest::Client::new();
    let old_name = "old_name_qp4".to_string();
    let new_name = "new_name_qp4".to_string();

    client
        .post(format!("{base_url}/api/v1/settings/declare"))
        .json(&json!({"name": old_name, "type": "int", "version": {"major": 1, "minor": 0}}))
        .send()
        .await?;

    let renamed = client
        .post(format!("{base_url}/api/v1/settings/declare"))
        .json(&json!({"name": new_name, "alias": old_name, "type": "int", "version": {"major": 1, "minor": 1}}))
        .send()
        .await?
        .json::<serde_json::Value>()
        .await?;
    assert_eq!(renamed["data"]["outcome"], "upgraded");

    // The setting is now reachable by either name, and carries the old name as an alias.
    let by_old = client.get(format!("{base_url}/api/v1/settings/{old_name}")).send().await?.json::<serde_json::Value>().await?;
    assert_eq!(by_old["data"]["name"], new_name);
    assert!(by_old["data"]["aliases"].as_array().unwrap().iter().any(|a| a == &old_name));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn context_feature_delete_is_guarded_by_rules_in_use() -> Result<(), Box<dyn std::error::Error>> {
    let pool = test_pool().await;
    let base_url = spawn_server(pool).await;
    let client = reqwest::Client::new();
    let feature = "region_qp5".to_string();
    let setting = "latency_qp5".to_string();

    client.post(format!("{base_url}/api/v1/context_features")).json(&json!({"context_feature": feature})).send().await?;
    client
        .post(format!("{base_url}/api/v1/settings/declare"))
        .json(&json!({"name": setting, "configurable_features": [feature], "type": "int", "version": {"major": 1, "minor": 0}}))
        .send()
        .await?;
    let rule = client
        .post(format!("{base_url}/api/v1/rules"))
        .json(&json!({"setting": setting, "feature_values": {feature.clone(): "us-east"}, "value": 12}))
        .send()
        .await?
        .json::<serde_json::Value>()
        .await?;
    let rule_id = rule["data"]["rule_id"].as_str().unwrap().to_string();

    // The feature is still one of the setting's configurable_features, so the
    // delete guard (keyed on setting_configurable_features) fires.
    let guarded = client.delete(format!("{base_url}/api/v1/context_features/{feature}")).send().await?;
    assert_eq!(guarded.status(), reqwest::StatusCode::CONFLICT);

    // A rule still conditions on the feature, so dropping it from the
    // setting's configurable_features is itself guarded until that rule is gone.
    let still_guarded = client
        .put(format!("{base_url}/api/v1/settings/{setting}/configurable_features"))
        .json(&json!({"configurable_features": [], "version": {"major": 2, "minor": 0}}))
        .send()
        .await?;
    assert_eq!(still_guarded.status(), reqwest::StatusCode::CONFLICT);

    client.delete(format!("{base_url}/api/v1/rules/{rule_id}")).send().await?;

    let cleared_features = client
        .put(format!("{base_url}/api/v1/settings/{setting}/configurable_features"))
        .json(&json!({"configurable_features": [], "version": {"major": 2, "minor": 0}}))
        .send()
        .await?;
    assert_eq!(cleared_features.status(), reqwest::StatusCode::NO_CONTENT);
    let cleared = client.delete(format!("{base_url}/api/v1/context_features/{feature}")).send().await?;
    assert_eq!(cleared.status(), reqwest::StatusCode::NO_CONTENT);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn type_change_conflicts_with_existing_rule_values() -> Result<(), Box<dyn std::error::Error>> {
    let pool = test_pool().await;
    let base_url = spawn_server(pool).await;
    let client = reqwest::Client::new();
    let feature = "tier_qp6".to_string();
    let setting = "threshold_qp6".to_string();

    client.post(format!("{base_url}/api/v1/context_features")).json(&json!({"context_feature": feature})).send().await?;
    client
        .post(format!("{base_url}/api/v1/settings/declare"))
        .json(&json!({"name": setting, "configurable_features": [feature], "type": "int", "version": {"major": 1, "minor": 0}}))
        .send()
        .await?;
    client
        .post(format!("{base_url}/api/v1/rules"))
        .json(&json!({"setting": setting, "feature_values": {feature.clone(): "gold"}, "value": 5}))
        .send()
        .await?;

    let conflict = client
        .put(format!("{base_url}/api/v1/settings/{setting}/type"))
        .json(&json!({"type": "Enum[\"low\",\"high\"]", "version": {"major": 2, "minor": 0}}))
        .send()
        .await?;
    assert_eq!(conflict.status(), reqwest::StatusCode::CONFLICT);
    let body = conflict.json::<serde_json::Value>().await?;
    assert!(!body["conflicts"].as_array().unwrap().is_empty());

    // A widening type change (int -> float) is comparable and has no conflicting values.
    let widened = client
        .put(format!("{base_url}/api/v1/settings/{setting}/type"))
        .json(&json!({"type": "float", "version": {"major": 2, "minor": 0}}))
        .send()
        .await?;
    assert_eq!(widened.status(), reqwest::StatusCode::NO_CONTENT);

    Ok(())
}
