//! Connection setup and idempotent schema creation.
//!
//! Per spec.md §6, database migration tooling is an external collaborator —
//! but the crate still needs *some* way to bring its own tables into
//! existence for development and tests, the same way the teacher's
//! `DatabaseService::new` issues `CREATE TABLE IF NOT EXISTS` at startup.

use crate::infra::config;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect() -> anyhow::Result<PgPool> {
    let database_url = config::database_connection_string()?;
    let pool = PgPoolOptions::new().max_connections(10).connect(&database_url).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Creates the logical schema from spec.md §6 if it doesn't already exist.
pub async fn create_schema(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS context_features (
            name TEXT PRIMARY KEY,
            index INT NOT NULL UNIQUE
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS settings (
            name TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            default_value JSONB,
            version_major INT NOT NULL,
            version_minor INT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS setting_aliases (
            alias TEXT PRIMARY KEY,
            setting TEXT NOT NULL REFERENCES settings(name) ON UPDATE CASCADE ON DELETE CASCADE
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS setting_configurable_features (
            setting TEXT NOT NULL REFERENCES settings(name) ON UPDATE CASCADE ON DELETE CASCADE,
            feature TEXT NOT NULL REFERENCES context_features(name),
            PRIMARY KEY (setting, feature)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS setting_metadata (
            setting TEXT NOT NULL REFERENCES settings(name) ON UPDATE CASCADE ON DELETE CASCADE,
            key TEXT NOT NULL,
            value JSONB NOT NULL,
            PRIMARY KEY (setting, key)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rules (
            id UUID PRIMARY KEY,
            setting TEXT NOT NULL REFERENCES settings(name) ON UPDATE CASCADE ON DELETE CASCADE,
            value JSONB NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rule_conditions (
            rule_id UUID NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
            feature TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (rule_id, feature)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS rule_metadata (
            rule_id UUID NOT NULL REFERENCES rules(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value JSONB NOT NULL,
            PRIMARY KEY (rule_id, key)
        )",
    )
    .execute(pool)
    .await?;

    // Monotonic generation counters used to derive the query engine's ETag.
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS state_stamps (
            name TEXT PRIMARY KEY,
            value BIGINT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "INSERT INTO state_stamps (name, value) VALUES ('settings', 0), ('rules', 0)
         ON CONFLICT (name) DO NOTHING",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Bumps a generation counter inside the caller's transaction. Every write
/// path that can change what a query response contains calls this for the
/// relevant stamp (`"settings"` or `"rules"`) as part of its transaction.
pub async fn bump_stamp(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, stamp: &str) -> anyhow::Result<()> {
    sqlx::query("UPDATE state_stamps SET value = value + 1 WHERE name = $1")
        .bind(stamp)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn read_stamp(pool: &PgPool, stamp: &str) -> anyhow::Result<String> {
    let value: i64 = sqlx::query_scalar("SELECT value FROM state_stamps WHERE name = $1")
        .bind(stamp)
        .fetch_one(pool)
        .await?;
    Ok(value.to_string())
}

const MAX_RETRIES: u32 = 3;

/// `true` for the two Postgres SQLSTATEs spec.md §5 calls out as retryable:
/// `40001` (serialization_failure) and `40P01` (deadlock_detected).
fn is_retryable<E: std::fmt::Display>(err: &E) -> bool {
    let message = err.to_string();
    message.contains("40001") || message.contains("40P01")
}

/// Retries a transactional operation up to [`MAX_RETRIES`] times when it
/// fails with a serialization failure or deadlock, per spec.md §5's
/// "serializable transaction with retry on serialization failure". Callers
/// pass a closure that opens its own transaction and commits it, since a
/// failed attempt's transaction cannot be reused. Generic over the caller's
/// own error type so a non-retryable error (e.g. a genuine uniqueness
/// conflict) surfaces unchanged rather than collapsing into `anyhow::Error`.
pub async fn retry_on_serialization_failure<F, Fut, T, E>(mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < MAX_RETRIES && is_retryable(&err) => {
                attempt += 1;
                tracing::warn!(attempt, error = %err, "retrying after serialization failure");
            }
            Err(err) => return Err(err),
        }
    }
}
