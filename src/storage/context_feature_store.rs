//! Persistence for component C (the context-feature registry).

use crate::domain::context_features::{self, Pivot, ReorderError};
use crate::storage::pool;
use sqlx::{PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContextFeatureStoreError {
    #[error("context feature '{0}' already exists")]
    Conflict(String),
    #[error("context feature '{0}' not found")]
    NotFound(String),
    #[error("context feature '{0}' is still referenced by a setting")]
    InUse(String),
    #[error("invalid context feature name '{0}'")]
    InvalidName(String),
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct ContextFeatureStore {
    pool: PgPool,
}

impl ContextFeatureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<String>, ContextFeatureStoreError> {
        let rows = sqlx::query("SELECT name FROM context_features ORDER BY index ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(rows.into_iter().map(|r| r.get::<String, _>("name")).collect())
    }

    pub async fn get_index(&self, name: &str) -> Result<Option<i32>, ContextFeatureStoreError> {
        let row: Option<i32> = sqlx::query_scalar("SELECT index FROM context_features WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(row)
    }

    pub async fn add(&self, name: &str) -> Result<(), ContextFeatureStoreError> {
        if !context_features::is_valid_feature_name(name) {
            return Err(ContextFeatureStoreError::InvalidName(name.to_string()));
        }
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM context_features")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let inserted = sqlx::query(
            "INSERT INTO context_features (name, index) VALUES ($1, $2)
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(name)
        .bind(count as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        if inserted.rows_affected() == 0 {
            return Err(ContextFeatureStoreError::Conflict(name.to_string()));
        }
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// `true` if any setting's `configurable_features` references `name`.
    pub async fn is_in_use(&self, name: &str) -> Result<bool, ContextFeatureStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM setting_configurable_features WHERE feature = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(count > 0)
    }

    pub async fn delete(&self, name: &str) -> Result<(), ContextFeatureStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM context_features WHERE name = $1)")
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        if !exists {
            return Err(ContextFeatureStoreError::NotFound(name.to_string()));
        }
        let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM setting_configurable_features WHERE feature = $1")
            .bind(name)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        if in_use > 0 {
            return Err(ContextFeatureStoreError::InUse(name.to_string()));
        }

        sqlx::query("DELETE FROM context_features WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        self.recompact(&mut tx).await?;
        pool::bump_stamp(&mut tx, "settings").await.map_err(ContextFeatureStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub async fn move_feature(&self, name: &str, pivot: Pivot<'_>) -> Result<(), ContextFeatureStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let rows = sqlx::query("SELECT name FROM context_features ORDER BY index ASC")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let order: Vec<String> = rows.into_iter().map(|r| r.get::<String, _>("name")).collect();

        let reordered = context_features::reorder(&order, name, pivot).map_err(|e| match e {
            ReorderError::NotFound(n) => ContextFeatureStoreError::NotFound(n),
            ReorderError::PivotNotFound(n) => ContextFeatureStoreError::NotFound(n),
        })?;

        for (idx, feature) in reordered.iter().enumerate() {
            sqlx::query("UPDATE context_features SET index = $1 WHERE name = $2")
                .bind(idx as i32 + order.len() as i32) // shift out of range first to dodge the UNIQUE(index) constraint
                .bind(feature)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        for (idx, feature) in reordered.iter().enumerate() {
            sqlx::query("UPDATE context_features SET index = $1 WHERE name = $2")
                .bind(idx as i32)
                .bind(feature)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        pool::bump_stamp(&mut tx, "settings").await.map_err(ContextFeatureStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// Renumbers `index` to `0..n-1` in current order. Used after a delete.
    async fn recompact(&self, tx: &mut sqlx::Transaction<'_, sqlx::Postgres>) -> Result<(), ContextFeatureStoreError> {
        let rows = sqlx::query("SELECT name FROM context_features ORDER BY index ASC")
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let names: Vec<String> = rows.into_iter().map(|r| r.get::<String, _>("name")).collect();
        for (idx, name) in names.iter().enumerate() {
            sqlx::query("UPDATE context_features SET index = $1 WHERE name = $2")
                .bind(idx as i32 + names.len() as i32)
                .bind(name)
                .execute(&mut **tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        for (idx, name) in names.iter().enumerate() {
            sqlx::query("UPDATE context_features SET index = $1 WHERE name = $2")
                .bind(idx as i32)
                .bind(name)
                .execute(&mut **tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        Ok(())
    }
}
