//! Persistence for component B (the rule store).

use crate::domain::rules::{canonical_key, Rule};
use crate::storage::pool;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum RuleStoreError {
    #[error("rule '{0}' not found")]
    NotFound(Uuid),
    #[error("a rule with this (setting, feature_values) already exists: {0}")]
    Duplicate(Uuid),
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct RuleStore {
    pool: PgPool,
}

impl RuleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<Rule>, RuleStoreError> {
        let Some(row) = sqlx::query("SELECT id, setting, value FROM rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?
        else {
            return Ok(None);
        };
        Ok(Some(self.hydrate(row).await?))
    }

    async fn hydrate(&self, row: sqlx::postgres::PgRow) -> Result<Rule, RuleStoreError> {
        let id: Uuid = row.try_get("id").map_err(|e| anyhow::anyhow!(e))?;
        let setting: String = row.try_get("setting").map_err(|e| anyhow::anyhow!(e))?;
        let value: JsonValue = row.try_get("value").map_err(|e| anyhow::anyhow!(e))?;

        let cond_rows = sqlx::query("SELECT feature, value FROM rule_conditions WHERE rule_id = $1")
            .bind(id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let feature_values: HashMap<String, String> = cond_rows
            .into_iter()
            .map(|r| (r.get::<String, _>("feature"), r.get::<String, _>("value")))
            .collect();

        let metadata = crate::storage::metadata::RULE_METADATA.get_all(&self.pool, &id.to_string()).await?;

        Ok(Rule { id, setting, feature_values, value, metadata })
    }

    /// Every rule belonging to one of `settings` (canonical names). Used by
    /// the query engine, which then applies `domain::query::filter_matches`
    /// in memory.
    pub async fn list_for_settings(&self, settings: &[String]) -> Result<Vec<Rule>, RuleStoreError> {
        let rows = sqlx::query("SELECT id, setting, value FROM rules WHERE setting = ANY($1)")
            .bind(settings)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            rules.push(self.hydrate(row).await?);
        }
        Ok(rules)
    }

    /// Search by exact `(setting, feature_values)` per spec.md's
    /// `GET /rules/search` endpoint — an exact match, not a filtered query.
    pub async fn search(
        &self,
        setting: &str,
        feature_order: &[String],
        feature_values: &HashMap<String, String>,
    ) -> Result<Option<Rule>, RuleStoreError> {
        let target_key = canonical_key(setting, feature_order, feature_values);
        let candidates = self.list_for_settings(&[setting.to_string()]).await?;
        Ok(candidates
            .into_iter()
            .find(|r| canonical_key(&r.setting, feature_order, &r.feature_values) == target_key))
    }

    /// Wraps [`Self::create_attempt`] in spec.md §5's serialization-failure
    /// retry: two concurrent creates racing the same (setting, feature_values)
    /// key can both pass the duplicate check and then conflict in Postgres.
    pub async fn create(&self, rule: &Rule, feature_order: &[String]) -> Result<(), RuleStoreError> {
        pool::retry_on_serialization_failure(|| self.create_attempt(rule, feature_order)).await
    }

    async fn create_attempt(&self, rule: &Rule, feature_order: &[String]) -> Result<(), RuleStoreError> {
        let target_key = canonical_key(&rule.setting, feature_order, &rule.feature_values);
        let existing = self.list_for_settings(&[rule.setting.clone()]).await?;
        if existing
            .iter()
            .any(|r| canonical_key(&r.setting, feature_order, &r.feature_values) == target_key)
        {
            return Err(RuleStoreError::Duplicate(rule.id));
        }

        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        sqlx::query("INSERT INTO rules (id, setting, value) VALUES ($1, $2, $3)")
            .bind(rule.id)
            .bind(&rule.setting)
            .bind(&rule.value)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        for (feature, value) in &rule.feature_values {
            sqlx::query("INSERT INTO rule_conditions (rule_id, feature, value) VALUES ($1, $2, $3)")
                .bind(rule.id)
                .bind(feature)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        crate::storage::metadata::RULE_METADATA
            .merge(&mut tx, &rule.id.to_string(), &rule.metadata)
            .await
            .map_err(RuleStoreError::Db)?;
        pool::bump_stamp(&mut tx, "rules").await.map_err(RuleStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub async fn set_value(&self, id: Uuid, value: &JsonValue) -> Result<bool, RuleStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let result = sqlx::query("UPDATE rules SET value = $1 WHERE id = $2")
            .bind(value)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        pool::bump_stamp(&mut tx, "rules").await.map_err(RuleStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(true)
    }

    pub async fn delete(&self, id: Uuid) -> Result<bool, RuleStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let result = sqlx::query("DELETE FROM rules WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        pool::bump_stamp(&mut tx, "rules").await.map_err(RuleStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(true)
    }

    /// Deletes every rule of `setting` that conditions on `feature` — used
    /// to clear the guard before a context-feature delete.
    pub async fn delete_conditioned_on(&self, feature: &str) -> Result<u64, RuleStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let result = sqlx::query(
            "DELETE FROM rules WHERE id IN (SELECT rule_id FROM rule_conditions WHERE feature = $1)",
        )
        .bind(feature)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        pool::bump_stamp(&mut tx, "rules").await.map_err(RuleStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected())
    }
}
