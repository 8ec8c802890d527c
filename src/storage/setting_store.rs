//! Persistence for component D (the setting catalog) and the declare(...)
//! orchestration glue that gathers the facts `domain::settings::decide` needs.

use crate::domain::settings::{ClassifyContext, Setting};
use crate::domain::type_algebra::TypeExpr;
use crate::storage::pool;
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::{BTreeSet, HashSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingStoreError {
    #[error("setting '{0}' not found")]
    NotFound(String),
    #[error("malformed type expression stored for setting '{0}': {1}")]
    CorruptType(String, String),
    #[error(transparent)]
    Db(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct SettingStore {
    pool: PgPool,
}

impl SettingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Resolves a name through `setting_aliases` if it isn't a setting name
    /// itself — every read and write path accepts an alias per spec.md §3.
    pub async fn resolve_name(&self, name: &str) -> Result<Option<String>, SettingStoreError> {
        let direct: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM settings WHERE name = $1)")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        if direct {
            return Ok(Some(name.to_string()));
        }
        let via_alias: Option<String> = sqlx::query_scalar("SELECT setting FROM setting_aliases WHERE alias = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(via_alias)
    }

    pub async fn get(&self, name: &str) -> Result<Option<Setting>, SettingStoreError> {
        let Some(canonical) = self.resolve_name(name).await? else {
            return Ok(None);
        };
        self.get_exact(&canonical).await
    }

    /// Like [`Self::get`] but requires `name` to be the setting's own name,
    /// not an alias — used by the declare path, which always operates on
    /// canonical names.
    pub async fn get_exact(&self, name: &str) -> Result<Option<Setting>, SettingStoreError> {
        let Some(row) = sqlx::query("SELECT name, type, default_value, version_major, version_minor FROM settings WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?
        else {
            return Ok(None);
        };

        let type_str: String = row.try_get("type").map_err(|e| anyhow::anyhow!(e))?;
        let type_expr = TypeExpr::parse(&type_str).map_err(|e| SettingStoreError::CorruptType(name.to_string(), e.to_string()))?;
        let default_value: Option<JsonValue> = row.try_get("default_value").map_err(|e| anyhow::anyhow!(e))?;
        let version_major: i32 = row.try_get("version_major").map_err(|e| anyhow::anyhow!(e))?;
        let version_minor: i32 = row.try_get("version_minor").map_err(|e| anyhow::anyhow!(e))?;

        let features: Vec<String> = sqlx::query_scalar("SELECT feature FROM setting_configurable_features WHERE setting = $1")
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let aliases: Vec<String> = sqlx::query_scalar("SELECT alias FROM setting_aliases WHERE setting = $1")
            .bind(name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let metadata = crate::storage::metadata::SETTING_METADATA.get_all(&self.pool, name).await?;

        Ok(Some(Setting {
            name: name.to_string(),
            type_expr,
            default_value,
            configurable_features: features.into_iter().collect(),
            metadata,
            aliases: aliases.into_iter().collect(),
            version: (version_major as u32, version_minor as u32),
        }))
    }

    pub async fn list(&self) -> Result<Vec<String>, SettingStoreError> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM settings ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(names)
    }

    /// Gathers the facts `domain::settings::decide` needs to classify a
    /// declare request against an existing setting: which of its
    /// `configurable_features` are used by at least one rule, the distinct
    /// values those rules carry, and whether `rename` collides with another
    /// setting or alias.
    pub async fn classify_context(&self, existing: &Setting, rename: Option<&str>) -> Result<ClassifyContext, SettingStoreError> {
        let rows = sqlx::query(
            "SELECT DISTINCT rc.feature FROM rule_conditions rc
             JOIN rules r ON r.id = rc.rule_id
             WHERE r.setting = $1",
        )
        .bind(&existing.name)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        let features_in_use: HashSet<String> = rows.into_iter().map(|r| r.get::<String, _>("feature")).collect();

        let value_rows: Vec<JsonValue> = sqlx::query_scalar("SELECT value FROM rules WHERE setting = $1")
            .bind(&existing.name)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        let existing_rule_values: Vec<JsonValue> = value_rows;

        let rename_collides = if let Some(new_name) = rename {
            new_name != existing.name && self.resolve_name(new_name).await?.is_some()
        } else {
            false
        };

        Ok(ClassifyContext { features_in_use, existing_rule_values, rename_collides })
    }

    /// Persists a brand new setting at version (1, 0).
    pub async fn create(&self, setting: &Setting) -> Result<(), SettingStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        self.write_setting_tx(&mut tx, setting, None).await?;
        pool::bump_stamp(&mut tx, "settings").await.map_err(SettingStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// Overwrites an existing setting's attributes (used by Upgraded /
    /// rename declarations). `previous_name` is passed when the declare
    /// request renamed the setting, so the old row can be replaced in place.
    pub async fn upgrade(&self, setting: &Setting, previous_name: Option<&str>) -> Result<(), SettingStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        if let Some(prev) = previous_name {
            if prev != setting.name {
                sqlx::query("UPDATE settings SET name = $1 WHERE name = $2")
                    .bind(&setting.name)
                    .bind(prev)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
            }
        }
        self.write_setting_tx(&mut tx, setting, previous_name.map(|_| setting.name.as_str())).await?;
        pool::bump_stamp(&mut tx, "settings").await.map_err(SettingStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    async fn write_setting_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        setting: &Setting,
        existing_name: Option<&str>,
    ) -> Result<(), SettingStoreError> {
        let type_str = setting.type_expr.format();
        sqlx::query(
            "INSERT INTO settings (name, type, default_value, version_major, version_minor)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (name) DO UPDATE SET
                type = EXCLUDED.type,
                default_value = EXCLUDED.default_value,
                version_major = EXCLUDED.version_major,
                version_minor = EXCLUDED.version_minor",
        )
        .bind(&setting.name)
        .bind(&type_str)
        .bind(&setting.default_value)
        .bind(setting.version.0 as i32)
        .bind(setting.version.1 as i32)
        .execute(&mut **tx)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

        let owner = existing_name.unwrap_or(&setting.name);
        sqlx::query("DELETE FROM setting_configurable_features WHERE setting = $1")
            .bind(owner)
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        for feature in &setting.configurable_features {
            sqlx::query("INSERT INTO setting_configurable_features (setting, feature) VALUES ($1, $2)")
                .bind(&setting.name)
                .bind(feature)
                .execute(&mut **tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }

        sqlx::query("DELETE FROM setting_aliases WHERE setting = $1")
            .bind(owner)
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        for alias in &setting.aliases {
            sqlx::query(
                "INSERT INTO setting_aliases (alias, setting) VALUES ($1, $2)
                 ON CONFLICT (alias) DO UPDATE SET setting = EXCLUDED.setting",
            )
            .bind(alias)
            .bind(&setting.name)
            .execute(&mut **tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        }

        crate::storage::metadata::SETTING_METADATA.clear(tx, owner).await.map_err(SettingStoreError::Db)?;
        crate::storage::metadata::SETTING_METADATA
            .merge(tx, &setting.name, &setting.metadata)
            .await
            .map_err(SettingStoreError::Db)?;

        Ok(())
    }

    pub async fn set_type(&self, name: &str, type_expr: &TypeExpr, bump_major: bool) -> Result<(), SettingStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let type_str = type_expr.format();
        if bump_major {
            sqlx::query("UPDATE settings SET type = $1, version_major = version_major + 1, version_minor = 0 WHERE name = $2")
                .bind(&type_str)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        } else {
            sqlx::query("UPDATE settings SET type = $1, version_minor = version_minor + 1 WHERE name = $2")
                .bind(&type_str)
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        pool::bump_stamp(&mut tx, "settings").await.map_err(SettingStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    /// Renames `name` to `new_name` and moves the old name into
    /// `setting_aliases`, the same way the declare-upgrade path does at
    /// [`Self::upgrade`] — `GET`/query by the old name must keep resolving.
    pub async fn rename(&self, name: &str, new_name: &str) -> Result<(), SettingStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        sqlx::query("UPDATE settings SET name = $1, version_minor = version_minor + 1 WHERE name = $2")
            .bind(new_name)
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        sqlx::query(
            "INSERT INTO setting_aliases (alias, setting) VALUES ($1, $2)
             ON CONFLICT (alias) DO UPDATE SET setting = EXCLUDED.setting",
        )
        .bind(name)
        .bind(new_name)
        .execute(&mut *tx)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
        pool::bump_stamp(&mut tx, "settings").await.map_err(SettingStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub async fn set_configurable_features(&self, name: &str, features: &BTreeSet<String>, bump_major: bool) -> Result<(), SettingStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        sqlx::query("DELETE FROM setting_configurable_features WHERE setting = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        for feature in features {
            sqlx::query("INSERT INTO setting_configurable_features (setting, feature) VALUES ($1, $2)")
                .bind(name)
                .bind(feature)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        if bump_major {
            sqlx::query("UPDATE settings SET version_major = version_major + 1, version_minor = 0 WHERE name = $1")
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        } else {
            sqlx::query("UPDATE settings SET version_minor = version_minor + 1 WHERE name = $1")
                .bind(name)
                .execute(&mut *tx)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
        }
        pool::bump_stamp(&mut tx, "settings").await.map_err(SettingStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<bool, SettingStoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| anyhow::anyhow!(e))?;
        let result = sqlx::query("DELETE FROM settings WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        pool::bump_stamp(&mut tx, "settings").await.map_err(SettingStoreError::Db)?;
        pool::bump_stamp(&mut tx, "rules").await.map_err(SettingStoreError::Db)?;
        tx.commit().await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(result.rows_affected() > 0)
    }
}
