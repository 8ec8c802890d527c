//! Generic per-entity metadata store: `setting_metadata` and `rule_metadata`
//! share the same `(owner, key, value)` shape, so the CRUD operations from
//! spec.md §3 ("Metadata store") are written once and parameterized by table
//! and owner-column name rather than duplicated per entity.

use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::HashMap;

pub struct MetadataTable {
    pub table: &'static str,
    pub owner_column: &'static str,
}

pub const SETTING_METADATA: MetadataTable = MetadataTable { table: "setting_metadata", owner_column: "setting" };
pub const RULE_METADATA: MetadataTable = MetadataTable { table: "rule_metadata", owner_column: "rule_id" };

impl MetadataTable {
    pub async fn get_all(&self, pool: &PgPool, owner: &str) -> anyhow::Result<HashMap<String, JsonValue>> {
        let sql = format!("SELECT key, value FROM {} WHERE {} = $1", self.table, self.owner_column);
        let rows = sqlx::query(&sql).bind(owner).fetch_all(pool).await?;
        let mut out = HashMap::new();
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: JsonValue = row.try_get("value")?;
            out.insert(key, value);
        }
        Ok(out)
    }

    pub async fn get_key(&self, pool: &PgPool, owner: &str, key: &str) -> anyhow::Result<Option<JsonValue>> {
        let sql = format!("SELECT value FROM {} WHERE {} = $1 AND key = $2", self.table, self.owner_column);
        let row: Option<JsonValue> = sqlx::query_scalar(&sql).bind(owner).bind(key).fetch_optional(pool).await?;
        Ok(row)
    }

    /// POST semantics: merges `updates` into existing metadata.
    pub async fn merge(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner: &str,
        updates: &HashMap<String, JsonValue>,
    ) -> anyhow::Result<()> {
        for (k, v) in updates {
            self.put_key_tx(tx, owner, k, v).await?;
        }
        Ok(())
    }

    /// PUT semantics: replaces all existing metadata with `updates`.
    pub async fn replace(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner: &str,
        updates: &HashMap<String, JsonValue>,
    ) -> anyhow::Result<()> {
        self.clear(tx, owner).await?;
        self.merge(tx, owner, updates).await
    }

    /// DELETE semantics: clears all metadata for `owner`.
    pub async fn clear(&self, tx: &mut Transaction<'_, Postgres>, owner: &str) -> anyhow::Result<()> {
        let sql = format!("DELETE FROM {} WHERE {} = $1", self.table, self.owner_column);
        sqlx::query(&sql).bind(owner).execute(&mut **tx).await?;
        Ok(())
    }

    pub async fn put_key_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner: &str,
        key: &str,
        value: &JsonValue,
    ) -> anyhow::Result<()> {
        let sql = format!(
            "INSERT INTO {} ({}, key, value) VALUES ($1, $2, $3)
             ON CONFLICT ({}, key) DO UPDATE SET value = EXCLUDED.value",
            self.table, self.owner_column, self.owner_column
        );
        sqlx::query(&sql).bind(owner).bind(key).bind(value).execute(&mut **tx).await?;
        Ok(())
    }

    pub async fn delete_key(&self, tx: &mut Transaction<'_, Postgres>, owner: &str, key: &str) -> anyhow::Result<()> {
        let sql = format!("DELETE FROM {} WHERE {} = $1 AND key = $2", self.table, self.owner_column);
        sqlx::query(&sql).bind(owner).bind(key).execute(&mut **tx).await?;
        Ok(())
    }
}

/// Validates a metadata key per spec.md §3: `[A-Za-z0-9_-]+`.
pub fn is_valid_metadata_key(key: &str) -> bool {
    crate::domain::context_features::is_valid_feature_name(key)
}
