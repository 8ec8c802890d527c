//! Orchestration layer: combines the pure `domain` decision functions with
//! the `storage` persistence layer, the same role the teacher's
//! `DatabaseService` plays between `ModelRegistry` and raw SQL.

use crate::domain::context_features::Pivot;
use crate::domain::query::{self, ContextFilter};
use crate::domain::rules::{self, Rule};
use crate::domain::settings::{self, ClassifyContext, DeclarationOutcome, DeclareRequest, Setting};
use crate::domain::type_algebra::TypeExpr;
use crate::storage::{ContextFeatureStore, ContextFeatureStoreError, RuleStore, RuleStoreError, SettingStore, SettingStoreError};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation: {0}")]
    Validation(String),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl From<ContextFeatureStoreError> for ServiceError {
    fn from(e: ContextFeatureStoreError) -> Self {
        match e {
            ContextFeatureStoreError::NotFound(n) => ServiceError::NotFound(n),
            ContextFeatureStoreError::Conflict(n) => ServiceError::Conflict(format!("context feature '{}' already exists", n)),
            ContextFeatureStoreError::InUse(n) => ServiceError::Conflict(format!("context feature '{}' is still referenced by a setting", n)),
            ContextFeatureStoreError::InvalidName(n) => ServiceError::Validation(format!("invalid context feature name '{}'", n)),
            ContextFeatureStoreError::Db(e) => ServiceError::Fatal(e),
        }
    }
}

impl From<SettingStoreError> for ServiceError {
    fn from(e: SettingStoreError) -> Self {
        match e {
            SettingStoreError::NotFound(n) => ServiceError::NotFound(n),
            SettingStoreError::CorruptType(n, detail) => ServiceError::Fatal(anyhow::anyhow!("setting '{}' has a corrupt type: {}", n, detail)),
            SettingStoreError::Db(e) => ServiceError::Fatal(e),
        }
    }
}

impl From<RuleStoreError> for ServiceError {
    fn from(e: RuleStoreError) -> Self {
        match e {
            RuleStoreError::NotFound(id) => ServiceError::NotFound(format!("rule '{}'", id)),
            RuleStoreError::Duplicate(id) => ServiceError::Conflict(format!("a rule with this (setting, feature_values) already exists (conflicts with {})", id)),
            RuleStoreError::Db(e) => ServiceError::Fatal(e),
        }
    }
}

pub struct QueriedRule {
    pub value: JsonValue,
    pub feature_values: Vec<(String, String)>,
    pub metadata: Option<HashMap<String, JsonValue>>,
}

pub struct QueriedSetting {
    pub rules: Vec<QueriedRule>,
    pub default_value: Option<JsonValue>,
}

pub struct QueryResult {
    pub settings: HashMap<String, QueriedSetting>,
    pub etag: String,
}

pub struct HeksherService {
    pool: PgPool,
    pub context_features: ContextFeatureStore,
    pub settings: SettingStore,
    pub rules: RuleStore,
}

impl HeksherService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            context_features: ContextFeatureStore::new(pool.clone()),
            settings: SettingStore::new(pool.clone()),
            rules: RuleStore::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ---- context features ----------------------------------------------

    pub async fn list_context_features(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.context_features.list().await?)
    }

    pub async fn add_context_feature(&self, name: &str) -> Result<(), ServiceError> {
        Ok(self.context_features.add(name).await?)
    }

    pub async fn delete_context_feature(&self, name: &str) -> Result<(), ServiceError> {
        Ok(self.context_features.delete(name).await?)
    }

    pub async fn move_context_feature(&self, name: &str, to_before: Option<&str>, to_after: Option<&str>) -> Result<(), ServiceError> {
        let pivot = match (to_before, to_after) {
            (Some(b), _) => Pivot::Before(b),
            (None, Some(a)) => Pivot::After(a),
            (None, None) => return Err(ServiceError::Validation("one of to_before/to_after is required".to_string())),
        };
        Ok(self.context_features.move_feature(name, pivot).await?)
    }

    // ---- settings ---------------------------------------------------------

    pub async fn get_setting(&self, name: &str) -> Result<Setting, ServiceError> {
        self.settings.get(name).await?.ok_or_else(|| ServiceError::NotFound(format!("setting '{}'", name)))
    }

    pub async fn list_settings(&self) -> Result<Vec<String>, ServiceError> {
        Ok(self.settings.list().await?)
    }

    pub async fn delete_setting(&self, name: &str) -> Result<(), ServiceError> {
        let canonical = self.settings.resolve_name(name).await?.ok_or_else(|| ServiceError::NotFound(format!("setting '{}'", name)))?;
        if !self.settings.delete(&canonical).await? {
            return Err(ServiceError::NotFound(format!("setting '{}'", name)));
        }
        Ok(())
    }

    /// The declare(...) endpoint: resolves the existing setting (if any),
    /// gathers classifier facts, runs the pure decision function, and
    /// persists on the outcomes that mutate state.
    pub async fn declare(&self, req: DeclareRequest) -> Result<DeclarationOutcome, ServiceError> {
        crate::storage::pool::retry_on_serialization_failure(|| self.declare_attempt(&req)).await
    }

    /// The read-decide-write sequence behind [`Self::declare`], retried
    /// whole per spec.md §5 if two concurrent declares of the same setting
    /// race each other into a serialization failure.
    async fn declare_attempt(&self, req: &DeclareRequest) -> Result<DeclarationOutcome, ServiceError> {
        // Per spec.md §4.4 step 1: look up by name; if absent and an alias
        // was given, look up by alias instead, treating it as the existing
        // canonical name for a rename-on-first-declare.
        let existing = match self.settings.get_exact(&req.name).await? {
            Some(s) => Some(s),
            None => match &req.alias {
                Some(alias) => self.settings.get_exact(alias).await?,
                None => None,
            },
        };

        let ctx = if let Some(cur) = &existing {
            let rename = if cur.name != req.name { Some(req.name.as_str()) } else { None };
            self.settings.classify_context(cur, rename).await?
        } else {
            ClassifyContext { features_in_use: Default::default(), existing_rule_values: Vec::new(), rename_collides: false }
        };

        let outcome = settings::decide(existing.as_ref(), req, &ctx);

        match &outcome {
            DeclarationOutcome::Created => {
                let setting = Setting {
                    name: req.name.clone(),
                    type_expr: req.type_expr.clone(),
                    default_value: req.default_value.clone(),
                    configurable_features: req.configurable_features.clone(),
                    metadata: req.metadata.clone(),
                    aliases: BTreeSet::new(),
                    version: req.version,
                };
                self.settings.create(&setting).await?;
            }
            DeclarationOutcome::Upgraded => {
                let cur = existing.expect("Upgraded outcome implies an existing setting");
                let mut aliases = cur.aliases.clone();
                if cur.name != req.name {
                    aliases.insert(cur.name.clone());
                }
                let setting = Setting {
                    name: req.name.clone(),
                    type_expr: req.type_expr.clone(),
                    default_value: req.default_value.clone(),
                    configurable_features: req.configurable_features.clone(),
                    metadata: req.metadata.clone(),
                    aliases,
                    version: req.version,
                };
                self.settings.upgrade(&setting, Some(&cur.name)).await?;
            }
            _ => {}
        }

        Ok(outcome)
    }

    pub async fn set_type(&self, name: &str, version: settings::Version, type_expr: TypeExpr) -> Result<(), ServiceError> {
        let cur = self.get_setting(name).await?;
        self.guard_version(&cur, version)?;
        let ctx = self.settings.classify_context(&cur, None).await?;
        if let Some(conflict) = type_conflicts(&cur.type_expr, &type_expr, cur.default_value.as_ref(), &ctx) {
            return Err(ServiceError::Conflict(conflict.join("; ")));
        }
        let bump_major = version.0 > cur.version.0;
        self.settings.set_type(&cur.name, &type_expr, bump_major).await?;
        Ok(())
    }

    pub async fn rename_setting(&self, name: &str, version: settings::Version, new_name: &str) -> Result<(), ServiceError> {
        let cur = self.get_setting(name).await?;
        self.guard_version(&cur, version)?;
        if new_name != cur.name && self.settings.resolve_name(new_name).await?.is_some() {
            return Err(ServiceError::Conflict(format!("'{}' already names a setting or alias", new_name)));
        }
        self.settings.rename(&cur.name, new_name).await?;
        Ok(())
    }

    pub async fn set_configurable_features(&self, name: &str, version: settings::Version, features: BTreeSet<String>) -> Result<(), ServiceError> {
        let cur = self.get_setting(name).await?;
        self.guard_version(&cur, version)?;
        let ctx = self.settings.classify_context(&cur, None).await?;
        let removed: Vec<&String> = cur.configurable_features.difference(&features).collect();
        let removed_in_use: Vec<&&String> = removed.iter().filter(|f| ctx.features_in_use.contains(f.as_str())).collect();
        if !removed_in_use.is_empty() {
            return Err(ServiceError::Conflict(format!("feature(s) still referenced by rules: {:?}", removed_in_use)));
        }
        let added_any = features.difference(&cur.configurable_features).next().is_some();
        let bump_major = added_any || version.0 > cur.version.0;
        self.settings.set_configurable_features(&cur.name, &features, bump_major).await?;
        Ok(())
    }

    fn guard_version(&self, cur: &Setting, requested: settings::Version) -> Result<(), ServiceError> {
        if requested <= cur.version {
            return Err(ServiceError::Conflict(format!(
                "requested version {:?} is not greater than current version {:?}",
                requested, cur.version
            )));
        }
        Ok(())
    }

    // ---- rules ------------------------------------------------------------

    pub async fn create_rule(
        &self,
        setting_name: &str,
        feature_values: HashMap<String, String>,
        value: JsonValue,
        metadata: HashMap<String, JsonValue>,
    ) -> Result<Uuid, ServiceError> {
        let setting = self.get_setting(setting_name).await?;
        if feature_values.is_empty() {
            return Err(ServiceError::Validation("feature_values must be non-empty".to_string()));
        }
        for feature in feature_values.keys() {
            if !setting.configurable_features.contains(feature) {
                return Err(ServiceError::Validation(format!("'{}' is not a configurable feature of '{}'", feature, setting.name)));
            }
        }
        if !setting.type_expr.validate(&value) {
            return Err(ServiceError::Validation(format!("value does not conform to {}", setting.type_expr.format())));
        }

        let feature_order = self.context_features.list().await?;
        let rule = Rule { id: Uuid::new_v4(), setting: setting.name.clone(), feature_values, value, metadata };
        self.rules.create(&rule, &feature_order).await?;
        Ok(rule.id)
    }

    pub async fn get_rule(&self, id: Uuid) -> Result<Rule, ServiceError> {
        self.rules.get(id).await?.ok_or_else(|| ServiceError::NotFound(format!("rule '{}'", id)))
    }

    pub async fn delete_rule(&self, id: Uuid) -> Result<(), ServiceError> {
        if !self.rules.delete(id).await? {
            return Err(ServiceError::NotFound(format!("rule '{}'", id)));
        }
        Ok(())
    }

    pub async fn set_rule_value(&self, id: Uuid, value: JsonValue) -> Result<(), ServiceError> {
        let rule = self.get_rule(id).await?;
        let setting = self.get_setting(&rule.setting).await?;
        if !setting.type_expr.validate(&value) {
            return Err(ServiceError::Validation(format!("value does not conform to {}", setting.type_expr.format())));
        }
        if !self.rules.set_value(id, &value).await? {
            return Err(ServiceError::NotFound(format!("rule '{}'", id)));
        }
        Ok(())
    }

    pub async fn search_rule(&self, setting_name: &str, feature_values: &HashMap<String, String>) -> Result<Rule, ServiceError> {
        let setting = self.get_setting(setting_name).await?;
        let feature_order = self.context_features.list().await?;
        self.rules
            .search(&setting.name, &feature_order, feature_values)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("no rule of '{}' matches that feature_values", setting.name)))
    }

    /// Removes every rule of any setting that conditions on `feature`; used
    /// to clear the "in use" guard ahead of a context-feature delete.
    pub async fn clear_rules_conditioned_on(&self, feature: &str) -> Result<u64, ServiceError> {
        Ok(self.rules.delete_conditioned_on(feature).await?)
    }

    // ---- query engine -------------------------------------------------

    pub async fn query(
        &self,
        setting_names: &[String],
        filter: &ContextFilter,
        include_metadata: bool,
    ) -> Result<QueryResult, ServiceError> {
        let feature_order = self.context_features.list().await?;

        let canonical_names: Vec<String> = if setting_names.is_empty() {
            self.settings.list().await?
        } else {
            let mut resolved = Vec::with_capacity(setting_names.len());
            for name in setting_names {
                let canonical = self.settings.resolve_name(name).await?.ok_or_else(|| ServiceError::NotFound(format!("setting '{}'", name)))?;
                resolved.push(canonical);
            }
            resolved
        };

        let mut settings_out: HashMap<String, QueriedSetting> = HashMap::new();
        for name in &canonical_names {
            let setting = self.settings.get_exact(name).await?.ok_or_else(|| ServiceError::NotFound(format!("setting '{}'", name)))?;
            settings_out.insert(name.clone(), QueriedSetting { rules: Vec::new(), default_value: setting.default_value });
        }

        let rule_rows = self.rules.list_for_settings(&canonical_names).await?;
        for rule in rule_rows {
            if !query::filter_matches(&rule.feature_values, filter) {
                continue;
            }
            let Some(entry) = settings_out.get_mut(&rule.setting) else { continue };
            entry.rules.push(QueriedRule {
                value: rule.value,
                feature_values: rules::canonical_feature_values(&feature_order, &rule.feature_values),
                metadata: if include_metadata { Some(rule.metadata) } else { None },
            });
        }

        let settings_stamp = crate::storage::pool::read_stamp(&self.pool, "settings").await?;
        let rules_stamp = crate::storage::pool::read_stamp(&self.pool, "rules").await?;
        let etag = query::compute_etag(&settings_stamp, &rules_stamp, &feature_order);

        Ok(QueryResult { settings: settings_out, etag })
    }
}

/// Explicit (non-declare) type-change conflict surface per spec.md §4.4:
/// offending values listed individually rather than via the outcome
/// taxonomy. Compatible means the new type conforms for the default value
/// and for every rule's value, so both are checked.
fn type_conflicts(old: &TypeExpr, new: &TypeExpr, default_value: Option<&JsonValue>, ctx: &ClassifyContext) -> Option<Vec<String>> {
    if old == new {
        return None;
    }
    let mut conflicts = Vec::new();
    if let Some(default) = default_value {
        if !new.validate(default) {
            conflicts.push(format!("default value {} not in {}", default, new.format()));
        }
    }
    for value in &ctx.existing_rule_values {
        if !new.validate(value) {
            conflicts.push(format!("value {} not in {}", value, new.format()));
        }
    }
    if conflicts.is_empty() {
        None
    } else {
        Some(conflicts)
    }
}
