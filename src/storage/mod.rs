//! Postgres-backed persistence. Each store wraps a shared `PgPool` and
//! exposes the I/O operations the pure `domain` functions need facts for,
//! or that simply write through.

pub mod context_feature_store;
pub mod metadata;
pub mod pool;
pub mod rule_store;
pub mod setting_store;

pub use context_feature_store::{ContextFeatureStore, ContextFeatureStoreError};
pub use rule_store::{RuleStore, RuleStoreError};
pub use setting_store::{SettingStore, SettingStoreError};
