//! The setting catalog's pure decision logic: the declare(...) state machine
//! and the minor/major/mismatch difference classifier from spec.md §4.4.
//!
//! These functions never touch the database; `app::service` gathers the
//! facts they need (current setting row, in-use features, existing rule
//! values, alias collisions) and interprets the `DeclarationOutcome`.

use crate::domain::type_algebra::{Comparison, TypeExpr};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap, HashSet};

pub type Version = (u32, u32);

pub const INITIAL_VERSION: Version = (1, 0);

#[derive(Debug, Clone)]
pub struct Setting {
    pub name: String,
    pub type_expr: TypeExpr,
    pub default_value: Option<JsonValue>,
    pub configurable_features: BTreeSet<String>,
    pub metadata: HashMap<String, JsonValue>,
    pub aliases: BTreeSet<String>,
    pub version: Version,
}

#[derive(Debug, Clone)]
pub struct DeclareRequest {
    pub name: String,
    pub configurable_features: BTreeSet<String>,
    pub type_expr: TypeExpr,
    pub default_value: Option<JsonValue>,
    pub metadata: HashMap<String, JsonValue>,
    pub alias: Option<String>,
    pub version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiffLevel {
    Minor,
    Major,
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDiff {
    pub attribute: String,
    pub level: DiffLevel,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub enum DeclarationOutcome {
    Created,
    UpToDate,
    Upgraded,
    Outdated { latest_version: Version, diffs: Vec<AttributeDiff> },
    Rejected { diffs: Vec<AttributeDiff> },
    Mismatch { diffs: Vec<AttributeDiff> },
}

impl DeclarationOutcome {
    pub fn tag(&self) -> &'static str {
        match self {
            DeclarationOutcome::Created => "created",
            DeclarationOutcome::UpToDate => "uptodate",
            DeclarationOutcome::Upgraded => "upgraded",
            DeclarationOutcome::Outdated { .. } => "outdated",
            DeclarationOutcome::Rejected { .. } => "rejected",
            DeclarationOutcome::Mismatch { .. } => "mismatch",
        }
    }

    /// `true` for the two outcomes that correspond to a 409 response.
    pub fn is_conflict(&self) -> bool {
        matches!(self, DeclarationOutcome::Rejected { .. } | DeclarationOutcome::Mismatch { .. })
    }
}

/// The comparable subset of attributes shared by `Setting` and `DeclareRequest`.
#[derive(Debug, Clone, PartialEq)]
struct Attrs {
    name: String,
    type_expr: TypeExpr,
    default_value: Option<JsonValue>,
    configurable_features: BTreeSet<String>,
    metadata: HashMap<String, JsonValue>,
}

impl From<&Setting> for Attrs {
    fn from(s: &Setting) -> Self {
        Attrs {
            name: s.name.clone(),
            type_expr: s.type_expr.clone(),
            default_value: s.default_value.clone(),
            configurable_features: s.configurable_features.clone(),
            metadata: s.metadata.clone(),
        }
    }
}

impl From<&DeclareRequest> for Attrs {
    fn from(r: &DeclareRequest) -> Self {
        Attrs {
            name: r.name.clone(),
            type_expr: r.type_expr.clone(),
            default_value: r.default_value.clone(),
            configurable_features: r.configurable_features.clone(),
            metadata: r.metadata.clone(),
        }
    }
}

/// Extra facts the pure classifier needs that aren't visible on either
/// `Setting` or `DeclareRequest` alone. Owned rather than borrowed: the
/// caller (`app::service`) assembles this from several independent queries,
/// so there's no single buffer to borrow from.
pub struct ClassifyContext {
    /// Feature names referenced by at least one existing rule of this setting.
    pub features_in_use: HashSet<String>,
    /// Values of existing rules of this setting (for type-compatibility checks).
    pub existing_rule_values: Vec<JsonValue>,
    /// Whether renaming `old.name` to `new.name` would collide with another
    /// setting's name or alias.
    pub rename_collides: bool,
}

fn classify_metadata(old: &Attrs, new: &Attrs) -> Option<AttributeDiff> {
    if old.metadata == new.metadata {
        return None;
    }
    Some(AttributeDiff {
        attribute: "metadata".to_string(),
        level: DiffLevel::Minor,
        detail: "metadata changed".to_string(),
    })
}

fn classify_default_value(old: &Attrs, new: &Attrs) -> Option<AttributeDiff> {
    if old.default_value == new.default_value {
        return None;
    }
    if let Some(default) = &new.default_value {
        if !new.type_expr.validate(default) {
            return Some(AttributeDiff {
                attribute: "default_value".to_string(),
                level: DiffLevel::Mismatch,
                detail: format!("{} does not conform to {}", default, new.type_expr.format()),
            });
        }
    }
    Some(AttributeDiff {
        attribute: "default_value".to_string(),
        level: DiffLevel::Minor,
        detail: format!("{:?} -> {:?}", old.default_value, new.default_value),
    })
}

fn classify_rename(old: &Attrs, new: &Attrs, rename_collides: bool) -> Option<AttributeDiff> {
    if old.name == new.name {
        return None;
    }
    if rename_collides {
        return Some(AttributeDiff {
            attribute: "name".to_string(),
            level: DiffLevel::Mismatch,
            detail: format!("rename to '{}' collides with an existing name/alias", new.name),
        });
    }
    Some(AttributeDiff {
        attribute: "name".to_string(),
        level: DiffLevel::Minor,
        detail: format!("{} -> {} ({} becomes an alias)", old.name, new.name, old.name),
    })
}

fn classify_type(old: &Attrs, new: &Attrs) -> Option<AttributeDiff> {
    if old.type_expr == new.type_expr {
        return None;
    }
    let detail = format!("{} -> {}", old.type_expr.format(), new.type_expr.format());
    if old.type_expr.compare(&new.type_expr) != Comparison::Incomparable {
        return Some(AttributeDiff { attribute: "type".to_string(), level: DiffLevel::Minor, detail });
    }
    Some(AttributeDiff { attribute: "type".to_string(), level: DiffLevel::Major, detail })
}

/// Checks the new type against the new default value and every existing
/// rule's value; returns a hard mismatch diff if any fails. Compatible means
/// the new type conforms for the default value and for every rule's value —
/// a type change that only narrows around the rules but leaves a
/// non-conforming default behind still violates the setting invariant.
fn classify_type_value_compatibility(ctx: &ClassifyContext, new: &Attrs) -> Option<AttributeDiff> {
    if let Some(default) = &new.default_value {
        if !new.type_expr.validate(default) {
            return Some(AttributeDiff {
                attribute: "type".to_string(),
                level: DiffLevel::Mismatch,
                detail: format!("default value {} does not conform to {}", default, new.type_expr.format()),
            });
        }
    }
    for (i, v) in ctx.existing_rule_values.iter().enumerate() {
        if !new.type_expr.validate(v) {
            return Some(AttributeDiff {
                attribute: "type".to_string(),
                level: DiffLevel::Mismatch,
                detail: format!("rule value #{} ({}) does not conform to {}", i, v, new.type_expr.format()),
            });
        }
    }
    None
}

fn classify_configurable_features(old: &Attrs, new: &Attrs, features_in_use: &HashSet<String>) -> Option<AttributeDiff> {
    let added: Vec<&String> = new.configurable_features.difference(&old.configurable_features).collect();
    let removed: Vec<&String> = old.configurable_features.difference(&new.configurable_features).collect();
    if added.is_empty() && removed.is_empty() {
        return None;
    }
    let removed_in_use: Vec<&&String> = removed.iter().filter(|f| features_in_use.contains(f.as_str())).collect();
    if !removed_in_use.is_empty() {
        return Some(AttributeDiff {
            attribute: "configurable_features".to_string(),
            level: DiffLevel::Mismatch,
            detail: format!("feature(s) still referenced by rules: {:?}", removed_in_use),
        });
    }
    let level = if added.is_empty() { DiffLevel::Minor } else { DiffLevel::Major };
    Some(AttributeDiff {
        attribute: "configurable_features".to_string(),
        level,
        detail: format!("added={:?} removed={:?}", added, removed),
    })
}

/// Computes every attribute-level difference between `old` and `new`.
fn classify_diffs(old: &Attrs, new: &Attrs, ctx: &ClassifyContext) -> Vec<AttributeDiff> {
    let mut diffs = Vec::new();
    diffs.extend(classify_metadata(old, new));
    diffs.extend(classify_default_value(old, new));
    diffs.extend(classify_rename(old, new, ctx.rename_collides));
    // The type change itself can be Minor/Major by subtype comparability;
    // value compatibility is checked separately and, if it fails, always wins
    // (a compatibility mismatch overrides a comparable-looking type change).
    if old.type_expr != new.type_expr {
        match classify_type_value_compatibility(ctx, new) {
            Some(value_mismatch) => diffs.push(value_mismatch),
            None => diffs.extend(classify_type(old, new)),
        }
    }
    diffs.extend(classify_configurable_features(old, new, &ctx.features_in_use));
    diffs
}

/// The full declare(...) resolution from spec.md §4.4.
pub fn decide(existing: Option<&Setting>, req: &DeclareRequest, ctx: &ClassifyContext) -> DeclarationOutcome {
    let Some(cur) = existing else {
        return if req.version == INITIAL_VERSION {
            DeclarationOutcome::Created
        } else {
            DeclarationOutcome::Mismatch {
                diffs: vec![AttributeDiff {
                    attribute: "version".to_string(),
                    level: DiffLevel::Mismatch,
                    detail: "a new setting must be declared at version 1.0".to_string(),
                }],
            }
        };
    };

    let old_attrs: Attrs = cur.into();
    let new_attrs: Attrs = req.into();

    if req.version < cur.version {
        let diffs = classify_diffs(&new_attrs, &old_attrs, ctx);
        return DeclarationOutcome::Outdated { latest_version: cur.version, diffs };
    }

    if req.version == cur.version {
        if old_attrs == new_attrs {
            return DeclarationOutcome::UpToDate;
        }
        let mut diffs = classify_diffs(&old_attrs, &new_attrs, ctx);
        for d in diffs.iter_mut() {
            d.level = DiffLevel::Mismatch;
        }
        return DeclarationOutcome::Mismatch { diffs };
    }

    // req.version > cur.version
    let diffs = classify_diffs(&old_attrs, &new_attrs, ctx);
    if diffs.iter().any(|d| d.level == DiffLevel::Mismatch) {
        return DeclarationOutcome::Rejected { diffs };
    }
    let max_level = diffs.iter().map(|d| d.level).max();
    let within_minor = matches!(max_level, None | Some(DiffLevel::Minor));
    let within_major = matches!(max_level, None | Some(DiffLevel::Minor) | Some(DiffLevel::Major));

    if req.version.0 == cur.version.0 && within_minor {
        DeclarationOutcome::Upgraded
    } else if req.version.0 > cur.version.0 && within_major {
        DeclarationOutcome::Upgraded
    } else {
        DeclarationOutcome::Rejected { diffs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_setting() -> Setting {
        Setting {
            name: "foo".to_string(),
            type_expr: TypeExpr::Int,
            default_value: Some(JsonValue::from(0)),
            configurable_features: BTreeSet::new(),
            metadata: HashMap::new(),
            aliases: BTreeSet::new(),
            version: (1, 0),
        }
    }

    fn empty_ctx() -> ClassifyContext {
        ClassifyContext { features_in_use: HashSet::new(), existing_rule_values: Vec::new(), rename_collides: false }
    }

    #[test]
    fn declares_new_setting_at_1_0() {
        let req = DeclareRequest {
            name: "foo".to_string(),
            configurable_features: BTreeSet::new(),
            type_expr: TypeExpr::Int,
            default_value: Some(JsonValue::from(0)),
            metadata: HashMap::new(),
            alias: None,
            version: (1, 0),
        };
        let outcome = decide(None, &req, &empty_ctx());
        assert!(matches!(outcome, DeclarationOutcome::Created));
    }

    #[test]
    fn new_setting_must_be_version_1_0() {
        let req = DeclareRequest {
            name: "foo".to_string(),
            configurable_features: BTreeSet::new(),
            type_expr: TypeExpr::Int,
            default_value: Some(JsonValue::from(0)),
            metadata: HashMap::new(),
            alias: None,
            version: (1, 1),
        };
        let outcome = decide(None, &req, &empty_ctx());
        assert!(matches!(outcome, DeclarationOutcome::Mismatch { .. }));
    }

    #[test]
    fn identical_redeclare_is_uptodate() {
        let cur = base_setting();
        let req = DeclareRequest {
            name: cur.name.clone(),
            configurable_features: cur.configurable_features.clone(),
            type_expr: cur.type_expr.clone(),
            default_value: cur.default_value.clone(),
            metadata: cur.metadata.clone(),
            alias: None,
            version: cur.version,
        };
        assert!(matches!(decide(Some(&cur), &req, &empty_ctx()), DeclarationOutcome::UpToDate));
    }

    #[test]
    fn scenario_3_declare_lifecycle() {
        let mut cur = base_setting();

        // Re-declare identical -> uptodate.
        let req_same = DeclareRequest {
            name: cur.name.clone(),
            configurable_features: cur.configurable_features.clone(),
            type_expr: cur.type_expr.clone(),
            default_value: cur.default_value.clone(),
            metadata: cur.metadata.clone(),
            alias: None,
            version: (1, 0),
        };
        assert!(matches!(decide(Some(&cur), &req_same, &empty_ctx()), DeclarationOutcome::UpToDate));

        // float, 1.1 -> upgraded (int <= float, minor).
        let req_float = DeclareRequest { type_expr: TypeExpr::Float, version: (1, 1), ..req_same.clone() };
        assert!(matches!(decide(Some(&cur), &req_float, &empty_ctx()), DeclarationOutcome::Upgraded));
        cur.type_expr = TypeExpr::Float;
        cur.version = (1, 1);

        // int, 1.0 -> outdated with diff {type: latest=float, level: minor}.
        let req_back = DeclareRequest { type_expr: TypeExpr::Int, version: (1, 0), ..req_same.clone() };
        match decide(Some(&cur), &req_back, &empty_ctx()) {
            DeclarationOutcome::Outdated { latest_version, diffs } => {
                assert_eq!(latest_version, (1, 1));
                assert!(diffs.iter().any(|d| d.attribute == "type" && d.level == DiffLevel::Minor));
            }
            other => panic!("expected Outdated, got {:?}", other),
        }

        // str, 1.2 -> rejected (not a valid super/subtype path; default 0 doesn't conform to str).
        let req_str = DeclareRequest { type_expr: TypeExpr::Str, version: (1, 2), ..req_same };
        assert!(matches!(decide(Some(&cur), &req_str, &empty_ctx()), DeclarationOutcome::Rejected { .. }));
    }

    #[test]
    fn scenario_6_type_change_unsafe_due_to_rule_value() {
        let mut cur = base_setting();
        cur.type_expr = TypeExpr::parse("Enum[low,mid,high]").unwrap();
        cur.version = (1, 0);

        let ctx = ClassifyContext {
            features_in_use: HashSet::new(),
            existing_rule_values: vec![JsonValue::from("low")],
            rename_collides: false,
        };

        let req = DeclareRequest {
            name: cur.name.clone(),
            configurable_features: cur.configurable_features.clone(),
            type_expr: TypeExpr::parse("Enum[mid,high]").unwrap(),
            default_value: cur.default_value.clone(),
            metadata: cur.metadata.clone(),
            alias: None,
            version: (2, 0),
        };
        match decide(Some(&cur), &req, &ctx) {
            DeclarationOutcome::Rejected { diffs } => {
                assert!(diffs.iter().any(|d| d.level == DiffLevel::Mismatch && d.attribute == "type"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[test]
    fn adding_configurable_feature_requires_major() {
        let cur = base_setting();
        let mut features = BTreeSet::new();
        features.insert("tenant".to_string());
        let req = DeclareRequest {
            name: cur.name.clone(),
            configurable_features: features,
            type_expr: cur.type_expr.clone(),
            default_value: cur.default_value.clone(),
            metadata: cur.metadata.clone(),
            alias: None,
            version: (1, 1),
        };
        // minor bump but a major-level change (added feature) -> rejected
        assert!(matches!(decide(Some(&cur), &req, &empty_ctx()), DeclarationOutcome::Rejected { .. }));

        let req_major = DeclareRequest { version: (2, 0), ..req };
        assert!(matches!(decide(Some(&cur), &req_major, &empty_ctx()), DeclarationOutcome::Upgraded));
    }

    #[test]
    fn removing_in_use_feature_is_always_mismatch() {
        let mut cur = base_setting();
        cur.configurable_features.insert("tenant".to_string());
        let in_use: HashSet<String> = HashSet::from(["tenant".to_string()]);
        let ctx = ClassifyContext { features_in_use: in_use, existing_rule_values: Vec::new(), rename_collides: false };

        let req = DeclareRequest {
            name: cur.name.clone(),
            configurable_features: BTreeSet::new(),
            type_expr: cur.type_expr.clone(),
            default_value: cur.default_value.clone(),
            metadata: cur.metadata.clone(),
            alias: None,
            version: (99, 0),
        };
        assert!(matches!(decide(Some(&cur), &req, &ctx), DeclarationOutcome::Rejected { .. }));
    }

    #[test]
    fn rename_collision_is_mismatch_even_at_major() {
        let cur = base_setting();
        let ctx = ClassifyContext { features_in_use: HashSet::new(), existing_rule_values: Vec::new(), rename_collides: true };
        let req = DeclareRequest {
            name: "taken".to_string(),
            configurable_features: cur.configurable_features.clone(),
            type_expr: cur.type_expr.clone(),
            default_value: cur.default_value.clone(),
            metadata: cur.metadata.clone(),
            alias: None,
            version: (5, 0),
        };
        assert!(matches!(decide(Some(&cur), &req, &ctx), DeclarationOutcome::Rejected { .. }));
    }
}
