//! Rule value object and the canonical-key helper that the rule store uses
//! for uniqueness and for ordering `feature_values` in query responses.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: Uuid,
    pub setting: String,
    pub feature_values: HashMap<String, String>,
    pub value: JsonValue,
    pub metadata: HashMap<String, JsonValue>,
}

/// Serializes `feature_values` for uniqueness/ordering purposes by sorting
/// keys in the registry's current feature order. Missing keys are wildcards
/// and are never materialized as `"*"` — they're simply absent.
pub fn canonical_feature_values(
    feature_order: &[String],
    feature_values: &HashMap<String, String>,
) -> Vec<(String, String)> {
    feature_order
        .iter()
        .filter_map(|f| feature_values.get(f).map(|v| (f.clone(), v.clone())))
        .collect()
}

/// A stable string key used for uniqueness checks (`(setting, canonical
/// feature_values)` must be unique) and as the `search` lookup key.
pub fn canonical_key(setting: &str, feature_order: &[String], feature_values: &HashMap<String, String>) -> String {
    let ordered = canonical_feature_values(feature_order, feature_values);
    let mut s = String::new();
    s.push_str(setting);
    for (k, v) in ordered {
        s.push('\u{1}');
        s.push_str(&k);
        s.push('=');
        s.push_str(&v);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_ignores_insertion_order() {
        let order = vec!["account".to_string(), "user".to_string(), "theme".to_string()];
        let mut a = HashMap::new();
        a.insert("theme".to_string(), "dark".to_string());
        a.insert("account".to_string(), "jim".to_string());
        let mut b = HashMap::new();
        b.insert("account".to_string(), "jim".to_string());
        b.insert("theme".to_string(), "dark".to_string());
        assert_eq!(
            canonical_key("cache_size", &order, &a),
            canonical_key("cache_size", &order, &b)
        );
    }

    #[test]
    fn canonical_key_differs_by_setting() {
        let order = vec!["account".to_string()];
        let mut fv = HashMap::new();
        fv.insert("account".to_string(), "jim".to_string());
        assert_ne!(
            canonical_key("cache_size", &order, &fv),
            canonical_key("other_setting", &order, &fv)
        );
    }
}
