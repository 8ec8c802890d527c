//! The query-engine's pure filtering predicate (component E) plus the
//! ETag/cache-recency stamp it is paired with.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

/// What a caller is allowed to see for a single context feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeatureFilter {
    Any,
    Values(HashSet<String>),
}

/// The full `context_filters` query parameter: either the top-level wildcard
/// (accept every rule) or a per-feature filter map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextFilter {
    All,
    Features(HashMap<String, FeatureFilter>),
}

/// Accepts a rule's `feature_values` iff, for every condition the rule
/// carries, the filter explicitly allows that (feature, value) pair.
/// Per spec.md §4.5: a rule with no condition on feature F is never rejected
/// by the filter on F; a filter entry missing for a feature the rule *does*
/// condition on rejects the rule, unless the filter is the top-level `*`.
pub fn filter_matches(feature_values: &HashMap<String, String>, filter: &ContextFilter) -> bool {
    match filter {
        ContextFilter::All => true,
        ContextFilter::Features(map) => feature_values.iter().all(|(feature, value)| match map.get(feature) {
            None => false,
            Some(FeatureFilter::Any) => true,
            Some(FeatureFilter::Values(values)) => values.contains(value),
        }),
    }
}

/// Computes the `ETag` for a query response from opaque version stamps: the
/// settings/rules generation counters and the feature order. Any write path
/// that changes a stamp changes the ETag; the value itself carries no
/// meaning beyond equality.
pub fn compute_etag(settings_stamp: &str, rules_stamp: &str, feature_order: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(settings_stamp.as_bytes());
    hasher.update(b"\0");
    hasher.update(rules_stamp.as_bytes());
    hasher.update(b"\0");
    hasher.update(feature_order.join(",").as_bytes());
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn wildcard_filter_accepts_everything() {
        assert!(filter_matches(&fv(&[("account", "john")]), &ContextFilter::All));
        assert!(filter_matches(&fv(&[]), &ContextFilter::All));
    }

    #[test]
    fn rule_with_no_condition_on_feature_is_never_rejected_by_it() {
        let filter = ContextFilter::Features(HashMap::from([(
            "account".to_string(),
            FeatureFilter::Values(HashSet::from(["john".to_string()])),
        )]));
        // rule conditions only on "user", which the filter doesn't mention at all for this rule
        assert!(filter_matches(&fv(&[]), &filter));
    }

    #[test]
    fn filter_rejects_rule_with_out_of_scope_condition() {
        let filter = ContextFilter::Features(HashMap::from([(
            "account".to_string(),
            FeatureFilter::Values(HashSet::from(["john".to_string(), "jim".to_string()])),
        )]));
        // rule conditions on "theme", which the filter never mentions -> rejected
        assert!(!filter_matches(&fv(&[("theme", "dark")]), &filter));
    }

    #[test]
    fn scenario_two_filter_rejects_theme_conditioned_rule() {
        let filter = ContextFilter::Features(HashMap::from([
            (
                "account".to_string(),
                FeatureFilter::Values(HashSet::from(["john".to_string(), "jim".to_string()])),
            ),
            ("user".to_string(), FeatureFilter::Any),
        ]));
        assert!(filter_matches(&fv(&[("account", "john")]), &filter));
        assert!(filter_matches(&fv(&[("account", "jim")]), &filter));
        assert!(filter_matches(&fv(&[("account", "jim"), ("user", "admin")]), &filter));
        assert!(filter_matches(&fv(&[("user", "guest")]), &filter));
        assert!(!filter_matches(&fv(&[("user", "guest"), ("theme", "dark")]), &filter));
    }

    #[test]
    fn etag_changes_when_any_input_changes() {
        let order = vec!["account".to_string()];
        let a = compute_etag("s1", "r1", &order);
        let b = compute_etag("s2", "r1", &order);
        let c = compute_etag("s1", "r1", &order);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
