//! Pure ordering logic for the context-feature registry. Persistence lives in
//! `storage::context_feature_store`; this module is the part of component C
//! that is worth unit-testing without a database.

/// A feature name is valid per spec.md §3: `[A-Za-z0-9_-]+`.
pub fn is_valid_feature_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pivot<'a> {
    Before(&'a str),
    After(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderError {
    NotFound(String),
    PivotNotFound(String),
}

/// Repositions `name` within `order` relative to `pivot`.
///
/// The semantics are "remove, then insert at the pivot position" — the pivot
/// index is computed *after* removal, per spec.md §4.2. `move(a, before=a)`
/// and `move(a, after=a)` are no-ops (the pivot degenerates to `name`'s own
/// position once it is removed, since it's no longer in the list to search
/// for as a pivot — handled explicitly below).
pub fn reorder(order: &[String], name: &str, pivot: Pivot<'_>) -> Result<Vec<String>, ReorderError> {
    if !order.iter().any(|n| n == name) {
        return Err(ReorderError::NotFound(name.to_string()));
    }

    let pivot_name = match pivot {
        Pivot::Before(p) => p,
        Pivot::After(p) => p,
    };
    if pivot_name == name {
        return Ok(order.to_vec());
    }

    let mut remaining: Vec<String> = order.iter().filter(|n| n.as_str() != name).cloned().collect();
    let pivot_index = remaining
        .iter()
        .position(|n| n == pivot_name)
        .ok_or_else(|| ReorderError::PivotNotFound(pivot_name.to_string()))?;

    let insert_at = match pivot {
        Pivot::Before(_) => pivot_index,
        Pivot::After(_) => pivot_index + 1,
    };
    remaining.insert(insert_at, name.to_string());
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> Vec<String> {
        vec!["account", "user", "theme"].into_iter().map(String::from).collect()
    }

    #[test]
    fn move_before_repositions() {
        let r = reorder(&order(), "theme", Pivot::Before("account")).unwrap();
        assert_eq!(r, vec!["theme", "account", "user"]);
    }

    #[test]
    fn move_after_repositions() {
        let r = reorder(&order(), "account", Pivot::After("theme")).unwrap();
        assert_eq!(r, vec!["user", "theme", "account"]);
    }

    #[test]
    fn move_to_self_is_noop() {
        let r1 = reorder(&order(), "user", Pivot::Before("user")).unwrap();
        assert_eq!(r1, order());
        let r2 = reorder(&order(), "user", Pivot::After("user")).unwrap();
        assert_eq!(r2, order());
    }

    #[test]
    fn unknown_name_errors() {
        assert_eq!(
            reorder(&order(), "nope", Pivot::Before("account")),
            Err(ReorderError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn unknown_pivot_errors() {
        assert_eq!(
            reorder(&order(), "account", Pivot::Before("nope")),
            Err(ReorderError::PivotNotFound("nope".to_string()))
        );
    }

    #[test]
    fn feature_name_validation() {
        assert!(is_valid_feature_name("account-id_2"));
        assert!(!is_valid_feature_name(""));
        assert!(!is_valid_feature_name("has space"));
    }
}
