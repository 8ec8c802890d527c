//! The typed value system for settings: grammar, canonicalization, value
//! conformance and the subtype partial order.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// A parsed, canonical setting type.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    Int,
    Float,
    Str,
    Bool,
    Enum(Vec<JsonValue>),
    Flag(Vec<JsonValue>),
    Sequence(Box<TypeExpr>),
    Mapping(Box<TypeExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeParseError(pub String);

impl fmt::Display for TypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid type expression: {}", self.0)
    }
}

impl std::error::Error for TypeParseError {}

/// Result of comparing two canonical types under the subtype relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equal,
    Less,
    Greater,
    Incomparable,
}

impl TypeExpr {
    /// Parses the wire textual form (`int`, `Enum[a,b]`, `Sequence<str>`, ...).
    pub fn parse(src: &str) -> Result<Self, TypeParseError> {
        let mut p = Parser::new(src);
        let t = p.parse_type()?;
        p.expect_end()?;
        Ok(t.canonicalize())
    }

    /// Renders the canonical textual form.
    pub fn format(&self) -> String {
        match self {
            TypeExpr::Int => "int".to_string(),
            TypeExpr::Float => "float".to_string(),
            TypeExpr::Str => "str".to_string(),
            TypeExpr::Bool => "bool".to_string(),
            TypeExpr::Enum(lits) => format!("Enum[{}]", format_literals(lits)),
            TypeExpr::Flag(lits) => format!("Flag[{}]", format_literals(lits)),
            TypeExpr::Sequence(inner) => format!("Sequence<{}>", inner.format()),
            TypeExpr::Mapping(inner) => format!("Mapping<{}>", inner.format()),
        }
    }

    /// Sorts and deduplicates Enum/Flag literal lists; recurses into Sequence/Mapping.
    /// Idempotent: `canonicalize(canonicalize(t)) == canonicalize(t)`.
    pub fn canonicalize(self) -> Self {
        match self {
            TypeExpr::Enum(lits) => TypeExpr::Enum(canonical_literals(lits)),
            TypeExpr::Flag(lits) => TypeExpr::Flag(canonical_literals(lits)),
            TypeExpr::Sequence(inner) => TypeExpr::Sequence(Box::new(inner.canonicalize())),
            TypeExpr::Mapping(inner) => TypeExpr::Mapping(Box::new(inner.canonicalize())),
            other => other,
        }
    }

    /// Checks that `v` conforms to this type (`T ⊢ v`).
    pub fn validate(&self, v: &JsonValue) -> bool {
        match self {
            TypeExpr::Int => v.is_i64() || v.is_u64(),
            TypeExpr::Float => v.is_number(),
            TypeExpr::Str => v.is_string(),
            TypeExpr::Bool => v.is_boolean(),
            TypeExpr::Enum(lits) => lits.iter().any(|l| l == v),
            TypeExpr::Flag(lits) => match v.as_array() {
                Some(arr) => arr.iter().all(|e| lits.iter().any(|l| l == e)),
                None => false,
            },
            TypeExpr::Sequence(inner) => match v.as_array() {
                Some(arr) => arr.iter().all(|e| inner.validate(e)),
                None => false,
            },
            TypeExpr::Mapping(inner) => match v.as_object() {
                Some(obj) => obj.values().all(|e| inner.validate(e)),
                None => false,
            },
        }
    }

    /// Computes the subtype relation `self ≤/≥/= other`, or `Incomparable`.
    pub fn compare(&self, other: &TypeExpr) -> Comparison {
        use Comparison::*;
        match (self, other) {
            (TypeExpr::Int, TypeExpr::Int) => Equal,
            (TypeExpr::Float, TypeExpr::Float) => Equal,
            (TypeExpr::Str, TypeExpr::Str) => Equal,
            (TypeExpr::Bool, TypeExpr::Bool) => Equal,
            (TypeExpr::Int, TypeExpr::Float) => Less,
            (TypeExpr::Float, TypeExpr::Int) => Greater,
            (TypeExpr::Enum(a), TypeExpr::Enum(b)) => compare_literal_sets(a, b),
            (TypeExpr::Flag(a), TypeExpr::Flag(b)) => compare_literal_sets(a, b),
            (TypeExpr::Sequence(a), TypeExpr::Sequence(b)) => a.compare(b),
            (TypeExpr::Mapping(a), TypeExpr::Mapping(b)) => a.compare(b),
            _ => Incomparable,
        }
    }
}

fn literal_key(v: &JsonValue) -> String {
    serde_json::to_string(v).unwrap_or_default()
}

/// Sorts literals by their canonical JSON text form and drops duplicates (by that form).
fn canonical_literals(lits: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut by_key: BTreeMap<String, JsonValue> = BTreeMap::new();
    for l in lits {
        by_key.entry(literal_key(&l)).or_insert(l);
    }
    by_key.into_values().collect()
}

fn compare_literal_sets(a: &[JsonValue], b: &[JsonValue]) -> Comparison {
    let a_keys: std::collections::BTreeSet<String> = a.iter().map(literal_key).collect();
    let b_keys: std::collections::BTreeSet<String> = b.iter().map(literal_key).collect();
    if a_keys == b_keys {
        Comparison::Equal
    } else if a_keys.is_subset(&b_keys) {
        Comparison::Less
    } else if b_keys.is_subset(&a_keys) {
        Comparison::Greater
    } else {
        Comparison::Incomparable
    }
}

fn format_literals(lits: &[JsonValue]) -> String {
    canonical_literals(lits.to_vec())
        .iter()
        .map(|l| serde_json::to_string(l).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(",")
}

/// Hand-rolled recursive-descent parser for the type grammar. The grammar is
/// small enough (four keywords, two brackets) that a scanner over `&str` is
/// clearer than pulling in a parser-combinator crate for it.
struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src: src.trim(), pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn expect_end(&mut self) -> Result<(), TypeParseError> {
        if self.rest().trim().is_empty() {
            Ok(())
        } else {
            Err(TypeParseError(format!("unexpected trailing input: {}", self.rest())))
        }
    }

    fn consume_prefix(&mut self, prefix: &str) -> bool {
        let rest = self.rest().trim_start();
        let skipped = self.rest().len() - rest.len();
        if rest.starts_with(prefix) {
            self.pos += skipped + prefix.len();
            true
        } else {
            false
        }
    }

    fn parse_type(&mut self) -> Result<TypeExpr, TypeParseError> {
        if self.consume_prefix("int") {
            return Ok(TypeExpr::Int);
        }
        if self.consume_prefix("float") {
            return Ok(TypeExpr::Float);
        }
        if self.consume_prefix("str") {
            return Ok(TypeExpr::Str);
        }
        if self.consume_prefix("bool") {
            return Ok(TypeExpr::Bool);
        }
        if self.consume_prefix("Enum[") {
            let lits = self.parse_literal_list(']')?;
            return Ok(TypeExpr::Enum(lits));
        }
        if self.consume_prefix("Flag[") {
            let lits = self.parse_literal_list(']')?;
            return Ok(TypeExpr::Flag(lits));
        }
        if self.consume_prefix("Sequence<") {
            let inner = self.parse_type()?;
            self.expect_char('>')?;
            return Ok(TypeExpr::Sequence(Box::new(inner)));
        }
        if self.consume_prefix("Mapping<") {
            let inner = self.parse_type()?;
            self.expect_char('>')?;
            return Ok(TypeExpr::Mapping(Box::new(inner)));
        }
        Err(TypeParseError(format!("unrecognized type at: {}", self.rest())))
    }

    fn expect_char(&mut self, c: char) -> Result<(), TypeParseError> {
        let rest = self.rest().trim_start();
        let skipped = self.rest().len() - rest.len();
        if let Some(stripped) = rest.strip_prefix(c) {
            self.pos += skipped + (rest.len() - stripped.len());
            Ok(())
        } else {
            Err(TypeParseError(format!("expected '{}' at: {}", c, self.rest())))
        }
    }

    fn parse_literal_list(&mut self, close: char) -> Result<Vec<JsonValue>, TypeParseError> {
        let mut out = Vec::new();
        loop {
            let rest = self.rest().trim_start();
            if rest.starts_with(close) {
                let skipped = self.rest().len() - rest.len();
                self.pos += skipped + close.len_utf8();
                break;
            }
            let end = rest
                .find(|c| c == ',' || c == close)
                .ok_or_else(|| TypeParseError("unterminated literal list".to_string()))?;
            let raw = rest[..end].trim();
            if raw.is_empty() {
                return Err(TypeParseError("empty literal in list".to_string()));
            }
            out.push(parse_literal(raw)?);
            let consumed = self.rest().len() - rest.len() + end;
            self.pos += consumed;
            let rest2 = self.rest().trim_start();
            if rest2.starts_with(',') {
                let skipped = self.rest().len() - rest2.len();
                self.pos += skipped + 1;
            }
        }
        Ok(out)
    }
}

/// Parses one Enum/Flag literal: a JSON scalar (bool/number/quoted string) or,
/// for convenience, a bare word which is treated as a string literal.
fn parse_literal(raw: &str) -> Result<JsonValue, TypeParseError> {
    if let Ok(v) = serde_json::from_str::<JsonValue>(raw) {
        if v.is_string() || v.is_boolean() || v.is_number() {
            return Ok(v);
        }
        return Err(TypeParseError(format!("literal must be a scalar: {}", raw)));
    }
    Ok(JsonValue::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primitives() {
        assert_eq!(TypeExpr::parse("int").unwrap(), TypeExpr::Int);
        assert_eq!(TypeExpr::parse("float").unwrap(), TypeExpr::Float);
        assert_eq!(TypeExpr::parse("str").unwrap(), TypeExpr::Str);
        assert_eq!(TypeExpr::parse("bool").unwrap(), TypeExpr::Bool);
    }

    #[test]
    fn enum_canonicalizes_order_and_duplicates() {
        let a = TypeExpr::parse("Enum[low,mid,high]").unwrap();
        let b = TypeExpr::parse("Enum[high,mid,low,low]").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn flag_validates_array_regardless_of_order() {
        let t = TypeExpr::parse("Flag[a,b,c]").unwrap();
        assert!(t.validate(&serde_json::json!(["b", "a"])));
        assert!(!t.validate(&serde_json::json!(["b", "z"])));
    }

    #[test]
    fn sequence_and_mapping_recurse() {
        let seq = TypeExpr::parse("Sequence<int>").unwrap();
        assert!(seq.validate(&serde_json::json!([1, 2, 3])));
        assert!(!seq.validate(&serde_json::json!([1, "x"])));

        let map = TypeExpr::parse("Mapping<str>").unwrap();
        assert!(map.validate(&serde_json::json!({"a": "x", "b": "y"})));
        assert!(!map.validate(&serde_json::json!({"a": 1})));
    }

    #[test]
    fn subtype_relation() {
        assert_eq!(TypeExpr::Int.compare(&TypeExpr::Float), Comparison::Less);
        let low = TypeExpr::parse("Enum[low]").unwrap();
        let low_high = TypeExpr::parse("Enum[low,high]").unwrap();
        assert_eq!(low.compare(&low_high), Comparison::Less);
        assert_eq!(low_high.compare(&low), Comparison::Greater);

        let flag_low = TypeExpr::parse("Flag[low]").unwrap();
        assert_eq!(flag_low.compare(&low), Comparison::Incomparable);

        let seq_int = TypeExpr::parse("Sequence<int>").unwrap();
        let seq_float = TypeExpr::parse("Sequence<float>").unwrap();
        assert_eq!(seq_int.compare(&seq_float), Comparison::Less);

        assert_eq!(TypeExpr::Bool.compare(&low), Comparison::Incomparable);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let t = TypeExpr::parse("Flag[b,a,a]").unwrap().canonicalize();
        assert_eq!(t.clone().canonicalize(), t);
    }

    #[test]
    fn parse_then_format_is_identity_on_canonical_types() {
        for src in ["int", "float", "str", "bool", "Sequence<int>", "Mapping<bool>"] {
            let t = TypeExpr::parse(src).unwrap();
            let formatted = t.format();
            assert_eq!(TypeExpr::parse(&formatted).unwrap(), t);
        }
        let enum_t = TypeExpr::parse("Enum[b,a,c]").unwrap();
        let again = TypeExpr::parse(&enum_t.format()).unwrap();
        assert_eq!(again, enum_t);
    }

    #[test]
    fn rejects_malformed_type() {
        assert!(TypeExpr::parse("Sequence<int").is_err());
        assert!(TypeExpr::parse("Wat").is_err());
    }
}
