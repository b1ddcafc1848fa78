//! Value policy.
//!
//! Reactive values are `serde_json::Value`s. Equality is deep structural
//! equality as implemented by `Value: PartialEq`: arrays element-wise and
//! in order, objects as key/value sets, numbers by JSON representation (so
//! `1` and `1.0` differ). The same rule drives write suppression, computed
//! cut-off and binding re-render suppression.

use serde::Serialize;
use serde_json::Value;

/// Coarse classification of a value, used to detect key collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// `null`
    Null,
    /// `true` / `false`
    Bool,
    /// Any JSON number.
    Number,
    /// A string.
    String,
    /// An array.
    Array,
    /// An object.
    Object,
}

impl ValueKind {
    /// Classify a value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// `Null` is compatible with everything; otherwise kinds must match.
    pub fn is_compatible(self, other: ValueKind) -> bool {
        self == ValueKind::Null || other == ValueKind::Null || self == other
    }
}

/// Truthiness used by branch predicates.
///
/// `null`, `false`, `0`, `""`, `[]` and `{}` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Display form used by `format`: strings without quotes, `null` as the
/// empty string, everything else as compact JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn null_is_compatible_with_anything() {
        assert!(ValueKind::Null.is_compatible(ValueKind::Array));
        assert!(ValueKind::String.is_compatible(ValueKind::Null));
        assert!(!ValueKind::String.is_compatible(ValueKind::Number));
    }

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!(0.0)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!([])));
        assert!(!truthy(&json!({})));
        assert!(truthy(&json!(-1)));
        assert!(truthy(&json!("no")));
        assert!(truthy(&json!([0])));
    }

    #[test]
    fn equality_is_deep_and_numeric_repr_sensitive() {
        assert_eq!(json!({"a": [1, {"b": 2}]}), json!({"a": [1, {"b": 2}]}));
        assert_ne!(json!([1, 2]), json!([2, 1]));
        assert_ne!(json!(1), json!(1.0));
    }

    #[test]
    fn display_unquotes_strings() {
        assert_eq!(display(&json!("hi")), "hi");
        assert_eq!(display(&json!(3)), "3");
        assert_eq!(display(&json!(null)), "");
        assert_eq!(display(&json!([1])), "[1]");
    }
}
