//! Content rows.
//!
//! A content row is an untyped map from field slug to JSON value, shaped by
//! the owning model. Relational writes embed child submaps (`part`) or
//! sequences of submaps (`collection`) that the engine interprets after the
//! parent row is persisted.

use serde_json::{Map, Value};

/// An untyped row: field slug -> value.
pub type Content = Map<String, Value>;

/// In-memory marker threaded into child content during recursive collection
/// writes so child hooks can observe the parent under construction. Never
/// persisted: write payloads are built by folding fields, and no field
/// claims this key.
pub const PARENT_KEY: &str = "_parent";

/// Merge `over` on top of `base`: keys present in `over` win.
pub fn merge(base: &Content, over: &Content) -> Content {
    let mut out = base.clone();
    for (k, v) in over {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// Read an integer, accepting JSON numbers and numeric strings.
pub fn get_i64(row: &Content, key: &str) -> Option<i64> {
    match row.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a string value.
pub fn get_str<'a>(row: &'a Content, key: &str) -> Option<&'a str> {
    row.get(key).and_then(Value::as_str)
}

/// Read a boolean, accepting JSON booleans, `"true"`/`"false"` strings, and
/// 0/1 integers (SQLite stores booleans as integers).
pub fn get_bool(row: &Content, key: &str) -> Option<bool> {
    match row.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Content {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn merge_prefers_overlay() {
        let base = row(json!({"a": 1, "b": 2}));
        let over = row(json!({"b": 9, "c": 3}));
        let merged = merge(&base, &over);
        assert_eq!(merged.get("a"), Some(&json!(1)));
        assert_eq!(merged.get("b"), Some(&json!(9)));
        assert_eq!(merged.get("c"), Some(&json!(3)));
    }

    #[test]
    fn coercing_accessors() {
        let r = row(json!({"n": "42", "b": 1, "t": "true", "s": "x"}));
        assert_eq!(get_i64(&r, "n"), Some(42));
        assert_eq!(get_bool(&r, "b"), Some(true));
        assert_eq!(get_bool(&r, "t"), Some(true));
        assert_eq!(get_i64(&r, "s"), None);
        assert_eq!(get_bool(&r, "s"), None);
    }
}
