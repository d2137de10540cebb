//! Helpers over `serde_json::Value` configuration trees.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::Value;

/// Resolve a dot-separated path against a configuration tree.
///
/// Numeric segments index into arrays: `rules.0.port`.
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(root, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

/// Short name of a value's JSON kind, used in mismatch diagnostics.
pub fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Flatten a mapping into `dot.path → leaf` pairs.
///
/// Arrays are indexed numerically. Empty objects and arrays are kept as leaf
/// values so that a container appearing or disappearing is still a field.
/// The result is ordered by path, independent of key insertion order.
///
/// Keys are escaped (`.` as `\.`, `\` as `\\`), so a literal `"a.b"` key and
/// a nested `a` → `b` stay two distinct paths.
pub fn flatten(map: &serde_json::Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for (key, value) in map {
        flatten_into(escape_key(key).into_owned(), value, &mut out);
    }
    out
}

fn escape_key(key: &str) -> Cow<'_, str> {
    if key.contains(['.', '\\']) {
        Cow::Owned(key.replace('\\', "\\\\").replace('.', "\\."))
    } else {
        Cow::Borrowed(key)
    }
}

fn flatten_into(prefix: String, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(format!("{prefix}.{}", escape_key(key)), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(format!("{prefix}.{i}"), child, out);
            }
        }
        leaf => {
            out.insert(prefix, leaf.clone());
        }
    }
}

/// Render a configuration as `path value` lines for embedding queries.
pub fn describe(config: &Value) -> String {
    let Value::Object(map) = config else {
        return config.to_string();
    };
    flatten(map)
        .into_iter()
        .map(|(path, value)| match value {
            Value::String(s) => format!("{path} {s}"),
            other => format!("{path} {other}"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_nested_and_indexed() {
        let cfg = json!({"encryption": {"enabled": true}, "rules": [{"port": 22}, {"port": 443}]});
        assert_eq!(resolve_path(&cfg, "encryption.enabled"), Some(&json!(true)));
        assert_eq!(resolve_path(&cfg, "rules.1.port"), Some(&json!(443)));
        assert_eq!(resolve_path(&cfg, "rules.2.port"), None);
        assert_eq!(resolve_path(&cfg, "rules.x"), None);
        assert_eq!(resolve_path(&cfg, "encryption.enabled.deeper"), None);
    }

    #[test]
    fn numbers_compare_by_value() {
        assert!(json_eq(&json!(1), &json!(1.0)));
        assert!(json_eq(&json!({"a": [1, 2]}), &json!({"a": [1.0, 2]})));
        assert!(!json_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn flatten_keeps_empty_containers() {
        let v = json!({"a": {"b": 1, "c": []}, "d": {}, "e": [true, {"f": null}]});
        let flat = flatten(v.as_object().unwrap());
        let paths: Vec<&str> = flat.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["a.b", "a.c", "d", "e.0", "e.1.f"]);
        assert_eq!(flat["a.c"], json!([]));
    }

    #[test]
    fn dotted_keys_do_not_collide_with_nesting() {
        let v = json!({"a.b": 1, "a": {"b": 2, "c\\d": 3}});
        let flat = flatten(v.as_object().unwrap());
        assert_eq!(flat.len(), 3);
        assert_eq!(flat["a.b"], json!(2));
        assert_eq!(flat[r"a\.b"], json!(1));
        assert_eq!(flat[r"a.c\\d"], json!(3));
    }

    #[test]
    fn describe_lists_leaves() {
        let text = describe(&json!({"name": "logs", "tls": {"min": 1.2}}));
        assert_eq!(text, "name logs\ntls.min 1.2");
    }
}
