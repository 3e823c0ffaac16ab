//! Deterministic cache keys
//!
//! A key is the SHA-256 of (service, endpoint, canonical params). Object keys inside
//! `params` are sorted before hashing so insertion order never changes the key.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Compute the storage key for a (service, endpoint, params) triple
pub fn cache_key(service: &str, endpoint: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(service.as_bytes());
    hasher.update([0u8]);
    hasher.update(endpoint.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical_json(params).as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize JSON with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
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
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_ignores_param_order() {
        let mut a = serde_json::Map::new();
        a.insert("lat".into(), json!(44.42));
        a.insert("lon".into(), json!(26.10));
        let mut b = serde_json::Map::new();
        b.insert("lon".into(), json!(26.10));
        b.insert("lat".into(), json!(44.42));

        assert_eq!(
            cache_key("weather", "current", &Value::Object(a)),
            cache_key("weather", "current", &Value::Object(b))
        );
    }

    #[test]
    fn test_key_distinguishes_inputs() {
        let params = json!({"lat": 44.42, "lon": 26.10});
        let base = cache_key("weather", "current", &params);

        assert_ne!(base, cache_key("weather", "forecast", &params));
        assert_ne!(base, cache_key("pollution", "current", &params));
        assert_ne!(
            base,
            cache_key("weather", "current", &json!({"lat": 44.42, "lon": 26.11}))
        );
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn test_separator_prevents_ambiguous_concatenation() {
        let params = json!({});
        assert_ne!(
            cache_key("ab", "c", &params),
            cache_key("a", "bc", &params)
        );
    }

    #[test]
    fn test_canonical_json_nested() {
        let value = json!({"b": [ {"z": 1, "a": 2} ], "a": null});
        assert_eq!(canonical_json(&value), r#"{"a":null,"b":[{"a":2,"z":1}]}"#);
    }
}
