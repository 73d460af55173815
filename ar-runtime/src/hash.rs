use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical JSON: object keys sorted, no whitespace. Used so artifact
/// body equality is order-independent.
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
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
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
        other => out.push_str(&other.to_string()),
    }
}

/// SHA-256 over the canonical encoding, hex-encoded.
pub fn body_hash(value: &Value) -> String {
    let digest = Sha256::digest(canonical_json(value).as_bytes());
    format!("{:x}", digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = json!({"b": 1, "a": {"z": true, "y": [2, 1]}});
        assert_eq!(canonical_json(&value), r#"{"a":{"y":[2,1],"z":true},"b":1}"#);
    }

    #[test]
    fn test_hash_is_order_independent() {
        let first: Value = serde_json::from_str(r#"{"x": 1, "y": {"a": "b", "c": "d"}}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"y": {"c": "d", "a": "b"}, "x": 1}"#).unwrap();
        assert_eq!(body_hash(&first), body_hash(&second));
    }

    #[test]
    fn test_hash_detects_changes() {
        let first = json!({"image": "node:24-alpine3.21"});
        let second = json!({"image": "node:25-alpine3.21"});
        assert_ne!(body_hash(&first), body_hash(&second));
    }
}
