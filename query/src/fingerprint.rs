//! Argument fingerprinting.
//!
//! Two calls with equivalent arguments must hash to the same 32-bit digest,
//! independent of the caller's field order, and the digest must be stable
//! across process restarts so a persisted Query Key still addresses the
//! right KV record after a reload.

use serde::Serialize;
use serde_json::Value;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

pub(crate) fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Digest of a query's argument object: an empty object collapses to a
/// fixed "no args" sentinel before hashing, and object keys are sorted
/// lexicographically so field order never affects the result.
pub fn fingerprint_args<T: Serialize>(args: &T) -> u32 {
    let value = serde_json::to_value(args).unwrap_or(Value::Null);
    let canonical = canonicalize(&value);
    fnv1a(canonical.as_bytes())
}

fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) if map.is_empty() => "\"__no_args__\"".to_string(),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                out.push_str(&canonicalize(&map[*key]));
            }
            out.push('}');
            out
        }
        Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonicalize(item));
            }
            out.push(']');
            out
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Digest of (definition-id, argument fingerprint) — the Query Key.
pub fn query_key(definition_id: &str, args_fingerprint: u32) -> u32 {
    let mut bytes = definition_id.as_bytes().to_vec();
    bytes.extend_from_slice(&args_fingerprint.to_le_bytes());
    fnv1a(&bytes)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn field_order_does_not_matter() {
        let a = json!({"id": "123", "draft": true});
        let b = json!({"draft": true, "id": "123"});
        assert_eq!(fingerprint_args(&a), fingerprint_args(&b));
    }

    #[test]
    fn empty_object_collapses_to_sentinel() {
        let empty = json!({});
        let explicit_sentinel = fingerprint_args(&json!("__no_args__"));
        assert_eq!(fingerprint_args(&empty), explicit_sentinel);
    }

    #[test]
    fn distinct_args_hash_differently() {
        let a = json!({"id": "1"});
        let b = json!({"id": "2"});
        assert_ne!(fingerprint_args(&a), fingerprint_args(&b));
    }

    #[test]
    fn query_key_is_stable_across_calls() {
        let k1 = query_key("getUser", fingerprint_args(&json!({"id": "1"})));
        let k2 = query_key("getUser", fingerprint_args(&json!({"id": "1"})));
        assert_eq!(k1, k2);
    }

    #[test]
    fn query_key_differs_by_definition() {
        let args = fingerprint_args(&json!({"id": "1"}));
        assert_ne!(query_key("getUser", args), query_key("getPost", args));
    }
}
