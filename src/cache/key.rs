//! Content-addressed cache key derivation.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Derive a content-addressable cache key: the first 16 bytes of a
/// SHA-256 digest of the canonical JSON form of `input`.
///
/// "Canonical" here means the `serde_json::Value` form with object keys in
/// their natural (sorted) `BTreeMap`-backed order — `serde_json::to_value`
/// followed by re-serialization through a `BTreeMap<String, Value>`
/// whenever the top level is an object, so that two logically identical
/// inputs serialized in different field orders hash identically.
#[must_use]
pub fn canonical_key(input: &impl Serialize) -> Vec<u8> {
    let value = serde_json::to_value(input).unwrap_or(serde_json::Value::Null);
    let canonical = canonicalize(&value);
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    digest[..16].to_vec()
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// Hex-encode a key for use in log lines / debug output.
#[must_use]
pub fn key_to_hex(key: &[u8]) -> String {
    hex::encode(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }

    #[test]
    fn different_inputs_produce_different_keys() {
        let a = json!({"a": 1});
        let b = json!({"a": 2});
        assert_ne!(canonical_key(&a), canonical_key(&b));
    }

    #[test]
    fn key_is_sixteen_bytes() {
        assert_eq!(canonical_key(&json!({"x": "y"})).len(), 16);
    }
}
