//! Deterministic fingerprints for cacheable units of work.
//!
//! A fingerprint is `"{namespace}:{sha256}"` where the hash covers a
//! canonical JSON rendering of the supplied fields: object keys are sorted
//! at every depth, so two logically equal inputs always hash the same no
//! matter how their maps were built.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CacheError;

/// Hash of a namespace plus canonicalized fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of `fields` within `namespace`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Json` if `fields` cannot be represented as JSON
    /// (for example a map with non-string keys).
    pub fn generate<T: Serialize + ?Sized>(
        namespace: &str,
        fields: &T,
    ) -> Result<Self, CacheError> {
        let value = serde_json::to_value(fields)?;
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(Self(format!("{}:{}", namespace, hex::encode(hasher.finalize()))))
    }

    /// Wraps an already computed key, e.g. one read back from disk.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace part of the key.
    pub fn namespace(&self) -> &str {
        self.0.split(':').next().unwrap_or("")
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
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
    use std::collections::HashMap;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = Fingerprint::generate("analysis", &json!({"name": "a/b", "revision": "1"})).unwrap();
        let b = Fingerprint::generate("analysis", &json!({"name": "a/b", "revision": "1"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.namespace(), "analysis");
        // namespace + ':' + 64 hex chars
        assert_eq!(a.as_str().len(), "analysis:".len() + 64);
    }

    #[test]
    fn test_fingerprint_changes_with_revision() {
        let a = Fingerprint::generate("analysis", &json!({"name": "a/b", "revision": "1"})).unwrap();
        let b = Fingerprint::generate("analysis", &json!({"name": "a/b", "revision": "2"})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_namespace_separates() {
        let fields = json!({"name": "a/b"});
        let a = Fingerprint::generate("analysis", &fields).unwrap();
        let b = Fingerprint::generate("readme", &fields).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_ignores_map_order() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("zeta", 1), ("alpha", 2), ("mid", 3)] {
            first.insert(k.to_string(), v);
        }
        for (k, v) in [("mid", 3), ("zeta", 1), ("alpha", 2)] {
            second.insert(k.to_string(), v);
        }
        let a = Fingerprint::generate("ns", &first).unwrap();
        let b = Fingerprint::generate("ns", &second).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_canonical_nested() {
        let mut out = String::new();
        write_canonical(&json!({"b": [1, {"d": 1, "c": "x"}], "a": null}), &mut out);
        assert_eq!(out, r#"{"a":null,"b":[1,{"c":"x","d":1}]}"#);
    }
}
