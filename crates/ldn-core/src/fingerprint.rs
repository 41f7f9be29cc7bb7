//! Deterministic message identity
//!
//! A fingerprint is the SHA-256 of a notification's canonical JSON form:
//! object keys sorted by UTF-8 byte order, no whitespace, and integral
//! floats written as integers. Two messages with the same field values hash
//! the same regardless of the order their producer serialized them in.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::{LdnError, Result};

/// Hex length of a SHA-256 digest
const FINGERPRINT_LEN: usize = 64;

/// Largest integer an f64 represents exactly (2^53)
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Content-derived identifier for a notification
///
/// Deserialization goes through [`Fingerprint::parse`], so every value of
/// this type holds a well-formed digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an arbitrary JSON value. Never fails.
    pub fn of_value(value: &Value) -> Self {
        let canonical = canonical_string(value);
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a persisted fingerprint (64 lowercase hex characters)
    pub fn parse(s: &str) -> Result<Self> {
        let valid = s.len() == FINGERPRINT_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(LdnError::Storage(format!("Malformed fingerprint: {:?}", s)));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = LdnError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical compact JSON text for a value
pub fn canonical_string(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER => {
                Value::from(f as i64)
            }
            _ => value.clone(),
        },
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_fingerprint() {
        let a: Value = serde_json::from_str(
            r#"{"type":"Create","actor":"https://a.example","object":{"model":"m","provider":"p"},"instrument":{"type":"Service","action":"infer"}}"#,
        )
        .unwrap();
        let b: Value = serde_json::from_str(
            r#"{ "instrument": { "action": "infer", "type": "Service" },
                 "object": { "provider": "p", "model": "m" },
                 "actor": "https://a.example",
                 "type": "Create" }"#,
        )
        .unwrap();

        assert_eq!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn test_different_values_differ() {
        let a = json!({"type": "Create", "object": {"model": "a"}});
        let b = json!({"type": "Create", "object": {"model": "b"}});
        assert_ne!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn test_array_order_is_significant() {
        let a = json!({"@context": ["x", "y"]});
        let b = json!({"@context": ["y", "x"]});
        assert_ne!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn test_integral_float_matches_integer() {
        let a: Value = serde_json::from_str(r#"{"max_tokens": 256.0}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"max_tokens": 256}"#).unwrap();
        assert_eq!(Fingerprint::of_value(&a), Fingerprint::of_value(&b));
    }

    #[test]
    fn test_canonical_string_is_sorted_and_compact() {
        let value: Value = serde_json::from_str(r#"{ "b": 1, "a": { "d": true, "c": null } }"#).unwrap();
        assert_eq!(canonical_string(&value), r#"{"a":{"c":null,"d":true},"b":1}"#);
    }

    #[test]
    fn test_parse_roundtrip_and_rejects_garbage() {
        let fp = Fingerprint::of_value(&json!({"type": "Create"}));
        assert_eq!(fp.as_str().len(), 64);
        assert_eq!(Fingerprint::parse(fp.as_str()).unwrap(), fp);

        assert!(Fingerprint::parse("abc").is_err());
        assert!(Fingerprint::parse(&"Z".repeat(64)).is_err());
        assert!(Fingerprint::parse(&"A".repeat(64)).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let fp = Fingerprint::of_value(&json!({"type": "Create"}));
        let encoded = serde_json::to_value(&fp).unwrap();
        assert_eq!(encoded, json!(fp.as_str()));
        assert_eq!(serde_json::from_value::<Fingerprint>(encoded).unwrap(), fp);

        for bad in [json!("abc"), json!(""), json!("G".repeat(64)), json!(7)] {
            assert!(serde_json::from_value::<Fingerprint>(bad.clone()).is_err(), "{bad}");
        }
    }

    #[test]
    fn test_short_is_a_prefix() {
        let fp = Fingerprint::of_value(&json!(null));
        assert_eq!(fp.short().len(), 12);
        assert!(fp.as_str().starts_with(fp.short()));
    }
}
