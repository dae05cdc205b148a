//! # Registry Digest
//!
//! Canonical hashing of registry state.
//!
//! The algorithm is fixed so that any independent observer can reproduce it:
//!
//! 1. Recursively sort every map key (lists keep their order).
//! 2. Serialize as compact JSON (`,` and `:` separators, no whitespace,
//!    non-ASCII characters emitted as UTF-8).
//! 3. SHA-256 over the UTF-8 bytes.
//! 4. Render as 64 lowercase hex characters.
//!
//! Two states holding the same key/value pairs digest identically no matter
//! how they were built.

use crate::error::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest as _, Sha256};

/// Length of a rendered digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

/// Rebuild `value` with every object's keys in sorted order.
///
/// `serde_json` keeps insertion order for maps in this workspace, so the
/// sort has to be explicit.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                if let Some(inner) = map.get(key) {
                    sorted.insert(key.clone(), canonicalize(inner));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical compact JSON text for `value`.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    // Serializing a Value cannot fail: every key is already a string.
    serde_json::to_string(&canonicalize(value)).unwrap_or_default()
}

/// SHA-256 of arbitrary bytes as lowercase hex.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Digest of an already-built JSON value.
#[must_use]
pub fn digest_value(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Digest of any serializable state.
pub fn compute_digest<T: Serialize + ?Sized>(state: &T) -> Result<String> {
    let value = serde_json::to_value(state)?;
    Ok(digest_value(&value))
}

/// True when `candidate` looks like a rendered digest.
#[must_use]
pub fn is_digest(candidate: &str) -> bool {
    candidate.len() == DIGEST_HEX_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

// =============================================================================
// TESTS
// =============================================================================
