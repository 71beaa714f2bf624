//! Deterministic hash keys for Data Vault entities
//!
//! Every hub, link and satellite hash-diff in the vault is derived the same
//! way: the ordered attribute values are concatenated without a separator,
//! hashed with SHA-256, and the first 128 bits are read as a UUID.
//!
//! The function is pure. It never looks at wall-clock time, row position or
//! previous calls, so the same tuple always maps to the same key across runs.
//!
//! # Attribute boundaries
//!
//! Because no separator is inserted, `["ab", "c"]` and `["a", "bc"]` produce
//! the same key. Each key family therefore has a fixed attribute list, and
//! callers must normalize missing values to the empty string (see
//! [`attribute`]) before deriving.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A derived hub, link or hash-diff key
pub type HashKey = Uuid;

/// Derive a key from an ordered list of already-stringified attributes
pub fn derive_key<I, S>(attributes: I) -> HashKey
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha256::new();
    for attribute in attributes {
        hasher.update(attribute.as_ref().as_bytes());
    }
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Derive a link key from the ordered hub keys it connects
///
/// Hub keys are rendered in their hyphenated lowercase form, so a link key
/// is the key of the concatenated hub-key strings.
pub fn derive_link_key(hub_keys: &[HashKey]) -> HashKey {
    derive_key(hub_keys.iter().map(|key| key.hyphenated().to_string()))
}

/// Normalize an optional attribute for key derivation (missing -> empty)
pub fn attribute(value: Option<&str>) -> &str {
    value.unwrap_or("")
}
