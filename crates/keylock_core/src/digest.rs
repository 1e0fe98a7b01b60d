//! Identity digest: key -> lock token.

use crate::error::{CoreError, CoreResult};
use keylock_store::{Key, KeyPath, Query};
use sha2::{Digest, Sha256};
use std::fmt::{self, Write as _};

/// Size of a lock token in bytes.
pub const TOKEN_SIZE: usize = 32;

/// Opaque mutual-exclusion token derived from a key.
///
/// Equal keys always yield equal tokens. Distinct keys yield distinct
/// tokens with overwhelming probability (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockToken([u8; TOKEN_SIZE]);

impl LockToken {
    /// Creates a token from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; TOKEN_SIZE]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; TOKEN_SIZE] {
        &self.0
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LockToken({}..)", &hex(&self.0)[..12])
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

/// Computes the lock token of a key.
///
/// The canonical triple is `(namespace, kind, name-or-id)`. Every field is
/// length-prefixed and the path is tagged `name:` or `id:`, so a name and
/// an id with the same text, or an absent and an empty namespace, never
/// share a token.
#[must_use]
pub fn lock_token(key: &Key) -> LockToken {
    let mut hasher = Sha256::new();
    match key.namespace() {
        None => hasher.update([0u8]),
        Some(ns) => {
            hasher.update([1u8]);
            update_field(&mut hasher, ns.as_bytes());
        }
    }
    update_field(&mut hasher, key.kind().as_bytes());
    match key.path() {
        KeyPath::Name(name) => {
            hasher.update(b"name:");
            update_field(&mut hasher, name.as_bytes());
        }
        KeyPath::Id(id) => {
            hasher.update(b"id:");
            hasher.update(id.to_le_bytes());
        }
    }
    LockToken(hasher.finalize().into())
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Returns a stable hex SHA-256 fingerprint of a query.
///
/// Two structurally identical queries share a fingerprint, which callers
/// can use as a cache key for result pages.
///
/// # Errors
///
/// Returns [`CoreError::Invalid`] if the query cannot be serialized.
pub fn query_fingerprint(query: &Query) -> CoreResult<String> {
    let canonical = serde_json::to_vec(query)
        .map_err(|e| CoreError::invalid(format!("unserializable query: {e}")))?;
    Ok(hex(&Sha256::digest(&canonical)))
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}
