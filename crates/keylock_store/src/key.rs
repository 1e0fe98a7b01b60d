//! Entity keys.

use crate::error::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The final path element of a key: either a string name or a numeric id.
///
/// A name and an id are distinct identities even when the name is the
/// decimal form of the id (`"7"` and `7` address different documents).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyPath {
    /// Caller-chosen string name.
    Name(String),
    /// Numeric id.
    Id(i64),
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Name(name) => write!(f, "{name}"),
            KeyPath::Id(id) => write!(f, "#{id}"),
        }
    }
}

/// Address of a single document in the store.
///
/// Keys are immutable once built: the builder methods consume and return
/// a new key. The canonical identity is the triple
/// `(namespace, kind, name-or-id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    namespace: Option<String>,
    kind: String,
    path: KeyPath,
}

impl Key {
    /// Creates a key addressed by name in the default namespace.
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            kind: kind.into(),
            path: KeyPath::Name(name.into()),
        }
    }

    /// Creates a key addressed by numeric id in the default namespace.
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            namespace: None,
            kind: kind.into(),
            path: KeyPath::Id(id),
        }
    }

    /// Returns the same key placed in `namespace`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Returns the namespace, if any.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the name-or-id path element.
    #[must_use]
    pub fn path(&self) -> &KeyPath {
        &self.path
    }

    /// Returns the name if this key is addressed by name.
    #[must_use]
    pub fn name_str(&self) -> Option<&str> {
        match &self.path {
            KeyPath::Name(name) => Some(name),
            KeyPath::Id(_) => None,
        }
    }

    /// Returns the numeric id if this key is addressed by id.
    #[must_use]
    pub fn id_value(&self) -> Option<i64> {
        match self.path {
            KeyPath::Id(id) => Some(id),
            KeyPath::Name(_) => None,
        }
    }

    /// Checks that the key can address a document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidKey`] if the kind or name is empty or
    /// the id is not positive.
    pub fn validate(&self) -> StoreResult<()> {
        if self.kind.is_empty() {
            return Err(StoreError::invalid_key("kind must not be empty"));
        }
        match &self.path {
            KeyPath::Name(name) if name.is_empty() => {
                Err(StoreError::invalid_key(format!("empty name for kind {}", self.kind)))
            }
            KeyPath::Id(id) if *id <= 0 => Err(StoreError::invalid_key(format!(
                "id must be positive, got {id} for kind {}",
                self.kind
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ns) = &self.namespace {
            write!(f, "{ns}/")?;
        }
        match &self.path {
            KeyPath::Name(name) => write!(f, "{}:{name}", self.kind),
            KeyPath::Id(id) => write!(f, "{}#{id}", self.kind),
        }
    }
}
