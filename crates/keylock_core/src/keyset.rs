//! Key sets and entity snapshots.

use crate::digest::{lock_token, LockToken};
use crate::error::{CoreError, CoreResult};
use keylock_store::{Document, Key};
use std::collections::btree_map::{self, BTreeMap};

/// The named participants of one transaction.
///
/// Maps caller-chosen logical names (`"sender"`, `"receiver"`) to keys.
/// The same key may appear under two names; its lock token is taken once.
///
/// ```rust
/// use keylock_core::KeySet;
/// use keylock_store::Key;
///
/// let keys = KeySet::new()
///     .with("sender", Key::name("Persons", "ana"))
///     .with("receiver", Key::name("Persons", "bob"));
/// assert_eq!(keys.len(), 2);
/// assert_eq!(keys.lock_tokens().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    entries: BTreeMap<String, Key>,
}

impl KeySet {
    /// Creates an empty key set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a key set with one participant.
    pub fn single(name: impl Into<String>, key: Key) -> Self {
        Self::new().with(name, key)
    }

    /// Adds a participant, replacing any previous key under `name`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, key: Key) -> Self {
        self.insert(name, key);
        self
    }

    /// Adds a participant, returning the key it replaced.
    pub fn insert(&mut self, name: impl Into<String>, key: Key) -> Option<Key> {
        self.entries.insert(name.into(), key)
    }

    /// Returns the key registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Key> {
        self.entries.get(name)
    }

    /// Returns the number of participants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no participants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, key)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Key)> {
        self.entries.iter().map(|(name, key)| (name.as_str(), key))
    }

    /// Checks that the key set can address a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if the set is empty or holds a
    /// malformed key.
    pub fn validate(&self) -> CoreResult<()> {
        if self.entries.is_empty() {
            return Err(CoreError::invalid("key set is empty"));
        }
        for (name, key) in &self.entries {
            key.validate()
                .map_err(|e| CoreError::invalid(format!("participant {name:?}: {e}")))?;
        }
        Ok(())
    }

    /// Returns the sorted, deduplicated lock tokens of every participant.
    #[must_use]
    pub fn lock_tokens(&self) -> Vec<LockToken> {
        let mut tokens: Vec<LockToken> = self.entries.values().map(lock_token).collect();
        tokens.sort_unstable();
        tokens.dedup();
        tokens
    }
}

impl<S: Into<String>> FromIterator<(S, Key)> for KeySet {
    fn from_iter<I: IntoIterator<Item = (S, Key)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, key)| (name.into(), key))
                .collect(),
        }
    }
}

/// The documents of a key set as read inside a transaction.
///
/// Every participant has an entry. An entry is `None` when the document
/// did not exist at read time, so callers can implement create-if-absent.
/// An entry left `None` at commit writes nothing; an entry removed
/// altogether is a contract violation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntitySnapshot {
    entries: BTreeMap<String, Option<Document>>,
}

impl EntitySnapshot {
    pub(crate) fn from_entries(entries: BTreeMap<String, Option<Document>>) -> Self {
        Self { entries }
    }

    /// Returns the document under `name`, if it exists.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Document> {
        self.entries.get(name).and_then(Option::as_ref)
    }

    /// Returns the document under `name` for in-place mutation.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Document> {
        self.entries.get_mut(name).and_then(Option::as_mut)
    }

    /// Returns the document under `name`, starting from an empty body if
    /// it does not exist yet.
    pub fn get_or_create(&mut self, name: &str) -> &mut Document {
        self.entries
            .entry(name.to_string())
            .or_default()
            .get_or_insert_with(Document::new)
    }

    /// Returns true if the document under `name` exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Returns true if `name` has an entry, present or not.
    #[must_use]
    pub fn has_entry(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Replaces the document under `name`, returning the previous body.
    pub fn insert(&mut self, name: impl Into<String>, document: Document) -> Option<Document> {
        self.entries.insert(name.into(), Some(document)).flatten()
    }

    /// Removes the entry under `name` altogether.
    pub fn remove(&mut self, name: &str) -> Option<Document> {
        self.entries.remove(name).flatten()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(name, document)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&Document>)> {
        self.entries
            .iter()
            .map(|(name, doc)| (name.as_str(), doc.as_ref()))
    }

    /// Pairs each participant of `keys` with its document for saving.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if a participant has no entry.
    pub(crate) fn writes_for<'k>(
        &self,
        keys: &'k KeySet,
    ) -> CoreResult<Vec<(&'k Key, Option<&Document>)>> {
        keys.iter()
            .map(|(name, key)| match self.entries.get(name) {
                Some(doc) => Ok((key, doc.as_ref())),
                None => Err(CoreError::invalid(format!(
                    "snapshot has no entry for participant {name:?}"
                ))),
            })
            .collect()
    }
}

impl IntoIterator for EntitySnapshot {
    type Item = (String, Option<Document>);
    type IntoIter = btree_map::IntoIter<String, Option<Document>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
