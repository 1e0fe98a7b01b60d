//! Entity facade: single-entity convenience operations.
//!
//! An [`EntityHandle`] is bound to one kind and, once it has a key, to one
//! entity. Writes go through the retry engine with the coordinator's
//! policy; `delete` is a plain store call.

use crate::coordinator::Coordinator;
use crate::error::{CoreError, CoreResult};
use crate::keyset::KeySet;
use crate::transaction::MutationOutcome;
use keylock_store::{Document, FilterOp, Key, Query, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const ENTITY: &str = "entity";

/// Payload check run before a write. `Err` carries the rejection reason.
pub type Validator = Arc<dyn Fn(&Document) -> Result<(), String> + Send + Sync>;

/// Handle on one entity of a kind.
///
/// # Example
///
/// ```rust
/// use keylock_core::{Coordinator, CoordinatorConfig};
/// use keylock_store::{FilterOp, InMemoryStore};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let coordinator = Coordinator::new(Arc::new(InMemoryStore::new()), CoordinatorConfig::default());
///
/// let mut person = coordinator.entity("Persons");
/// person.create().unwrap();
/// person.replace(json!({"name": "ana", "age": 30}).as_object().unwrap().clone()).unwrap();
///
/// let mut found = coordinator.entity("Persons");
/// found.locate([("name", FilterOp::Eq, json!("ana"))]).unwrap();
/// assert_eq!(found.key(), person.key());
/// ```
#[derive(Clone)]
pub struct EntityHandle {
    coordinator: Coordinator,
    kind: String,
    namespace: Option<String>,
    key: Option<Key>,
    validator: Option<Validator>,
}

impl EntityHandle {
    pub(crate) fn new(coordinator: Coordinator, kind: impl Into<String>) -> Self {
        Self {
            coordinator,
            kind: kind.into(),
            namespace: None,
            key: None,
            validator: None,
        }
    }

    /// Scopes the handle to a namespace.
    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Installs a validator run on every payload before it is written.
    #[must_use]
    pub fn use_validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Document) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Returns the kind.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Returns the bound key, if any.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Binds the handle to an existing key of its kind.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if the key is malformed or of
    /// another kind.
    pub fn set_key(&mut self, key: Key) -> CoreResult<&Key> {
        key.validate()?;
        if key.kind() != self.kind {
            return Err(CoreError::invalid(format!(
                "key {key} does not belong to kind {}",
                self.kind
            )));
        }
        Ok(self.key.insert(key))
    }

    /// Allocates a fresh identity and binds the handle to it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if the handle is already bound, or
    /// any allocator error.
    pub fn create(&mut self) -> CoreResult<&Key> {
        if let Some(key) = &self.key {
            return Err(CoreError::invalid(format!("handle already bound to {key}")));
        }
        let key = self
            .coordinator
            .allocate_in(self.namespace.as_deref(), &self.kind)?;
        Ok(self.key.insert(key))
    }

    /// Binds the handle to the first entity matching every filter.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if nothing matches, or any query
    /// error.
    pub fn locate<I, F>(&mut self, filters: I) -> CoreResult<&Key>
    where
        I: IntoIterator<Item = (F, FilterOp, Value)>,
        F: Into<String>,
    {
        let mut query = Query::new(self.kind.clone());
        if let Some(ns) = &self.namespace {
            query = query.namespace(ns.clone());
        }
        for (field, op, value) in filters {
            query = query.filter(field, op, value);
        }
        let query = query.limit(1);

        let result = self.coordinator.run_query(&query)?;
        match result.keys.into_iter().next() {
            Some(key) => {
                debug!(%key, "entity located");
                Ok(self.key.insert(key))
            }
            None => Err(CoreError::not_found(format!(
                "no {} matches the given filters",
                self.kind
            ))),
        }
    }

    /// Reads the current body under the entity's lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if unbound, or any transaction error.
    pub fn fetch(&self) -> CoreResult<Option<Document>> {
        let keys = self.keys()?;
        let mut found = None;
        self.coordinator.run_with_retry(&keys, |snapshot| {
            found = snapshot.get(ENTITY).cloned();
            Ok(MutationOutcome::Rollback)
        })?;
        Ok(found)
    }

    /// Overwrites the body.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Invalid`] if unbound
    /// - [`CoreError::ValidationRejected`] if the validator refuses `document`
    /// - any transaction or retry error
    pub fn replace(&self, document: Document) -> CoreResult<Document> {
        let keys = self.keys()?;
        self.check(&document)?;

        self.coordinator.run_with_retry(&keys, |mut snapshot| {
            snapshot.insert(ENTITY, document.clone());
            Ok(MutationOutcome::Commit(snapshot))
        })?;
        Ok(document)
    }

    /// Shallow-merges `patch` into the existing body and returns the result.
    ///
    /// An absent body is treated as empty. The validator sees the merged
    /// document.
    ///
    /// # Errors
    ///
    /// Same as [`EntityHandle::replace`].
    pub fn merge(&self, patch: Document) -> CoreResult<Document> {
        let keys = self.keys()?;
        let mut merged = Document::new();

        self.coordinator.run_with_retry(&keys, |mut snapshot| {
            let mut body = snapshot.get(ENTITY).cloned().unwrap_or_default();
            for (field, value) in &patch {
                body.insert(field.clone(), value.clone());
            }
            self.check(&body)?;
            merged = body.clone();
            snapshot.insert(ENTITY, body);
            Ok(MutationOutcome::Commit(snapshot))
        })?;
        Ok(merged)
    }

    /// Deletes the entity outside any transaction. The handle stays bound.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Invalid`] if unbound, or a store error.
    pub fn delete(&self) -> CoreResult<()> {
        let key = self.bound()?;
        self.coordinator.delete(key)
    }

    fn bound(&self) -> CoreResult<&Key> {
        self.key
            .as_ref()
            .ok_or_else(|| CoreError::invalid(format!("{} handle has no key", self.kind)))
    }

    fn keys(&self) -> CoreResult<KeySet> {
        Ok(KeySet::single(ENTITY, self.bound()?.clone()))
    }

    fn check(&self, document: &Document) -> CoreResult<()> {
        match &self.validator {
            Some(validator) => validator(document).map_err(CoreError::rejected),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityHandle")
            .field("kind", &self.kind)
            .field("namespace", &self.namespace)
            .field("key", &self.key)
            .field("validated", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}
