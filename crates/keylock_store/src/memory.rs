//! In-memory document store.

use crate::backend::{DocumentStore, StoreTransaction};
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::query::{Query, QueryPage};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct Slot {
    version: u64,
    document: Document,
}

#[derive(Debug, Default)]
struct Shared {
    docs: RwLock<BTreeMap<Key, Slot>>,
    next_version: AtomicU64,
    commits: AtomicU64,
    injected_conflicts: AtomicU32,
    unavailable: AtomicBool,
}

impl Shared {
    fn ensure_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("in-memory store is offline"))
        } else {
            Ok(())
        }
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// An in-memory document store with optimistic transactions.
///
/// Every document carries a version. A transaction remembers the version
/// of each document it reads and its commit fails with
/// [`StoreError::Conflict`] if any of them changed before the commit.
///
/// Clones share the same underlying data.
///
/// # Fault injection
///
/// Tests can force commit conflicts with [`InMemoryStore::inject_conflicts`]
/// and simulate an outage with [`InMemoryStore::set_available`].
///
/// # Example
///
/// ```rust
/// use keylock_store::{DocumentStore, InMemoryStore, Key};
/// use serde_json::json;
///
/// let store = InMemoryStore::new();
/// let key = Key::name("Persons", "ana");
///
/// let mut txn = store.begin().unwrap();
/// assert!(txn.get(&key).unwrap().is_none());
/// txn.put(&key, json!({"balance": 10}).as_object().unwrap().clone()).unwrap();
/// txn.commit().unwrap();
///
/// assert_eq!(store.get_committed(&key).unwrap()["balance"], 10);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    shared: Arc<Shared>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a document directly, bypassing transactions.
    ///
    /// Useful for seeding test fixtures.
    pub fn put_committed(&self, key: Key, document: Document) {
        let version = self.shared.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared
            .docs
            .write()
            .insert(key, Slot { version, document });
    }

    /// Reads the committed version of a document outside any transaction.
    #[must_use]
    pub fn get_committed(&self, key: &Key) -> Option<Document> {
        self.shared
            .docs
            .read()
            .get(key)
            .map(|slot| slot.document.clone())
    }

    /// Returns the number of stored documents.
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.shared.docs.read().len()
    }

    /// Returns the number of successful transactional commits.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    /// Makes the next `count` commits fail with [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, count: u32) {
        self.shared
            .injected_conflicts
            .fetch_add(count, Ordering::SeqCst);
    }

    /// Sets whether the store accepts requests.
    pub fn set_available(&self, available: bool) {
        self.shared.unavailable.store(!available, Ordering::SeqCst);
    }
}

impl DocumentStore for InMemoryStore {
    fn begin(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        self.shared.ensure_available()?;
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.shared),
            reads: HashMap::new(),
            writes: BTreeMap::new(),
            open: true,
        }))
    }

    fn delete(&self, key: &Key) -> StoreResult<()> {
        self.shared.ensure_available()?;
        key.validate()?;
        self.shared.docs.write().remove(key);
        Ok(())
    }

    fn run_query(&self, query: &Query) -> StoreResult<QueryPage> {
        self.shared.ensure_available()?;
        let docs = self.shared.docs.read();
        query.evaluate(docs.iter().map(|(key, slot)| (key, &slot.document)))
    }
}

/// A transaction on an [`InMemoryStore`].
#[derive(Debug)]
struct MemoryTransaction {
    shared: Arc<Shared>,
    /// Key -> version observed at first read (`None` = absent).
    reads: HashMap<Key, Option<u64>>,
    writes: BTreeMap<Key, Document>,
    open: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    fn close(&mut self) {
        self.open = false;
        self.reads.clear();
        self.writes.clear();
    }
}

impl StoreTransaction for MemoryTransaction {
    fn get(&mut self, key: &Key) -> StoreResult<Option<Document>> {
        self.ensure_open()?;
        self.shared.ensure_available()?;
        if let Some(staged) = self.writes.get(key) {
            return Ok(Some(staged.clone()));
        }

        let docs = self.shared.docs.read();
        let slot = docs.get(key);
        self.reads
            .entry(key.clone())
            .or_insert_with(|| slot.map(|s| s.version));
        Ok(slot.map(|s| s.document.clone()))
    }

    fn put(&mut self, key: &Key, document: Document) -> StoreResult<()> {
        self.ensure_open()?;
        key.validate()?;
        self.writes.insert(key.clone(), document);
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.shared.ensure_available()?;

        if self.shared.take_injected_conflict() {
            let key = self
                .writes
                .keys()
                .next()
                .or_else(|| self.reads.keys().next())
                .cloned()
                .unwrap_or_else(|| Key::name("__injected__", "conflict"));
            self.close();
            return Err(StoreError::Conflict { key });
        }

        let mut docs = self.shared.docs.write();
        let stale = self
            .reads
            .iter()
            .find(|(key, observed)| docs.get(*key).map(|s| s.version) != **observed)
            .map(|(key, _)| key.clone());
        if let Some(key) = stale {
            drop(docs);
            self.close();
            return Err(StoreError::Conflict { key });
        }

        for (key, document) in std::mem::take(&mut self.writes) {
            let version = self.shared.next_version.fetch_add(1, Ordering::SeqCst) + 1;
            docs.insert(key, Slot { version, document });
        }
        drop(docs);

        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        self.close();
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        self.close();
        Ok(())
    }
}
