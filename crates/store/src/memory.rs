//! In-process store backend.
//!
//! Implements the same [`DocumentStore`] interface as the Postgres backend so
//! workflow logic can be exercised without a real store. Sessions take a
//! per-collection snapshot on first touch, stage their writes locally
//! (read-your-writes), and commit with first-committer-wins conflict
//! detection over the write set: if any document a session wrote was
//! committed by someone else since the snapshot, the commit fails with
//! [`StoreError::TransactionAborted`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use driftwood_core::DocumentId;
use serde_json::Value;

use crate::backend::{DocumentStore, StoreExecutor, StoreSession};
use crate::document::RawDocument;
use crate::error::StoreError;
use crate::query::{
    Filter, FindOptions, IndexSpec, Update, UpdateReport, apply_update, matches, path_get,
    sort_bodies,
};

#[derive(Debug, Clone)]
struct Versioned {
    body: Value,
    version: u64,
}

#[derive(Debug, Clone, Default)]
struct Collection {
    docs: BTreeMap<DocumentId, Versioned>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Bumped on every committed mutation; each written document records the
    /// version that wrote it.
    version: u64,
    collections: HashMap<String, Collection>,
    unique_indexes: HashMap<String, Vec<IndexSpec>>,
}

/// An in-memory document store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panic mid-mutation elsewhere; the data is
        // still structurally sound for tests, so keep going.
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Inner {
    fn lock_free_unique_violation(
        &self,
        collection: &str,
        candidate: DocumentId,
        body: &Value,
        overlay: Option<(&BTreeSet<DocumentId>, &BTreeMap<DocumentId, Versioned>)>,
    ) -> Option<String> {
        let specs = self.unique_indexes.get(collection)?;
        let shared = self.collections.get(collection);
        for spec in specs {
            let Some(candidate_value) = path_get(body, &spec.path).filter(|v| !v.is_null())
            else {
                continue;
            };
            // Committed documents, skipping anything the overlay rewrites.
            let committed = shared.iter().flat_map(|c| c.docs.iter()).filter(|(id, _)| {
                **id != candidate
                    && overlay.is_none_or(|(dirty, _)| !dirty.contains(*id))
            });
            let staged = overlay
                .map(|(_, staged)| staged.iter())
                .into_iter()
                .flatten()
                .filter(|(id, _)| **id != candidate);
            for (_, other) in committed.chain(staged) {
                if path_get(&other.body, &spec.path) == Some(candidate_value) {
                    return Some(format!(
                        "duplicate value for unique index {} on {collection}.{}",
                        spec.name, spec.path
                    ));
                }
            }
        }
        None
    }
}

// =============================================================================
// Auto-commit connection
// =============================================================================

/// Auto-commit executor over a [`MemoryStore`]: each operation is applied
/// directly and is immediately visible.
#[derive(Debug, Clone)]
pub struct MemoryConn {
    store: MemoryStore,
}

impl MemoryConn {
    fn insert(&self, collection: &str, doc: RawDocument) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        if inner
            .collections
            .get(collection)
            .is_some_and(|c| c.docs.contains_key(&doc.id))
        {
            return Err(StoreError::Conflict(format!(
                "duplicate id {} in {collection}",
                doc.id
            )));
        }
        if let Some(msg) = inner.lock_free_unique_violation(collection, doc.id, &doc.body, None) {
            return Err(StoreError::Conflict(msg));
        }
        inner.version += 1;
        let version = inner.version;
        inner
            .collections
            .entry(collection.to_owned())
            .or_default()
            .docs
            .insert(
                doc.id,
                Versioned {
                    body: doc.body,
                    version,
                },
            );
        Ok(())
    }
}

impl StoreExecutor for MemoryConn {
    async fn insert_one(&mut self, collection: &str, doc: RawDocument) -> Result<(), StoreError> {
        self.insert(collection, doc)
    }

    async fn insert_many(
        &mut self,
        collection: &str,
        docs: Vec<RawDocument>,
    ) -> Result<(), StoreError> {
        for doc in docs {
            self.insert(collection, doc)?;
        }
        Ok(())
    }

    async fn find_raw(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<RawDocument>, StoreError> {
        let inner = self.store.lock();
        let docs = collect(inner.collections.get(collection), filter);
        drop(inner);
        Ok(shape(docs, options))
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let inner = self.store.lock();
        Ok(collect(inner.collections.get(collection), filter).len() as u64)
    }

    async fn update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> Result<UpdateReport, StoreError> {
        let mut inner = self.store.lock();
        let targets = target_ids(inner.collections.get(collection), filter, multi);
        let mut report = UpdateReport::default();
        for id in targets {
            let Some(current) = inner
                .collections
                .get(collection)
                .and_then(|c| c.docs.get(&id))
                .map(|v| v.body.clone())
            else {
                continue;
            };
            let mut next = current.clone();
            apply_update(&mut next, update)?;
            report.matched += 1;
            if next == current {
                continue;
            }
            if let Some(msg) =
                inner.lock_free_unique_violation(collection, id, &next, None)
            {
                return Err(StoreError::Conflict(msg));
            }
            inner.version += 1;
            let version = inner.version;
            if let Some(doc) = inner
                .collections
                .get_mut(collection)
                .and_then(|c| c.docs.get_mut(&id))
            {
                doc.body = next;
                doc.version = version;
                report.modified += 1;
            }
        }
        Ok(report)
    }

    async fn replace(&mut self, collection: &str, doc: RawDocument) -> Result<u64, StoreError> {
        let mut inner = self.store.lock();
        if !inner
            .collections
            .get(collection)
            .is_some_and(|c| c.docs.contains_key(&doc.id))
        {
            return Ok(0);
        }
        if let Some(msg) = inner.lock_free_unique_violation(collection, doc.id, &doc.body, None) {
            return Err(StoreError::Conflict(msg));
        }
        inner.version += 1;
        let version = inner.version;
        if let Some(existing) = inner
            .collections
            .get_mut(collection)
            .and_then(|c| c.docs.get_mut(&doc.id))
        {
            existing.body = doc.body;
            existing.version = version;
        }
        Ok(1)
    }

    async fn delete(
        &mut self,
        collection: &str,
        filter: &Filter,
        multi: bool,
    ) -> Result<u64, StoreError> {
        let mut inner = self.store.lock();
        let targets = target_ids(inner.collections.get(collection), filter, multi);
        let mut removed = 0;
        inner.version += 1;
        if let Some(col) = inner.collections.get_mut(collection) {
            for id in targets {
                if col.docs.remove(&id).is_some() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn ensure_indexes(
        &mut self,
        collection: &str,
        specs: &[IndexSpec],
    ) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        let registered = inner.unique_indexes.entry(collection.to_owned()).or_default();
        for spec in specs.iter().filter(|s| s.unique) {
            if !registered.iter().any(|r| r.name == spec.name) {
                registered.push(spec.clone());
            }
        }
        Ok(())
    }

    async fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        let mut inner = self.store.lock();
        inner.version += 1;
        inner.collections.remove(collection);
        inner.unique_indexes.remove(collection);
        Ok(())
    }
}

// =============================================================================
// Transactional session
// =============================================================================

/// A snapshot-isolated session over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    store: MemoryStore,
    start_version: u64,
    /// Per-collection snapshot, cloned from the shared state on first touch.
    snapshot: HashMap<String, Collection>,
    /// Write set: (collection, id) pairs this session created, rewrote, or
    /// deleted. A target absent from the snapshot at commit time is a delete.
    dirty: BTreeSet<(String, DocumentId)>,
}

impl MemorySession {
    fn collection(&mut self, name: &str) -> &mut Collection {
        if !self.snapshot.contains_key(name) {
            let copy = self
                .store
                .lock()
                .collections
                .get(name)
                .cloned()
                .unwrap_or_default();
            self.snapshot.insert(name.to_owned(), copy);
        }
        // Just inserted above if missing.
        self.snapshot.entry(name.to_owned()).or_default()
    }

    fn mark(&mut self, collection: &str, id: DocumentId) {
        self.dirty.insert((collection.to_owned(), id));
    }

    fn staged_unique_violation(
        &mut self,
        collection: &str,
        candidate: DocumentId,
        body: &Value,
    ) -> Option<String> {
        // Within the session, check against its own view of the collection.
        let specs = self.store.lock().unique_indexes.get(collection)?.clone();
        let col = self.collection(collection);
        for spec in &specs {
            let Some(candidate_value) = path_get(body, &spec.path).filter(|v| !v.is_null())
            else {
                continue;
            };
            for (id, other) in &col.docs {
                if *id != candidate && path_get(&other.body, &spec.path) == Some(candidate_value) {
                    return Some(format!(
                        "duplicate value for unique index {} on {collection}.{}",
                        spec.name, spec.path
                    ));
                }
            }
        }
        None
    }
}

impl StoreExecutor for MemorySession {
    async fn insert_one(&mut self, collection: &str, doc: RawDocument) -> Result<(), StoreError> {
        if self.collection(collection).docs.contains_key(&doc.id) {
            return Err(StoreError::Conflict(format!(
                "duplicate id {} in {collection}",
                doc.id
            )));
        }
        if let Some(msg) = self.staged_unique_violation(collection, doc.id, &doc.body) {
            return Err(StoreError::Conflict(msg));
        }
        self.collection(collection).docs.insert(
            doc.id,
            Versioned {
                body: doc.body,
                version: 0,
            },
        );
        self.mark(collection, doc.id);
        Ok(())
    }

    async fn insert_many(
        &mut self,
        collection: &str,
        docs: Vec<RawDocument>,
    ) -> Result<(), StoreError> {
        for doc in docs {
            self.insert_one(collection, doc).await?;
        }
        Ok(())
    }

    async fn find_raw(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<RawDocument>, StoreError> {
        let docs = collect(Some(self.collection(collection)), filter);
        Ok(shape(docs, options))
    }

    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        Ok(collect(Some(self.collection(collection)), filter).len() as u64)
    }

    async fn update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> Result<UpdateReport, StoreError> {
        let targets = target_ids(Some(self.collection(collection)), filter, multi);
        let mut report = UpdateReport::default();
        for id in targets {
            let Some(current) = self
                .collection(collection)
                .docs
                .get(&id)
                .map(|v| v.body.clone())
            else {
                continue;
            };
            let mut next = current.clone();
            apply_update(&mut next, update)?;
            report.matched += 1;
            if next == current {
                continue;
            }
            if let Some(msg) = self.staged_unique_violation(collection, id, &next) {
                return Err(StoreError::Conflict(msg));
            }
            if let Some(doc) = self.collection(collection).docs.get_mut(&id) {
                doc.body = next;
                report.modified += 1;
            }
            self.mark(collection, id);
        }
        Ok(report)
    }

    async fn replace(&mut self, collection: &str, doc: RawDocument) -> Result<u64, StoreError> {
        if !self.collection(collection).docs.contains_key(&doc.id) {
            return Ok(0);
        }
        if let Some(msg) = self.staged_unique_violation(collection, doc.id, &doc.body) {
            return Err(StoreError::Conflict(msg));
        }
        if let Some(existing) = self.collection(collection).docs.get_mut(&doc.id) {
            existing.body = doc.body;
        }
        self.mark(collection, doc.id);
        Ok(1)
    }

    async fn delete(
        &mut self,
        collection: &str,
        filter: &Filter,
        multi: bool,
    ) -> Result<u64, StoreError> {
        let targets = target_ids(Some(self.collection(collection)), filter, multi);
        let mut removed = 0;
        for id in targets {
            if self.collection(collection).docs.remove(&id).is_some() {
                removed += 1;
                self.mark(collection, id);
            }
        }
        Ok(removed)
    }

    async fn ensure_indexes(
        &mut self,
        collection: &str,
        specs: &[IndexSpec],
    ) -> Result<(), StoreError> {
        // Index registration is DDL-like: applied immediately, not staged.
        let mut inner = self.store.lock();
        let registered = inner.unique_indexes.entry(collection.to_owned()).or_default();
        for spec in specs.iter().filter(|s| s.unique) {
            if !registered.iter().any(|r| r.name == spec.name) {
                registered.push(spec.clone());
            }
        }
        Ok(())
    }

    async fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError> {
        let ids: Vec<DocumentId> = self.collection(collection).docs.keys().copied().collect();
        for id in ids {
            self.collection(collection).docs.remove(&id);
            self.mark(collection, id);
        }
        Ok(())
    }
}

impl StoreSession for MemorySession {
    async fn commit(self) -> Result<(), StoreError> {
        let mut inner = self.store.lock();

        // First committer wins: a write target rewritten by someone else
        // since our snapshot aborts the whole session.
        for (collection, id) in &self.dirty {
            let concurrent = inner
                .collections
                .get(collection)
                .and_then(|c| c.docs.get(id))
                .is_some_and(|v| v.version > self.start_version);
            if concurrent {
                return Err(StoreError::TransactionAborted);
            }
        }

        // Unique checks against the post-commit view.
        for (collection, id) in &self.dirty {
            if let Some(staged) = self
                .snapshot
                .get(collection)
                .and_then(|c| c.docs.get(id))
            {
                let overlay_dirty: BTreeSet<DocumentId> = self
                    .dirty
                    .iter()
                    .filter(|(c, _)| c == collection)
                    .map(|(_, i)| *i)
                    .collect();
                let staged_docs: BTreeMap<DocumentId, Versioned> = self
                    .snapshot
                    .get(collection)
                    .map(|c| {
                        c.docs
                            .iter()
                            .filter(|(i, _)| overlay_dirty.contains(i) && **i != *id)
                            .map(|(i, v)| (*i, v.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                if let Some(msg) = inner.lock_free_unique_violation(
                    collection,
                    *id,
                    &staged.body,
                    Some((&overlay_dirty, &staged_docs)),
                ) {
                    return Err(StoreError::Conflict(msg));
                }
            }
        }

        inner.version += 1;
        let version = inner.version;
        for (collection, id) in &self.dirty {
            let staged = self
                .snapshot
                .get(collection)
                .and_then(|c| c.docs.get(id))
                .cloned();
            let shared = inner.collections.entry(collection.clone()).or_default();
            match staged {
                Some(v) => {
                    shared.docs.insert(
                        *id,
                        Versioned {
                            body: v.body,
                            version,
                        },
                    );
                }
                None => {
                    shared.docs.remove(id);
                }
            }
        }
        Ok(())
    }

    async fn abort(self) -> Result<(), StoreError> {
        // Staged state is simply dropped.
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    type Conn = MemoryConn;
    type Session = MemorySession;

    async fn conn(&self) -> Result<Self::Conn, StoreError> {
        Ok(MemoryConn {
            store: self.clone(),
        })
    }

    async fn begin(&self) -> Result<Self::Session, StoreError> {
        let start_version = self.lock().version;
        Ok(MemorySession {
            store: self.clone(),
            start_version,
            snapshot: HashMap::new(),
            dirty: BTreeSet::new(),
        })
    }

    async fn ping(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

// =============================================================================
// Shared helpers
// =============================================================================

fn collect(collection: Option<&Collection>, filter: &Filter) -> Vec<RawDocument> {
    collection
        .map(|c| {
            c.docs
                .iter()
                .filter(|(_, v)| matches(&v.body, filter))
                .map(|(id, v)| RawDocument {
                    id: *id,
                    body: v.body.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn target_ids(collection: Option<&Collection>, filter: &Filter, multi: bool) -> Vec<DocumentId> {
    let mut ids: Vec<DocumentId> = collection
        .map(|c| {
            c.docs
                .iter()
                .filter(|(_, v)| matches(&v.body, filter))
                .map(|(id, _)| *id)
                .collect()
        })
        .unwrap_or_default();
    if !multi {
        ids.truncate(1);
    }
    ids
}

fn shape(mut docs: Vec<RawDocument>, options: &FindOptions) -> Vec<RawDocument> {
    sort_bodies(&mut docs, &options.sort);
    let skip = usize::try_from(options.skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let mut shaped: Vec<RawDocument> = docs.into_iter().skip(skip).collect();
    if let Some(limit) = options.limit {
        shaped.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }
    shaped
}
