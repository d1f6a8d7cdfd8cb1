//! Typed per-collection repository facade.
//!
//! One generic facade instantiated per document type, instead of a class per
//! entity. A `Repo` borrows an executor — either an auto-commit connection or
//! a transactional session — so whoever builds the `Repo` decides the
//! transactional scope, and inside a workflow that can only be the session.

use std::marker::PhantomData;

use chrono::Utc;
use driftwood_core::DocumentId;
use serde_json::Value;

use crate::backend::StoreExecutor;
use crate::document::{Document, RawDocument};
use crate::error::StoreError;
use crate::query::{
    Filter, FindOptions, IndexSpec, Update, UpdateOptions, UpdateReport, apply_projection,
    path_set,
};

/// Typed access to one collection through a borrowed executor.
pub struct Repo<'e, T, E> {
    exec: &'e mut E,
    _doc: PhantomData<T>,
}

impl<'e, T: Document, E: StoreExecutor> Repo<'e, T, E> {
    /// Bind a repository to an executor.
    pub fn new(exec: &'e mut E) -> Self {
        Self {
            exec,
            _doc: PhantomData,
        }
    }

    /// Persist a new document: assigns a fresh identifier, stamps both
    /// timestamps, and returns the stored document.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::WriteNotAcknowledged`] if the store did not
    /// confirm persistence, [`StoreError::Conflict`] on a unique-index
    /// violation.
    pub async fn create(&mut self, mut doc: T) -> Result<T, StoreError> {
        doc.meta_mut().stamp_created(Utc::now());
        let raw = RawDocument::from_doc(&doc)?;
        self.exec.insert_one(T::COLLECTION, raw).await?;
        Ok(doc)
    }

    /// Persist a batch of new documents, stamping each one.
    ///
    /// Atomicity is whatever the executor provides: all-or-nothing inside a
    /// session, per-document otherwise.
    ///
    /// # Errors
    ///
    /// Same as [`create`](Self::create).
    pub async fn create_many(&mut self, mut docs: Vec<T>) -> Result<Vec<T>, StoreError> {
        let now = Utc::now();
        let mut raws = Vec::with_capacity(docs.len());
        for doc in &mut docs {
            doc.meta_mut().stamp_created(now);
            raws.push(RawDocument::from_doc(doc)?);
        }
        self.exec.insert_many(T::COLLECTION, raws).await?;
        Ok(docs)
    }

    /// Find matching documents as their typed form, ordered and paged per
    /// `options`. The projection option is ignored here — a projected body
    /// is not a whole document; use [`find_projected`](Self::find_projected).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corruption`] if a stored body no longer matches
    /// the document type.
    pub async fn find(
        &mut self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<T>, StoreError> {
        let raws = self.exec.find_raw(T::COLLECTION, filter, options).await?;
        raws.into_iter().map(RawDocument::into_doc).collect()
    }

    /// Find matching documents as projected JSON bodies (the listed paths
    /// plus `id`).
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn find_projected(
        &mut self,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<Value>, StoreError> {
        let raws = self.exec.find_raw(T::COLLECTION, filter, options).await?;
        let bodies = raws.into_iter().map(|r| r.body);
        Ok(match &options.projection {
            Some(paths) => bodies.map(|b| apply_projection(&b, paths)).collect(),
            None => bodies.collect(),
        })
    }

    /// Look up a document by identifier. Absence is `None`, never an error.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn find_by_id(&mut self, id: DocumentId) -> Result<Option<T>, StoreError> {
        self.find_one(&Filter::by_id(id)).await
    }

    /// First matching document, or `None`.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn find_one(&mut self, filter: &Filter) -> Result<Option<T>, StoreError> {
        let mut found = self
            .find(filter, &FindOptions::new().limit(1))
            .await?;
        Ok(found.pop())
    }

    /// Count matching documents without materializing them.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn count(&mut self, filter: &Filter) -> Result<u64, StoreError> {
        self.exec.count(T::COLLECTION, filter).await
    }

    /// Whether any document matches.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn exists(&mut self, filter: &Filter) -> Result<bool, StoreError> {
        Ok(self.count(filter).await? > 0)
    }

    /// Update one document by identifier and return its post-update form,
    /// or `None` if absent. `updatedAt` is refreshed regardless of the
    /// caller's update intent.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn update_by_id(
        &mut self,
        id: DocumentId,
        update: Update,
    ) -> Result<Option<T>, StoreError> {
        let filter = Filter::by_id(id);
        let report = self
            .exec
            .update(T::COLLECTION, &filter, &Self::touched(update)?, false)
            .await?;
        if report.matched == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    /// Update the first matching document.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn update_one(
        &mut self,
        filter: &Filter,
        update: Update,
        options: UpdateOptions,
    ) -> Result<UpdateReport, StoreError> {
        self.update_with(filter, update, options, false).await
    }

    /// Update every matching document.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn update_many(
        &mut self,
        filter: &Filter,
        update: Update,
        options: UpdateOptions,
    ) -> Result<UpdateReport, StoreError> {
        self.update_with(filter, update, options, true).await
    }

    async fn update_with(
        &mut self,
        filter: &Filter,
        update: Update,
        options: UpdateOptions,
        multi: bool,
    ) -> Result<UpdateReport, StoreError> {
        let update = Self::touched(update)?;
        let mut report = self.exec.update(T::COLLECTION, filter, &update, multi).await?;
        if report.matched == 0 && options.upsert {
            let id = self.upsert(filter, &update).await?;
            report.upserted_id = Some(id);
        }
        Ok(report)
    }

    // Synthesize a document from the filter's equality conditions plus the
    // update's `set` section, stamp it, and insert it.
    async fn upsert(&mut self, filter: &Filter, update: &Update) -> Result<DocumentId, StoreError> {
        let mut body = Value::Object(serde_json::Map::new());
        for cond in filter.conditions() {
            if cond.comparator == crate::query::Comparator::Eq {
                path_set(&mut body, &cond.path, cond.value.clone());
            }
        }
        for (path, value) in &update.set {
            path_set(&mut body, path, value.clone());
        }

        let id = DocumentId::new();
        let now = timestamp(Utc::now())?;
        path_set(&mut body, "id", Value::String(id.to_string()));
        path_set(&mut body, "createdAt", now.clone());
        path_set(&mut body, "updatedAt", now);

        self.exec
            .insert_one(T::COLLECTION, RawDocument { id, body })
            .await?;
        Ok(id)
    }

    /// Replace the first matching document wholesale, preserving its
    /// identifier and `createdAt` and re-stamping `updatedAt`. Returns the
    /// stored replacement, or `None` if nothing matched.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn replace_one(
        &mut self,
        filter: &Filter,
        mut replacement: T,
    ) -> Result<Option<T>, StoreError> {
        let Some(existing) = self.find_one(filter).await? else {
            return Ok(None);
        };
        let meta = replacement.meta_mut();
        meta.id = existing.meta().id;
        meta.created_at = existing.meta().created_at;
        meta.updated_at = Utc::now();

        let raw = RawDocument::from_doc(&replacement)?;
        let matched = self.exec.replace(T::COLLECTION, raw).await?;
        Ok((matched > 0).then_some(replacement))
    }

    /// Delete a document by identifier, returning the removed document or
    /// `None` if absent.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn delete_by_id(&mut self, id: DocumentId) -> Result<Option<T>, StoreError> {
        let Some(doc) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        self.exec
            .delete(T::COLLECTION, &Filter::by_id(id), false)
            .await?;
        Ok(Some(doc))
    }

    /// Delete the first matching document. Returns the deletion count.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn delete_one(&mut self, filter: &Filter) -> Result<u64, StoreError> {
        self.exec.delete(T::COLLECTION, filter, false).await
    }

    /// Delete every matching document. Returns the deletion count.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn delete_many(&mut self, filter: &Filter) -> Result<u64, StoreError> {
        self.exec.delete(T::COLLECTION, filter, true).await
    }

    /// Create the collection's indexes if missing.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn ensure_indexes(&mut self, specs: &[IndexSpec]) -> Result<(), StoreError> {
        self.exec.ensure_indexes(T::COLLECTION, specs).await
    }

    /// Drop the whole collection; dropping a missing collection succeeds.
    ///
    /// # Errors
    ///
    /// Propagates executor errors.
    pub async fn drop_collection(&mut self) -> Result<(), StoreError> {
        self.exec.drop_collection(T::COLLECTION).await
    }

    // Force an `updatedAt` refresh into the caller's update intent.
    fn touched(update: Update) -> Result<Update, StoreError> {
        Ok(update.set("updatedAt", timestamp(Utc::now())?))
    }
}

fn timestamp(now: chrono::DateTime<Utc>) -> Result<Value, StoreError> {
    serde_json::to_value(now)
        .map_err(|e| StoreError::Corruption(format!("failed to serialize timestamp: {e}")))
}
