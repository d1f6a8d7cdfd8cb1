//! Store, executor, and session traits.
//!
//! The session is the unit of work: a value loaned to a workflow and threaded
//! explicitly through every nested repository call. Nothing here is ambient
//! or global — a mutation can only be made through an executor the caller
//! holds, and inside [`DocumentStore::with_transaction`] the only executor in
//! scope is the session.

use futures::future::LocalBoxFuture;

use crate::document::RawDocument;
use crate::error::StoreError;
use crate::query::{Filter, FindOptions, IndexSpec, Update, UpdateReport};

/// Raw per-collection operations, implemented by both auto-commit
/// connections and transactional sessions.
///
/// Documents at this level are raw JSON bodies; typing, identity validation,
/// and timestamp stamping live in [`crate::Repo`].
#[allow(async_fn_in_trait)]
pub trait StoreExecutor: Send {
    /// Insert one document. The body must carry its `id`.
    async fn insert_one(&mut self, collection: &str, doc: RawDocument) -> Result<(), StoreError>;

    /// Insert a batch of documents. Atomicity is the executor's: a session
    /// makes the batch all-or-nothing, an auto-commit connection does not.
    async fn insert_many(
        &mut self,
        collection: &str,
        docs: Vec<RawDocument>,
    ) -> Result<(), StoreError>;

    /// Find matching documents, ordered/paged per `options` (the projection
    /// option is applied by the repository, not here).
    async fn find_raw(
        &mut self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<Vec<RawDocument>, StoreError>;

    /// Count matching documents without materializing them.
    async fn count(&mut self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Apply an update to the first match (`multi = false`) or every match
    /// (`multi = true`).
    async fn update(
        &mut self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        multi: bool,
    ) -> Result<UpdateReport, StoreError>;

    /// Overwrite the body of the document with the given id. Returns the
    /// number of documents matched (0 or 1).
    async fn replace(
        &mut self,
        collection: &str,
        doc: RawDocument,
    ) -> Result<u64, StoreError>;

    /// Delete the first match (`multi = false`) or every match. Returns the
    /// deletion count.
    async fn delete(
        &mut self,
        collection: &str,
        filter: &Filter,
        multi: bool,
    ) -> Result<u64, StoreError>;

    /// Create the collection's indexes if they do not exist.
    async fn ensure_indexes(
        &mut self,
        collection: &str,
        specs: &[IndexSpec],
    ) -> Result<(), StoreError>;

    /// Drop a collection. Dropping a collection that does not exist is
    /// success, not an error.
    async fn drop_collection(&mut self, collection: &str) -> Result<(), StoreError>;
}

/// A transactional session: an executor whose writes become visible only on
/// [`commit`](Self::commit). Dropping an uncommitted session aborts it.
#[allow(async_fn_in_trait)]
pub trait StoreSession: StoreExecutor + Sized {
    /// Make every write of this session visible atomically.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TransactionAborted`] when the store detected a
    /// conflict with a concurrently committed session.
    async fn commit(self) -> Result<(), StoreError>;

    /// Discard every write of this session.
    async fn abort(self) -> Result<(), StoreError>;
}

/// A handle to the document store: a cheap-to-clone connection owner that
/// hands out auto-commit executors and transactional sessions.
#[allow(async_fn_in_trait)]
pub trait DocumentStore: Clone + Send + Sync {
    /// Auto-commit executor type.
    type Conn: StoreExecutor;
    /// Transactional session type.
    type Session: StoreSession;

    /// Acquire an auto-commit executor.
    async fn conn(&self) -> Result<Self::Conn, StoreError>;

    /// Open a transactional session.
    async fn begin(&self) -> Result<Self::Session, StoreError>;

    /// Liveness check; returns `false` instead of failing.
    async fn ping(&self) -> bool;

    /// Graceful, idempotent shutdown.
    async fn close(&self);

    /// Run `f` inside one transactional session.
    ///
    /// Opens a session, passes it to `f`, commits on `Ok`, aborts and
    /// re-raises the error unmodified on `Err`. The session is released on
    /// every exit path (abort failures are logged, the original error wins).
    ///
    /// The boxed future may borrow only the session; everything else the
    /// closure needs it must own, e.g. `move |session| async move { .. }`
    /// over clones.
    ///
    /// # Errors
    ///
    /// Whatever `f` returns, plus [`StoreError::TransactionAborted`] from a
    /// failed commit.
    async fn with_transaction<R, E, F>(&self, f: F) -> Result<R, E>
    where
        E: From<StoreError>,
        F: for<'t> FnOnce(&'t mut Self::Session) -> LocalBoxFuture<'t, Result<R, E>>,
    {
        let mut session = self.begin().await.map_err(E::from)?;
        match f(&mut session).await {
            Ok(value) => {
                session.commit().await.map_err(E::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(abort_err) = session.abort().await {
                    tracing::warn!(error = %abort_err, "failed to abort session");
                }
                Err(err)
            }
        }
    }
}
