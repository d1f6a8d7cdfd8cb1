//! Driftwood Store - generic document repository over a transactional store.
//!
//! This crate is the only boundary the workflow layer depends on. It provides:
//!
//! - A [`Document`] trait binding a serde-serializable type to a named
//!   collection, with automatic `createdAt`/`updatedAt` stamping.
//! - A small query model ([`Filter`], [`Update`], [`FindOptions`]) shared by
//!   every backend, with one evaluation semantics.
//! - The [`DocumentStore`] / [`StoreSession`] traits: explicit transactional
//!   sessions threaded as values. A session commits on success, aborts on
//!   failure, and is released on every exit path.
//! - A typed [`Repo`] facade exposing the full per-collection operation set
//!   (create/find/update/replace/delete/count, maintenance).
//! - Two backends: [`PgStore`] (`PostgreSQL`, one JSONB table per collection)
//!   and [`MemoryStore`] (in-process, snapshot isolation with
//!   first-committer-wins conflict detection).
//!
//! # Example
//!
//! ```ignore
//! let store = MemoryStore::new();
//! let mut conn = store.conn().await?;
//! let user = Repo::<User, _>::new(&mut conn).create(user).await?;
//!
//! store
//!     .with_transaction(|tx| {
//!         async move {
//!             let mut orders = Repo::<Order, _>::new(tx);
//!             // every call in here shares one session; abort on any Err
//!             Ok(())
//!         }
//!         .boxed_local()
//!     })
//!     .await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod backend;
pub mod config;
pub mod document;
pub mod error;
pub mod memory;
pub mod pg;
pub mod query;
pub mod repo;

pub use backend::{DocumentStore, StoreExecutor, StoreSession};
pub use config::{StoreConfig, ConfigError};
pub use document::{Document, DocumentMeta, RawDocument};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use pg::PgStore;
pub use query::{
    Filter, FindOptions, IndexSpec, SortOrder, Update, UpdateOptions, UpdateReport,
};
pub use repo::Repo;
