//! Store-level error type.

use driftwood_core::IdError;
use thiserror::Error;

/// Errors produced by the store layer.
///
/// Business-rule violations live one layer up; everything here is about the
/// store itself: connectivity, acknowledgement, transaction outcome, and data
/// integrity.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not establish a connection after exhausting the configured
    /// retry attempts. Fatal to startup; not retried further.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A malformed identifier was rejected before any store access.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// The store did not confirm a write. Surfaced, never silently retried.
    #[error("write not acknowledged by the store")]
    WriteNotAcknowledged,

    /// The transactional session was aborted by the store, e.g. on a write
    /// conflict between concurrent sessions. Retryable at the caller's
    /// discretion.
    #[error("transaction aborted")]
    TransactionAborted,

    /// A uniqueness constraint was violated.
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// A stored document could not be deserialized into its typed form.
    #[error("data corruption: {0}")]
    Corruption(String),

    /// Underlying database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether retrying the enclosing transaction could succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionAborted)
    }
}
