//! Workflow-level error taxonomy.

use driftwood_core::{EmailError, IdError, Money, OrderStatus};
use driftwood_store::StoreError;

/// Everything a workflow can fail with.
///
/// Input errors (`InvalidIdentifier`, `InvalidAmount`, `InvalidPrice`,
/// `InvalidEmail`) are raised before any store access. Business-rule
/// violations abort the session, so no partial effect survives them. Store
/// errors propagate unmodified after the session aborts.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Malformed identifier, rejected before any store access.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(#[from] IdError),

    /// A referenced document is absent.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Document kind, e.g. `"user"` or `"product"`.
        kind: &'static str,
        id: String,
    },

    /// Requested quantity exceeds availability.
    #[error("product {product_id}: requested {requested}, only {available} in stock")]
    OutOfStock {
        product_id: String,
        requested: u32,
        available: i64,
    },

    /// Source balance cannot cover the transfer.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },

    /// Transfer amount must be strictly positive.
    #[error("invalid amount: {0}")]
    InvalidAmount(Money),

    /// An amount left the representable decimal range.
    #[error("amount out of range computing {0}")]
    AmountOverflow(&'static str),

    /// Price must be strictly positive; fails the whole batch.
    #[error("invalid price {price} for product {product_id}")]
    InvalidPrice { product_id: String, price: Money },

    /// The order is already cancelled.
    #[error("order {0} is already cancelled")]
    AlreadyCancelled(String),

    /// Cancellation attempted past the point of no return.
    #[error("order {id} is {status}, past the point where cancellation is allowed")]
    NotCancellable { id: String, status: OrderStatus },

    /// Malformed email address, rejected before any store access.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] EmailError),

    /// Store-level failure, propagated after the session aborts.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WorkflowError {
    /// Whether retrying the whole workflow might succeed. Only store-level
    /// write conflicts qualify; business-rule violations never do.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}
