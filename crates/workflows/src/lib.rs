//! Business workflows over the document store.
//!
//! The coordinator composes per-collection repositories into atomic
//! operations: each workflow validates its plain inputs, opens exactly one
//! transactional session, and threads that session through every nested
//! repository call. A failure anywhere inside the session aborts the whole
//! workflow with zero partial effect.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod analytics;
pub mod coordinator;
pub mod documents;
pub mod error;

pub use analytics::{
    Analytics, DailySales, InventoryReport, OrderStats, ProductSummary, TopCustomer,
};
pub use coordinator::{
    CancellationReceipt, ItemRequest, NewUser, OrderReceipt, OrderRequest, PriceDelta,
    PriceUpdate, ProfileSeed, ProvisionedUser, RetryPolicy, SetupOptions, TransferReceipt,
    WorkflowCoordinator,
};
pub use documents::{
    Cancellation, LedgerEntry, LedgerEntryStatus, Order, OrderItem, PriceChange, Product,
    Profile, StockChange, StockChangeReason, User,
};
pub use error::WorkflowError;
