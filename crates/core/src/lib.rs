//! Driftwood Core - Shared types library.
//!
//! This crate provides common types used across all Driftwood components:
//! - `store` - Generic document repository over a transactional store
//! - `workflows` - Atomic multi-collection business workflows
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no async
//! runtime. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Document identifiers, emails, money, and status enums

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
