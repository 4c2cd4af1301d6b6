//! # reef-core
//!
//! Shared foundation for the reef cluster reconciler:
//!
//! - **Typed identifiers**: ULID-backed IDs for reconciliations and operations
//! - **Observability**: logging bootstrap and span constructors
//! - **Retry**: a cancellation-aware retry capability used by long-running workers
//!
//! This crate deliberately contains no domain logic; the inventory, scheduler,
//! and reconciler crates build on it.

#![deny(missing_docs)]

pub mod error;
pub mod id;
pub mod observability;
pub mod retry;

pub use error::{Error, Result};
pub use id::{CorrelationId, SchedulingId};
