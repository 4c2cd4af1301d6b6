//! # reef-scheduler
//!
//! Reconciliation lifecycle for the reef cluster reconciler:
//!
//! - **Reconciliation queue**: one reconciliation per `(cluster, configVersion)`
//!   with one operation per component, at most one in flight per cluster
//! - **Status transition**: atomic coupling of inventory status flips with
//!   reconciliation enqueue/finish
//! - **Scheduler**: a tick-driven worker that dispatches processable
//!   operations in priority waves, retries transient failures, and finishes
//!   completed reconciliations
//!
//! ## Correctness under concurrency
//!
//! Multiple scheduler instances may race on the same operation. Correctness
//! relies on CAS state transitions: a dispatcher first moves an operation
//! `new -> inProgress`; the CAS loser observes the mismatch and skips
//! silently.

#![deny(missing_docs)]

pub mod error;
pub mod invoker;
pub mod memory;
pub mod metrics;
pub mod operation;
pub mod reconciliation;
pub mod repository;
pub mod scheduler;
pub mod transition;

pub use error::{Error, Result};
pub use invoker::{ComponentInvoker, InvokeError};
pub use memory::InMemoryReconciliationRepository;
pub use operation::{CasResult, Operation, OperationState};
pub use reconciliation::{Reconciliation, ReconciliationFilter};
pub use repository::ReconciliationRepository;
pub use scheduler::{Scheduler, SchedulerConfig};
pub use transition::ClusterStatusTransition;
