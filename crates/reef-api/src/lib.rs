//! # reef-api
//!
//! HTTP surface of the reef reconciler: declarative cluster submissions,
//! status queries, status-change history, cluster deletion, and Prometheus
//! exposition. The binary wires the in-memory stores, the scheduler, and
//! the component runner into one process.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod invoker;
pub mod metrics;
pub mod routes;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use server::{AppState, Server};
