//! Observability infrastructure for reef.
//!
//! Structured logging with consistent spans across all components. Global
//! state (subscriber install) is guarded by a `Once`; everything else is
//! passed in explicitly.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times; subsequent
/// calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: controls log levels (e.g., `info`, `reef_scheduler=debug`)
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Creates a span for inventory operations with standard fields.
#[must_use]
pub fn inventory_span(operation: &str, cluster: &str) -> Span {
    tracing::info_span!("inventory", op = operation, cluster = cluster)
}

/// Creates a span for reconciliation operations.
#[must_use]
pub fn reconciliation_span(operation: &str, scheduling_id: &str, cluster: &str) -> Span {
    tracing::info_span!(
        "reconciliation",
        op = operation,
        scheduling_id = scheduling_id,
        cluster = cluster,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_is_idempotent() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Pretty);
    }

    #[test]
    fn span_helpers_create_spans() {
        let span = inventory_span("create_or_update", "cluster-1");
        let _guard = span.enter();
        tracing::info!("test message in span");

        let span = reconciliation_span("dispatch", "01ARZ3", "cluster-1");
        let _guard = span.enter();
        tracing::info!("test message in span");
    }
}
