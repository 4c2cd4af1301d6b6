//! Prometheus exposition for the service.
//!
//! The scheduler emits its metrics through the `metrics` facade; this
//! module installs the Prometheus recorder and adds inventory gauges that
//! are refreshed on every scrape.

use metrics::gauge;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use reef_inventory::Inventory;

/// Gauge: registered clusters by their authoritative status.
pub const CLUSTERS_TOTAL: &str = "reef_clusters_total";

/// Installs the global Prometheus recorder and returns its render handle.
///
/// # Errors
///
/// Returns an error when a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Refreshes the per-status cluster gauges from the inventory.
pub async fn update_inventory_gauges(inventory: &dyn Inventory) {
    match inventory.status_counts().await {
        Ok(counts) => {
            for (status, count) in counts {
                #[allow(clippy::cast_precision_loss)] // Cluster counts are small
                gauge!(CLUSTERS_TOTAL, "status" => status.as_label()).set(count as f64);
            }
        }
        Err(err) => {
            tracing::warn!(error = %err, "failed to refresh inventory metrics");
        }
    }
}
