//! The inventory contract towards the persistence layer.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{ClusterModel, State};
use crate::status::{ClusterStatus, ClusterStatusKind};

/// Versioned store of cluster desired state, configuration, and status history.
///
/// Implementations must guarantee, per cluster:
/// - strictly increasing `configVersion` and `statusId`
/// - append-only status history whose newest record is authoritative
/// - status transitions validated against the cluster status state machine
///
/// All methods are `Send + Sync` to support concurrent intake handlers; the
/// store itself is the only shared mutable state.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// Inserts or updates a cluster.
    ///
    /// A submission that is semantically identical to the newest configuration
    /// reuses its version (idempotent resubmission). Any semantic difference
    /// allocates a new configuration version and emits a fresh
    /// `Reconcilable` status for it.
    async fn create_or_update(&self, contract_version: u64, model: &ClusterModel)
        -> Result<State>;

    /// Gets the state of one configuration version.
    ///
    /// The returned status is the newest record for that configuration
    /// version. Fails with a not-found error when either the cluster or the
    /// version is absent.
    async fn get(&self, cluster: &str, config_version: i64) -> Result<State>;

    /// Gets the newest state of a cluster, by status ID.
    async fn get_latest(&self, cluster: &str) -> Result<State>;

    /// Appends a new status record for the configuration version in `state`.
    ///
    /// Fails with an invalid-transition error when the cluster status state
    /// machine does not permit `current -> status`.
    async fn update_status(&self, state: &State, status: ClusterStatusKind) -> Result<State>;

    /// Returns all status records with `created >= now - lookback`, oldest
    /// first.
    async fn status_changes(&self, cluster: &str, lookback: Duration)
        -> Result<Vec<ClusterStatus>>;

    /// Returns the newest state of every cluster whose newest configuration
    /// version still awaits reconciliation (status `Reconcilable`).
    ///
    /// The scheduler sweeps this to enqueue configuration versions that were
    /// submitted while an older version was still reconciling.
    async fn clusters_to_reconcile(&self) -> Result<Vec<State>>;

    /// Marks a cluster for deletion by appending a `Deleting` status.
    ///
    /// Idempotent: a cluster already deleting or deleted is returned
    /// unchanged. Fails with a not-found error when the cluster is absent.
    async fn delete(&self, cluster: &str) -> Result<State>;

    /// Counts clusters by their authoritative status.
    async fn status_counts(&self) -> Result<BTreeMap<ClusterStatusKind, usize>>;
}
