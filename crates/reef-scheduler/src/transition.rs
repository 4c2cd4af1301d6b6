//! Atomic coupling of inventory status updates with reconciliation
//! enqueue/finish.
//!
//! The coordinator holds handles to both stores and nothing else; neither
//! store knows about the other. Against a transactional store both mutations
//! run in one transaction; the in-memory stores emulate the enqueue rollback
//! by removing the just-created reconciliation when the status flip is
//! refused.

use std::sync::Arc;

use reef_core::SchedulingId;
use reef_inventory::{ClusterStatusKind, Inventory, State};

use crate::error::{Error, Result};
use crate::reconciliation::Reconciliation;
use crate::repository::ReconciliationRepository;

/// Coordinator for cluster status flips that must travel together with
/// reconciliation queue mutations.
#[derive(Clone)]
pub struct ClusterStatusTransition {
    inventory: Arc<dyn Inventory>,
    repository: Arc<dyn ReconciliationRepository>,
}

impl ClusterStatusTransition {
    /// Creates a new transition coordinator.
    #[must_use]
    pub fn new(
        inventory: Arc<dyn Inventory>,
        repository: Arc<dyn ReconciliationRepository>,
    ) -> Self {
        Self {
            inventory,
            repository,
        }
    }

    /// Returns the inventory handle.
    #[must_use]
    pub fn inventory(&self) -> &Arc<dyn Inventory> {
        &self.inventory
    }

    /// Returns the reconciliation repository handle.
    #[must_use]
    pub fn repository(&self) -> &Arc<dyn ReconciliationRepository> {
        &self.repository
    }

    /// Enqueues a reconciliation and flips the cluster status to
    /// `Reconciling`; either both happen or neither.
    ///
    /// # Errors
    ///
    /// A duplicate-reconciliation error means the cluster is already
    /// enqueued; callers may treat it as idempotent success. Any other
    /// error left the system unchanged.
    pub async fn start_reconciliation(
        &self,
        state: &State,
        pre_components: &[String],
    ) -> Result<Reconciliation> {
        let reconciliation = match self
            .repository
            .create_reconciliation(state, pre_components)
            .await
        {
            Ok(reconciliation) => reconciliation,
            Err(err) if err.is_duplicate() => {
                tracing::info!(
                    cluster = %state.cluster.cluster,
                    "cluster transition tried to enqueue cluster but it was already enqueued"
                );
                return Err(err);
            }
            Err(err) => {
                tracing::error!(
                    cluster = %state.cluster.cluster,
                    error = %err,
                    "cluster transition failed to enqueue cluster"
                );
                return Err(err);
            }
        };

        match self
            .inventory
            .update_status(state, ClusterStatusKind::Reconciling)
            .await
        {
            Ok(new_state) => {
                tracing::info!(
                    cluster = %state.cluster.cluster,
                    scheduling_id = %reconciliation.scheduling_id,
                    status = %new_state.status.status,
                    "cluster transition finished: cluster added to reconciliation queue"
                );
                Ok(reconciliation)
            }
            Err(err) => {
                tracing::error!(
                    cluster = %state.cluster.cluster,
                    error = %err,
                    "cluster transition failed to update cluster status, rolling back enqueue"
                );
                if let Err(cleanup) = self
                    .repository
                    .remove_reconciliation(&reconciliation.scheduling_id)
                    .await
                {
                    tracing::error!(
                        scheduling_id = %reconciliation.scheduling_id,
                        error = %cleanup,
                        "failed to roll back reconciliation after status update failure"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Finishes a reconciliation and records the final cluster status;
    /// either both happen or neither.
    ///
    /// # Errors
    ///
    /// Fails with an already-finished error when a parallel process finished
    /// the reconciliation in between; this is non-fatal for callers.
    pub async fn finish_reconciliation(
        &self,
        scheduling_id: &SchedulingId,
        status: ClusterStatusKind,
    ) -> Result<State> {
        let current = self.repository.get_reconciliation(scheduling_id).await?;
        if current.finished {
            tracing::info!(
                scheduling_id = %current.scheduling_id,
                "cluster transition tried to finish reconciliation but it is no longer in progress"
            );
            return Err(Error::AlreadyFinished {
                scheduling_id: current.scheduling_id,
            });
        }

        let state = self
            .inventory
            .get(&current.cluster, current.config_version)
            .await?;
        let state = self.inventory.update_status(&state, status).await?;
        self.repository
            .finish_reconciliation(&current.scheduling_id, status)
            .await?;

        tracing::debug!(
            cluster = %state.cluster.cluster,
            scheduling_id = %current.scheduling_id,
            status = %status,
            "cluster transition finished reconciliation"
        );
        Ok(state)
    }
}
