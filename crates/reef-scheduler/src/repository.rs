//! The reconciliation repository contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reef_core::{CorrelationId, SchedulingId};
use reef_inventory::{ClusterStatusKind, State};

use crate::error::Result;
use crate::operation::{CasResult, Operation, OperationState};
use crate::reconciliation::{Reconciliation, ReconciliationFilter};

/// Queue and lifecycle store of reconciliation entities.
///
/// ## CAS semantics
///
/// [`update_operation_state`](ReconciliationRepository::update_operation_state)
/// is the core primitive for multi-dispatcher correctness: a transition is
/// applied only when the stored state equals the expected prior state, so two
/// schedulers racing on the same operation resolve to exactly one winner.
#[async_trait]
pub trait ReconciliationRepository: Send + Sync {
    /// Creates a reconciliation with one `new` operation per component.
    ///
    /// In one transaction: verifies that no non-finished reconciliation
    /// exists for the cluster (single-flight), inserts the reconciliation,
    /// and inserts the operations. Components named in `pre_components`
    /// receive priority 1, all others priority 2; lower waves run first.
    ///
    /// # Errors
    ///
    /// Fails with a duplicate error when the cluster already has a
    /// reconciliation in flight, and with an empty-components error when the
    /// configuration has no components.
    async fn create_reconciliation(
        &self,
        state: &State,
        pre_components: &[String],
    ) -> Result<Reconciliation>;

    /// Gets a reconciliation by scheduling ID.
    async fn get_reconciliation(&self, scheduling_id: &SchedulingId) -> Result<Reconciliation>;

    /// Returns all reconciliations passing the filter.
    async fn get_reconciliations(
        &self,
        filter: &ReconciliationFilter,
    ) -> Result<Vec<Reconciliation>>;

    /// Returns the operations of a reconciliation, optionally restricted to
    /// the given states.
    async fn get_operations(
        &self,
        scheduling_id: &SchedulingId,
        states: Option<&[OperationState]>,
    ) -> Result<Vec<Operation>>;

    /// Returns operations eligible for dispatch.
    ///
    /// An operation is processable when it is `new` or `clientError`, every
    /// operation of a strictly lower priority in the same reconciliation is
    /// terminal, and no operation of the reconciliation has failed
    /// permanently. Callers race with other dispatchers; uniqueness is
    /// enforced by the CAS at claim time.
    async fn get_processable_operations(&self) -> Result<Vec<Operation>>;

    /// Returns `inProgress` operations whose last mutation is older than
    /// `timeout` at time `now`.
    ///
    /// These are operations abandoned by a crashed or shut-down worker; the
    /// scheduler re-queues them as `clientError`.
    async fn get_orphaned_operations(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Operation>>;

    /// Atomically transitions an operation if its stored state matches
    /// `expected`.
    ///
    /// `retries` is incremented whenever the operation leaves `inProgress`
    /// (one recorded attempt outcome). The transition must be permitted by
    /// the operation state machine.
    async fn update_operation_state(
        &self,
        scheduling_id: &SchedulingId,
        correlation_id: &CorrelationId,
        expected: OperationState,
        target: OperationState,
        reason: Option<&str>,
    ) -> Result<CasResult>;

    /// Marks a reconciliation as finished with the given cluster status.
    ///
    /// # Errors
    ///
    /// Fails with an already-finished error when called twice, and with a
    /// pending-operations error while any operation is non-terminal.
    async fn finish_reconciliation(
        &self,
        scheduling_id: &SchedulingId,
        status: ClusterStatusKind,
    ) -> Result<()>;

    /// Removes a reconciliation and its operations.
    ///
    /// Compensation hook for the status transition coordinator: when the
    /// status flip of an enqueue fails, the just-created reconciliation is
    /// removed again. A transactional store implements this as rollback.
    async fn remove_reconciliation(&self, scheduling_id: &SchedulingId) -> Result<()>;
}
