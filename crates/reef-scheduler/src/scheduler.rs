//! Tick-driven dispatch of processable operations.
//!
//! Each tick performs four passes:
//!
//! 1. **Enqueue sweep**: clusters whose newest configuration awaits
//!    reconciliation are enqueued through the status transition coordinator
//! 2. **Orphan recovery**: `inProgress` operations abandoned past the
//!    staleness window are re-queued as `clientError`
//! 3. **Dispatch**: processable operations are claimed via CAS and invoked,
//!    in strictly ascending priority order, bounded by the worker pool
//! 4. **Finish**: reconciliations whose operations are all terminal get
//!    their aggregate status recorded and the cluster status flipped
//!
//! Multiple scheduler instances may run concurrently; CAS claims guarantee
//! each operation is processed exactly once per attempt.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use reef_inventory::ClusterStatusKind;

use crate::error::{Error, Result};
use crate::invoker::ComponentInvoker;
use crate::metrics::{time_scheduler_tick, SchedulerMetrics};
use crate::operation::{CasResult, Operation, OperationState};
use crate::reconciliation::{Reconciliation, ReconciliationFilter};
use crate::repository::ReconciliationRepository;
use crate::transition::ClusterStatusTransition;

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between ticks.
    pub tick_interval: Duration,
    /// Maximum concurrently dispatched operations.
    pub pool_size: usize,
    /// Maximum recorded attempt outcomes before a transiently failing
    /// operation is moved to `error`.
    pub max_operation_retries: u32,
    /// Staleness window after which an `inProgress` operation is considered
    /// abandoned and re-queued.
    ///
    /// Must exceed the worst-case runner duration, including progress
    /// tracking.
    pub orphan_timeout: Duration,
    /// Component names that form priority wave 1.
    pub pre_components: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            pool_size: 10,
            max_operation_retries: 5,
            orphan_timeout: Duration::from_secs(600),
            pre_components: Vec::new(),
        }
    }
}

/// Converts operations into runner invocations while upholding wave order
/// and the worker pool cap.
pub struct Scheduler {
    repository: Arc<dyn ReconciliationRepository>,
    transition: ClusterStatusTransition,
    invoker: Arc<dyn ComponentInvoker>,
    config: SchedulerConfig,
    metrics: SchedulerMetrics,
}

impl Scheduler {
    /// Creates a new scheduler.
    #[must_use]
    pub fn new(
        transition: ClusterStatusTransition,
        invoker: Arc<dyn ComponentInvoker>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repository: transition.repository().clone(),
            transition,
            invoker,
            config,
            metrics: SchedulerMetrics::new(),
        }
    }

    /// Runs the scheduler until `shutdown` fires.
    ///
    /// The current tick is finished before returning, so claimed operations
    /// are never left without a recorded outcome by a clean shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            tick_interval = ?self.config.tick_interval,
            pool_size = self.config.pool_size,
            "scheduler started"
        );
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "scheduler tick failed");
                    }
                }
            }
        }
    }

    /// Performs one scheduling tick.
    ///
    /// # Errors
    ///
    /// Returns an error when the repository is unavailable; per-operation
    /// failures are recorded on the operations themselves.
    pub async fn tick(&self) -> Result<()> {
        let _guard = time_scheduler_tick();
        self.enqueue_due_clusters().await;
        self.requeue_orphaned_operations().await?;
        self.dispatch_processable().await?;
        self.finish_completed().await?;
        Ok(())
    }

    /// Enqueues clusters whose newest configuration awaits reconciliation.
    async fn enqueue_due_clusters(&self) {
        let states = match self.transition.inventory().clusters_to_reconcile().await {
            Ok(states) => states,
            Err(err) => {
                tracing::error!(error = %err, "failed to list clusters awaiting reconciliation");
                return;
            }
        };

        for state in states {
            match self
                .transition
                .start_reconciliation(&state, &self.config.pre_components)
                .await
            {
                Ok(reconciliation) => {
                    tracing::debug!(
                        cluster = %state.cluster.cluster,
                        scheduling_id = %reconciliation.scheduling_id,
                        "enqueued cluster for reconciliation"
                    );
                }
                Err(err) if err.is_duplicate() => {
                    tracing::debug!(
                        cluster = %state.cluster.cluster,
                        "cluster already enqueued, skipping"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        cluster = %state.cluster.cluster,
                        error = %err,
                        "failed to enqueue cluster"
                    );
                }
            }
        }
    }

    /// Re-queues operations abandoned by a crashed or shut-down worker.
    async fn requeue_orphaned_operations(&self) -> Result<()> {
        let orphans = self
            .repository
            .get_orphaned_operations(Utc::now(), self.config.orphan_timeout)
            .await?;

        for operation in orphans {
            tracing::warn!(
                component = %operation.component,
                correlation_id = %operation.correlation_id,
                updated = %operation.updated,
                "re-queueing orphaned operation"
            );
            match self
                .repository
                .update_operation_state(
                    &operation.scheduling_id,
                    &operation.correlation_id,
                    OperationState::InProgress,
                    OperationState::ClientError,
                    Some("operation orphaned: no progress within the staleness window"),
                )
                .await
            {
                Ok(CasResult::Success) => {
                    self.metrics
                        .record_operation_transition("in_progress", "client_error");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(
                        correlation_id = %operation.correlation_id,
                        error = %err,
                        "failed to re-queue orphaned operation"
                    );
                }
            }
        }
        Ok(())
    }

    /// Claims and runs processable operations in ascending priority order.
    async fn dispatch_processable(&self) -> Result<()> {
        let operations = self.repository.get_processable_operations().await?;
        if operations.is_empty() {
            return Ok(());
        }

        let mut waves: BTreeMap<i64, Vec<Operation>> = BTreeMap::new();
        for operation in operations {
            waves.entry(operation.priority).or_default().push(operation);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.pool_size.max(1)));
        for (priority, wave) in waves {
            tracing::debug!(priority, operations = wave.len(), "dispatching priority wave");
            let mut workers = JoinSet::new();
            for operation in wave {
                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::storage("worker pool closed"))?;
                let repository = self.repository.clone();
                let invoker = self.invoker.clone();
                let metrics = self.metrics.clone();
                let max_retries = self.config.max_operation_retries;
                workers.spawn(async move {
                    let _permit = permit;
                    process_operation(&*repository, &*invoker, &metrics, max_retries, &operation)
                        .await;
                });
            }
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "dispatch worker panicked");
                }
            }
        }
        Ok(())
    }

    /// Finishes reconciliations whose operations are all terminal.
    async fn finish_completed(&self) -> Result<()> {
        let unfinished = self
            .repository
            .get_reconciliations(&ReconciliationFilter {
                finished: Some(false),
                ..ReconciliationFilter::default()
            })
            .await?;
        self.metrics.set_active_reconciliations(unfinished.len());

        for reconciliation in unfinished {
            let operations = self
                .repository
                .get_operations(&reconciliation.scheduling_id, None)
                .await?;

            if operations
                .iter()
                .any(|op| op.state == OperationState::InProgress)
            {
                continue;
            }

            let failed = operations
                .iter()
                .find(|op| op.state == OperationState::Error)
                .cloned();

            if let Some(failed) = failed {
                self.abort_remaining(&reconciliation, &operations, &failed)
                    .await;
                let operations = self
                    .repository
                    .get_operations(&reconciliation.scheduling_id, None)
                    .await?;
                if operations.iter().all(Operation::is_terminal) {
                    self.finish(&reconciliation, ClusterStatusKind::Error).await;
                }
            } else if operations.iter().all(Operation::is_terminal) {
                self.finish(&reconciliation, ClusterStatusKind::Ready).await;
            }
        }
        Ok(())
    }

    /// Aborts operations that must not run because a component of the same
    /// reconciliation failed permanently.
    async fn abort_remaining(
        &self,
        reconciliation: &Reconciliation,
        operations: &[Operation],
        failed: &Operation,
    ) {
        let reason = format!(
            "aborted: component '{}' failed permanently",
            failed.component
        );
        for operation in operations.iter().filter(|op| op.state.is_processable()) {
            match self
                .repository
                .update_operation_state(
                    &reconciliation.scheduling_id,
                    &operation.correlation_id,
                    operation.state,
                    OperationState::Error,
                    Some(&reason),
                )
                .await
            {
                Ok(CasResult::Success) => {
                    tracing::info!(
                        component = %operation.component,
                        correlation_id = %operation.correlation_id,
                        "aborted operation after permanent component failure"
                    );
                    self.metrics
                        .record_operation_transition(operation.state.as_label(), "error");
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(
                        correlation_id = %operation.correlation_id,
                        error = %err,
                        "failed to abort operation"
                    );
                }
            }
        }
    }

    async fn finish(&self, reconciliation: &Reconciliation, status: ClusterStatusKind) {
        match self
            .transition
            .finish_reconciliation(&reconciliation.scheduling_id, status)
            .await
        {
            Ok(state) => {
                tracing::info!(
                    cluster = %state.cluster.cluster,
                    scheduling_id = %reconciliation.scheduling_id,
                    status = %status,
                    "reconciliation finished"
                );
                self.metrics.record_finished(status.as_label());
            }
            Err(Error::AlreadyFinished { .. }) => {
                tracing::debug!(
                    scheduling_id = %reconciliation.scheduling_id,
                    "reconciliation finished by a parallel process"
                );
            }
            Err(err) => {
                tracing::error!(
                    scheduling_id = %reconciliation.scheduling_id,
                    error = %err,
                    "failed to finish reconciliation"
                );
            }
        }
    }
}

/// Claims one operation, invokes the runner, and records the outcome.
async fn process_operation(
    repository: &dyn ReconciliationRepository,
    invoker: &dyn ComponentInvoker,
    metrics: &SchedulerMetrics,
    max_retries: u32,
    operation: &Operation,
) {
    match repository
        .update_operation_state(
            &operation.scheduling_id,
            &operation.correlation_id,
            operation.state,
            OperationState::InProgress,
            None,
        )
        .await
    {
        Ok(CasResult::Success) => {
            metrics.record_dispatch("claimed");
            metrics.record_operation_transition(operation.state.as_label(), "in_progress");
        }
        Ok(CasResult::StateMismatch { actual }) => {
            tracing::debug!(
                component = %operation.component,
                correlation_id = %operation.correlation_id,
                actual = %actual,
                "lost dispatch race, skipping"
            );
            metrics.record_dispatch("conflict");
            return;
        }
        Ok(CasResult::NotFound) => {
            tracing::warn!(
                correlation_id = %operation.correlation_id,
                "operation vanished before dispatch"
            );
            return;
        }
        Err(err) => {
            tracing::error!(
                correlation_id = %operation.correlation_id,
                error = %err,
                "failed to claim operation"
            );
            return;
        }
    }

    let outcome = invoker.invoke(operation).await;
    let (target, reason) = match &outcome {
        Ok(()) => (OperationState::Done, None),
        Err(err) if err.is_retriable() && operation.retries + 1 < max_retries.max(1) => {
            tracing::warn!(
                component = %operation.component,
                correlation_id = %operation.correlation_id,
                attempt = operation.retries + 1,
                error = %err,
                "operation failed transiently, re-queueing"
            );
            (OperationState::ClientError, Some(err.to_string()))
        }
        Err(err) => {
            tracing::warn!(
                component = %operation.component,
                correlation_id = %operation.correlation_id,
                attempt = operation.retries + 1,
                error = %err,
                "operation failed permanently"
            );
            (OperationState::Error, Some(err.to_string()))
        }
    };

    match repository
        .update_operation_state(
            &operation.scheduling_id,
            &operation.correlation_id,
            OperationState::InProgress,
            target,
            reason.as_deref(),
        )
        .await
    {
        Ok(CasResult::Success) => {
            metrics.record_operation_transition("in_progress", target.as_label());
        }
        Ok(other) => {
            tracing::warn!(
                correlation_id = %operation.correlation_id,
                result = ?other,
                "failed to record operation outcome"
            );
        }
        Err(err) => {
            tracing::error!(
                correlation_id = %operation.correlation_id,
                error = %err,
                "failed to record operation outcome"
            );
        }
    }
}
