//! In-memory reconciliation repository.
//!
//! Thread-safe behind an `RwLock`; enforces the single-flight invariant and
//! CAS semantics in-process. No durability: state is lost when the process
//! exits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use reef_core::{CorrelationId, SchedulingId};
use reef_inventory::{ClusterStatusKind, State};

use crate::error::{Error, Result};
use crate::operation::{CasResult, Operation, OperationState};
use crate::reconciliation::{Reconciliation, ReconciliationFilter};
use crate::repository::ReconciliationRepository;

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

#[derive(Debug)]
struct ReconciliationRecord {
    reconciliation: Reconciliation,
    operations: Vec<Operation>,
}

impl ReconciliationRecord {
    /// Smallest priority with a non-terminal operation, if any.
    fn active_wave(&self) -> Option<i64> {
        self.operations
            .iter()
            .filter(|op| !op.is_terminal())
            .map(|op| op.priority)
            .min()
    }

    fn has_failed_operation(&self) -> bool {
        self.operations
            .iter()
            .any(|op| op.state == OperationState::Error)
    }
}

/// In-memory [`ReconciliationRepository`] for tests and single-process
/// deployments.
#[derive(Debug, Default)]
pub struct InMemoryReconciliationRepository {
    reconciliations: RwLock<HashMap<SchedulingId, ReconciliationRecord>>,
}

impl InMemoryReconciliationRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReconciliationRepository for InMemoryReconciliationRepository {
    async fn create_reconciliation(
        &self,
        state: &State,
        pre_components: &[String],
    ) -> Result<Reconciliation> {
        if state.configuration.components.is_empty() {
            return Err(Error::EmptyComponents {
                cluster: state.cluster.cluster.clone(),
            });
        }

        let mut reconciliations = self.reconciliations.write().map_err(poison_err)?;

        let in_flight = reconciliations
            .values()
            .any(|r| r.reconciliation.cluster == state.cluster.cluster && !r.reconciliation.finished);
        if in_flight {
            return Err(Error::DuplicateClusterReconciliation {
                cluster: state.cluster.cluster.clone(),
            });
        }

        let scheduling_id = SchedulingId::generate();
        let now = Utc::now();
        let reconciliation = Reconciliation {
            scheduling_id,
            cluster: state.cluster.cluster.clone(),
            config_version: state.configuration.version,
            created: now,
            finished: false,
            finished_at: None,
            status: None,
        };

        let operations = state
            .configuration
            .components
            .iter()
            .map(|component| Operation {
                scheduling_id,
                correlation_id: CorrelationId::generate(),
                cluster: state.cluster.cluster.clone(),
                config_version: state.configuration.version,
                component: component.name.clone(),
                namespace: component.namespace.clone(),
                priority: if pre_components.contains(&component.name) {
                    1
                } else {
                    2
                },
                state: OperationState::New,
                retries: 0,
                reason: None,
                created: now,
                updated: now,
            })
            .collect();

        reconciliations.insert(
            scheduling_id,
            ReconciliationRecord {
                reconciliation: reconciliation.clone(),
                operations,
            },
        );
        Ok(reconciliation)
    }

    async fn get_reconciliation(&self, scheduling_id: &SchedulingId) -> Result<Reconciliation> {
        let reconciliations = self.reconciliations.read().map_err(poison_err)?;
        reconciliations
            .get(scheduling_id)
            .map(|r| r.reconciliation.clone())
            .ok_or(Error::NotFound {
                scheduling_id: *scheduling_id,
            })
    }

    async fn get_reconciliations(
        &self,
        filter: &ReconciliationFilter,
    ) -> Result<Vec<Reconciliation>> {
        let reconciliations = self.reconciliations.read().map_err(poison_err)?;
        let now = Utc::now();
        let mut result: Vec<Reconciliation> = reconciliations
            .values()
            .filter(|r| filter.matches(&r.reconciliation, now))
            .map(|r| r.reconciliation.clone())
            .collect();
        result.sort_by_key(|r| r.scheduling_id);
        Ok(result)
    }

    async fn get_operations(
        &self,
        scheduling_id: &SchedulingId,
        states: Option<&[OperationState]>,
    ) -> Result<Vec<Operation>> {
        let reconciliations = self.reconciliations.read().map_err(poison_err)?;
        let record = reconciliations
            .get(scheduling_id)
            .ok_or(Error::NotFound {
                scheduling_id: *scheduling_id,
            })?;
        Ok(record
            .operations
            .iter()
            .filter(|op| states.is_none_or(|states| states.contains(&op.state)))
            .cloned()
            .collect())
    }

    async fn get_processable_operations(&self) -> Result<Vec<Operation>> {
        let reconciliations = self.reconciliations.read().map_err(poison_err)?;
        let mut processable = Vec::new();
        for record in reconciliations.values() {
            if record.reconciliation.finished || record.has_failed_operation() {
                continue;
            }
            let Some(wave) = record.active_wave() else {
                continue;
            };
            processable.extend(
                record
                    .operations
                    .iter()
                    .filter(|op| op.state.is_processable() && op.priority == wave)
                    .cloned(),
            );
        }
        processable.sort_by_key(|op| (op.priority, op.correlation_id));
        Ok(processable)
    }

    async fn get_orphaned_operations(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Vec<Operation>> {
        let reconciliations = self.reconciliations.read().map_err(poison_err)?;
        let timeout =
            chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::MAX);
        Ok(reconciliations
            .values()
            .filter(|r| !r.reconciliation.finished)
            .flat_map(|r| &r.operations)
            .filter(|op| op.state == OperationState::InProgress && now - op.updated > timeout)
            .cloned()
            .collect())
    }

    async fn update_operation_state(
        &self,
        scheduling_id: &SchedulingId,
        correlation_id: &CorrelationId,
        expected: OperationState,
        target: OperationState,
        reason: Option<&str>,
    ) -> Result<CasResult> {
        if !expected.can_transition_to(target) {
            return Err(Error::InvalidOperationTransition {
                from: expected,
                to: target,
            });
        }

        let mut reconciliations = self.reconciliations.write().map_err(poison_err)?;
        let Some(record) = reconciliations.get_mut(scheduling_id) else {
            return Ok(CasResult::NotFound);
        };
        let Some(operation) = record
            .operations
            .iter_mut()
            .find(|op| &op.correlation_id == correlation_id)
        else {
            return Ok(CasResult::NotFound);
        };

        if operation.state != expected {
            return Ok(CasResult::StateMismatch {
                actual: operation.state,
            });
        }

        if expected == OperationState::InProgress {
            operation.retries += 1;
        }
        operation.state = target;
        operation.reason = reason.map(ToString::to_string);
        operation.updated = Utc::now();
        Ok(CasResult::Success)
    }

    async fn finish_reconciliation(
        &self,
        scheduling_id: &SchedulingId,
        status: ClusterStatusKind,
    ) -> Result<()> {
        let mut reconciliations = self.reconciliations.write().map_err(poison_err)?;
        let record = reconciliations
            .get_mut(scheduling_id)
            .ok_or(Error::NotFound {
                scheduling_id: *scheduling_id,
            })?;

        if record.reconciliation.finished {
            return Err(Error::AlreadyFinished {
                scheduling_id: *scheduling_id,
            });
        }

        let pending = record
            .operations
            .iter()
            .filter(|op| !op.is_terminal())
            .count();
        if pending > 0 {
            return Err(Error::OperationsPending {
                scheduling_id: *scheduling_id,
                pending,
            });
        }

        record.reconciliation.finished = true;
        record.reconciliation.finished_at = Some(Utc::now());
        record.reconciliation.status = Some(status);
        Ok(())
    }

    async fn remove_reconciliation(&self, scheduling_id: &SchedulingId) -> Result<()> {
        let mut reconciliations = self.reconciliations.write().map_err(poison_err)?;
        reconciliations
            .remove(scheduling_id)
            .map(|_| ())
            .ok_or(Error::NotFound {
                scheduling_id: *scheduling_id,
            })
    }
}
