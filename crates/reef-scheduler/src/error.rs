//! Error types for the reconciliation domain.

use reef_core::{CorrelationId, SchedulingId};

use crate::operation::OperationState;

/// The result type used throughout reef-scheduler.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in reconciliation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A reconciliation was not found.
    #[error("reconciliation not found: {scheduling_id}")]
    NotFound {
        /// The scheduling ID that was not found.
        scheduling_id: SchedulingId,
    },

    /// An operation was not found within a reconciliation.
    #[error("operation not found: {correlation_id} (schedulingID: {scheduling_id})")]
    OperationNotFound {
        /// The reconciliation that was searched.
        scheduling_id: SchedulingId,
        /// The correlation ID that was not found.
        correlation_id: CorrelationId,
    },

    /// The cluster already has a non-finished reconciliation (single-flight).
    ///
    /// Callers may treat this as idempotent success: the cluster is already
    /// being reconciled.
    #[error("cluster '{cluster}' already has a reconciliation in flight")]
    DuplicateClusterReconciliation {
        /// The cluster whose enqueue was refused.
        cluster: String,
    },

    /// A reconciliation was finished twice.
    #[error("reconciliation '{scheduling_id}' is already finished")]
    AlreadyFinished {
        /// The reconciliation that is already finished.
        scheduling_id: SchedulingId,
    },

    /// A reconciliation cannot finish while operations are non-terminal.
    #[error("reconciliation '{scheduling_id}' still has {pending} non-terminal operations")]
    OperationsPending {
        /// The reconciliation that was asked to finish.
        scheduling_id: SchedulingId,
        /// Number of non-terminal operations.
        pending: usize,
    },

    /// A reconciliation was created for a configuration without components.
    #[error("cluster '{cluster}' has no components to reconcile")]
    EmptyComponents {
        /// The cluster whose configuration is empty.
        cluster: String,
    },

    /// An invalid operation state transition was attempted.
    #[error("invalid operation state transition: {from} -> {to}")]
    InvalidOperationTransition {
        /// The current state.
        from: OperationState,
        /// The attempted target state.
        to: OperationState,
    },

    /// An error from the cluster inventory.
    #[error("inventory error: {0}")]
    Inventory(#[from] reef_inventory::Error),

    /// The underlying store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },
}

impl Error {
    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if this error signals an already-enqueued cluster.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateClusterReconciliation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_recognizable() {
        let err = Error::DuplicateClusterReconciliation {
            cluster: "c1".into(),
        };
        assert!(err.is_duplicate());
        assert!(err.to_string().contains("in flight"));
    }

    #[test]
    fn transition_error_display() {
        let err = Error::InvalidOperationTransition {
            from: OperationState::New,
            to: OperationState::Done,
        };
        let msg = err.to_string();
        assert!(msg.contains("new"));
        assert!(msg.contains("done"));
    }
}
