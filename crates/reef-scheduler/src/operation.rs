//! Component operations and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reef_core::{CorrelationId, SchedulingId};

/// Execution state of a component operation.
///
/// ```text
///            ┌──────────────► done
///            │
/// new ──► inProgress ───────► error ◄─────────┐
///  │         │                                │
///  │         └──────────────► clientError ────┤
///  │                              │           │
///  │                              ▼           │
///  │                          inProgress      │
///  └──────────────────────────────────────────┘
/// ```
///
/// `clientError` is non-terminal: the operation becomes processable again on
/// the next scheduler tick. The direct `new -> error` and
/// `clientError -> error` edges abort operations that must not run anymore
/// because a lower-priority wave failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationState {
    /// Created, awaiting dispatch.
    New,
    /// Claimed by a dispatcher, runner active.
    InProgress,
    /// Component converged successfully (terminal).
    Done,
    /// Component failed permanently (terminal).
    Error,
    /// Component failed transiently; eligible for re-dispatch.
    ClientError,
}

impl OperationState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Returns true if a dispatcher may claim an operation in this state.
    #[must_use]
    pub const fn is_processable(&self) -> bool {
        matches!(self, Self::New | Self::ClientError)
    }

    /// Returns true if the transition from self to `target` is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::New => matches!(target, Self::InProgress | Self::Error),
            Self::InProgress => matches!(target, Self::Done | Self::Error | Self::ClientError),
            Self::ClientError => matches!(target, Self::InProgress | Self::Error),
            Self::Done | Self::Error => false,
        }
    }

    /// Returns a label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
            Self::ClientError => "client_error",
        }
    }
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => f.write_str("new"),
            Self::InProgress => f.write_str("inProgress"),
            Self::Done => f.write_str("done"),
            Self::Error => f.write_str("error"),
            Self::ClientError => f.write_str("clientError"),
        }
    }
}

/// One component's work item within a reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// The reconciliation this operation belongs to.
    pub scheduling_id: SchedulingId,
    /// Unique identifier of this operation.
    pub correlation_id: CorrelationId,
    /// The cluster being reconciled.
    pub cluster: String,
    /// The configuration version being reconciled.
    pub config_version: i64,
    /// Component name.
    pub component: String,
    /// Target namespace of the component.
    pub namespace: String,
    /// Priority wave (1-based; lower waves run first).
    pub priority: i64,
    /// Execution state.
    pub state: OperationState,
    /// Number of recorded attempt outcomes.
    ///
    /// Incremented whenever the operation leaves `inProgress`, i.e. per
    /// completed attempt, successful or not.
    pub retries: u32,
    /// Reason attached to the most recent state change.
    pub reason: Option<String>,
    /// When the operation was created.
    pub created: DateTime<Utc>,
    /// When the operation was last mutated.
    pub updated: DateTime<Utc>,
}

impl Operation {
    /// Returns true if the operation is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Result of a compare-and-set operation state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The transition was applied.
    Success,
    /// The reconciliation or operation does not exist.
    NotFound,
    /// The stored state did not match the expected prior state; another
    /// dispatcher won the race.
    StateMismatch {
        /// The state that was actually stored.
        actual: OperationState,
    },
}

impl CasResult {
    /// Returns true if the transition was applied.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}
