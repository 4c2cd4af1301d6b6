//! Cluster status records and their state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a cluster configuration.
///
/// Statuses form a directed graph:
///
/// ```text
/// Reconcilable ─► Reconciling ─► Ready
///       ▲             │           │
///       │             └────────► Error ──► Reconciling (on new config)
///       │                         │
///       └────────── Deleting ◄────┘
///                      │
///                      ▼
///                   Deleted (terminal)
/// ```
///
/// Deletion is an operator action, so `Deleting` is reachable from every
/// non-terminal status. `Ready`/`Error` move back to `Reconciling` only when
/// a new reconciliation is created atomically by the status transition
/// coordinator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatusKind {
    /// Configuration accepted, awaiting reconciliation.
    Reconcilable,
    /// A reconciliation is in flight.
    Reconciling,
    /// The last reconciliation converged successfully.
    Ready,
    /// The last reconciliation failed.
    Error,
    /// The cluster is being deleted.
    Deleting,
    /// The cluster is deleted (terminal).
    Deleted,
}

impl ClusterStatusKind {
    /// Returns true if no further transition is permitted from this status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }

    /// Returns true if the transition from self to `target` is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Reconcilable => matches!(target, Self::Reconciling | Self::Deleting),
            Self::Reconciling => matches!(target, Self::Ready | Self::Error | Self::Deleting),
            Self::Ready | Self::Error => matches!(target, Self::Reconciling | Self::Deleting),
            Self::Deleting => matches!(target, Self::Deleted | Self::Reconcilable),
            Self::Deleted => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Reconcilable => "reconcilable",
            Self::Reconciling => "reconciling",
            Self::Ready => "ready",
            Self::Error => "error",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ClusterStatusKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One record of the append-only per-cluster status history.
///
/// The record with the highest `id` is authoritative for the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Strictly increasing per-cluster status ID.
    pub id: i64,
    /// The cluster this record belongs to.
    pub cluster: String,
    /// The configuration version the status applies to.
    pub config_version: i64,
    /// The status value.
    pub status: ClusterStatusKind,
    /// When the record was appended.
    pub created: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use ClusterStatusKind::{Deleted, Deleting, Error, Ready, Reconcilable, Reconciling};

        assert!(Reconcilable.can_transition_to(Reconciling));
        assert!(!Reconcilable.can_transition_to(Ready));

        assert!(Reconciling.can_transition_to(Ready));
        assert!(Reconciling.can_transition_to(Error));
        assert!(!Reconciling.can_transition_to(Reconcilable));

        assert!(Ready.can_transition_to(Reconciling));
        assert!(Error.can_transition_to(Reconciling));
        assert!(!Ready.can_transition_to(Error));

        assert!(Deleting.can_transition_to(Deleted));
        assert!(Deleting.can_transition_to(Reconcilable));
        assert!(!Deleting.can_transition_to(Ready));
    }

    #[test]
    fn deletion_reachable_from_all_live_statuses() {
        use ClusterStatusKind::{Deleting, Error, Ready, Reconcilable, Reconciling};
        for status in [Reconcilable, Reconciling, Ready, Error] {
            assert!(status.can_transition_to(Deleting), "{status} -> deleting");
        }
    }

    #[test]
    fn deleted_is_terminal() {
        use ClusterStatusKind::{Deleted, Deleting, Error, Ready, Reconcilable, Reconciling};
        assert!(Deleted.is_terminal());
        for target in [Reconcilable, Reconciling, Ready, Error, Deleting, Deleted] {
            assert!(!Deleted.can_transition_to(target));
        }
    }

    #[test]
    fn serializes_snake_case() {
        let json = serde_json::to_string(&ClusterStatusKind::Reconcilable).unwrap();
        assert_eq!(json, "\"reconcilable\"");
    }
}
