//! Reconciliation entities.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reef_core::SchedulingId;
use reef_inventory::ClusterStatusKind;

/// One execution of desired-state convergence for one cluster configuration
/// version.
///
/// At most one non-finished reconciliation exists per cluster at any time
/// (single-flight); the repository enforces this at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    /// Unique identifier of this reconciliation.
    pub scheduling_id: SchedulingId,
    /// The cluster being reconciled.
    pub cluster: String,
    /// The configuration version being reconciled.
    pub config_version: i64,
    /// When the reconciliation was created.
    pub created: DateTime<Utc>,
    /// Whether the reconciliation has finished.
    pub finished: bool,
    /// When the reconciliation finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// The cluster status recorded at finish.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ClusterStatusKind>,
}

/// Query filter for reconciliations.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationFilter {
    /// Restrict to one cluster.
    pub cluster: Option<String>,
    /// Restrict by finished flag.
    pub finished: Option<bool>,
    /// Restrict to reconciliations created at least this long ago.
    pub min_age: Option<Duration>,
}

impl ReconciliationFilter {
    /// Returns true if `reconciliation` passes this filter at time `now`.
    #[must_use]
    pub fn matches(&self, reconciliation: &Reconciliation, now: DateTime<Utc>) -> bool {
        if let Some(cluster) = &self.cluster {
            if &reconciliation.cluster != cluster {
                return false;
            }
        }
        if let Some(finished) = self.finished {
            if reconciliation.finished != finished {
                return false;
            }
        }
        if let Some(min_age) = self.min_age {
            let age = now.signed_duration_since(reconciliation.created);
            let min_age =
                chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::MAX);
            if age < min_age {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconciliation(cluster: &str, finished: bool) -> Reconciliation {
        Reconciliation {
            scheduling_id: SchedulingId::generate(),
            cluster: cluster.into(),
            config_version: 1,
            created: Utc::now(),
            finished,
            finished_at: None,
            status: None,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = ReconciliationFilter::default();
        assert!(filter.matches(&reconciliation("c1", false), Utc::now()));
        assert!(filter.matches(&reconciliation("c2", true), Utc::now()));
    }

    #[test]
    fn filter_by_cluster_and_finished() {
        let filter = ReconciliationFilter {
            cluster: Some("c1".into()),
            finished: Some(false),
            min_age: None,
        };
        assert!(filter.matches(&reconciliation("c1", false), Utc::now()));
        assert!(!filter.matches(&reconciliation("c1", true), Utc::now()));
        assert!(!filter.matches(&reconciliation("c2", false), Utc::now()));
    }

    #[test]
    fn filter_by_min_age() {
        let filter = ReconciliationFilter {
            cluster: None,
            finished: None,
            min_age: Some(Duration::from_secs(60)),
        };
        let mut young = reconciliation("c1", false);
        young.created = Utc::now();
        assert!(!filter.matches(&young, Utc::now()));

        let mut old = reconciliation("c1", false);
        old.created = Utc::now() - chrono::Duration::seconds(120);
        assert!(filter.matches(&old, Utc::now()));
    }
}
