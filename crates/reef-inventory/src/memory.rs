//! In-memory inventory implementation.
//!
//! Thread-safe behind an `RwLock`; suitable for tests and single-process
//! deployments. No durability: all history is lost when the process exits.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Error, Result};
use crate::inventory::Inventory;
use crate::model::{Cluster, ClusterConfig, ClusterModel, State};
use crate::status::{ClusterStatus, ClusterStatusKind};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

#[derive(Debug)]
struct ClusterRecord {
    cluster: Cluster,
    configs: Vec<ClusterConfig>,
    statuses: Vec<ClusterStatus>,
    next_config_version: i64,
    next_status_id: i64,
}

impl ClusterRecord {
    fn latest_config(&self) -> &ClusterConfig {
        self.configs.last().expect("cluster record without config")
    }

    fn latest_status(&self) -> &ClusterStatus {
        self.statuses.last().expect("cluster record without status")
    }

    /// Newest status record for one configuration version.
    fn status_for(&self, config_version: i64) -> Option<&ClusterStatus> {
        self.statuses
            .iter()
            .rev()
            .find(|s| s.config_version == config_version)
    }

    fn config(&self, config_version: i64) -> Option<&ClusterConfig> {
        self.configs.iter().find(|c| c.version == config_version)
    }

    fn state_for(&self, config_version: i64) -> Option<State> {
        let configuration = self.config(config_version)?.clone();
        let status = self.status_for(config_version)?.clone();
        Some(State {
            cluster: self.cluster.clone(),
            configuration,
            status,
        })
    }

    /// Newest state of the cluster, by status ID.
    fn latest_state(&self) -> Option<State> {
        let status = self.latest_status().clone();
        let configuration = self.config(status.config_version)?.clone();
        Some(State {
            cluster: self.cluster.clone(),
            configuration,
            status,
        })
    }

    fn append_status(&mut self, config_version: i64, status: ClusterStatusKind) -> ClusterStatus {
        let record = ClusterStatus {
            id: self.next_status_id,
            cluster: self.cluster.cluster.clone(),
            config_version,
            status,
            created: Utc::now(),
        };
        self.next_status_id += 1;
        self.statuses.push(record.clone());
        record
    }

    fn append_config(&mut self, contract_version: u64, model: &ClusterModel) -> i64 {
        let version = self.next_config_version;
        self.next_config_version += 1;
        self.configs.push(ClusterConfig {
            cluster: self.cluster.cluster.clone(),
            version,
            kubeconfig: model.kubeconfig.clone(),
            contract_version,
            kyma_version: model.kyma_version.clone(),
            profile: model.profile.clone(),
            components: model.components.clone(),
            created: Utc::now(),
        });
        version
    }
}

/// In-memory [`Inventory`] for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    clusters: RwLock<HashMap<String, ClusterRecord>>,
}

impl InMemoryInventory {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of registered clusters.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn cluster_count(&self) -> Result<usize> {
        let clusters = self.clusters.read().map_err(poison_err)?;
        Ok(clusters.len())
    }
}

#[async_trait]
impl Inventory for InMemoryInventory {
    async fn create_or_update(
        &self,
        contract_version: u64,
        model: &ClusterModel,
    ) -> Result<State> {
        model.validate()?;

        let mut clusters = self.clusters.write().map_err(poison_err)?;

        if let Some(record) = clusters.get_mut(&model.cluster) {
            let recreated = record.latest_status().status == ClusterStatusKind::Deleted;
            if recreated {
                record.cluster.version += 1;
            } else if record.latest_config().matches(model) {
                // Idempotent resubmission: reuse the newest configuration version.
                let version = record.latest_config().version;
                return record
                    .state_for(version)
                    .ok_or_else(|| Error::config_not_found(&model.cluster, version));
            }
            let version = record.append_config(contract_version, model);
            record.append_status(version, ClusterStatusKind::Reconcilable);
            tracing::debug!(
                cluster = %model.cluster,
                config_version = version,
                recreated,
                "allocated new cluster configuration version"
            );
            return record
                .state_for(version)
                .ok_or_else(|| Error::config_not_found(&model.cluster, version));
        }

        let mut record = ClusterRecord {
            cluster: Cluster {
                cluster: model.cluster.clone(),
                version: 1,
                created: Utc::now(),
            },
            configs: Vec::new(),
            statuses: Vec::new(),
            next_config_version: 1,
            next_status_id: 1,
        };
        let version = record.append_config(contract_version, model);
        record.append_status(version, ClusterStatusKind::Reconcilable);
        let state = record
            .state_for(version)
            .ok_or_else(|| Error::config_not_found(&model.cluster, version))?;
        clusters.insert(model.cluster.clone(), record);
        Ok(state)
    }

    async fn get(&self, cluster: &str, config_version: i64) -> Result<State> {
        let clusters = self.clusters.read().map_err(poison_err)?;
        clusters
            .get(cluster)
            .and_then(|record| record.state_for(config_version))
            .ok_or_else(|| Error::config_not_found(cluster, config_version))
    }

    async fn get_latest(&self, cluster: &str) -> Result<State> {
        let clusters = self.clusters.read().map_err(poison_err)?;
        clusters
            .get(cluster)
            .and_then(ClusterRecord::latest_state)
            .ok_or_else(|| Error::not_found(cluster))
    }

    async fn update_status(&self, state: &State, status: ClusterStatusKind) -> Result<State> {
        let mut clusters = self.clusters.write().map_err(poison_err)?;
        let record = clusters
            .get_mut(&state.cluster.cluster)
            .ok_or_else(|| Error::not_found(&state.cluster.cluster))?;

        let config_version = state.configuration.version;
        let current = record
            .status_for(config_version)
            .ok_or_else(|| Error::config_not_found(&state.cluster.cluster, config_version))?
            .status;

        if !current.can_transition_to(status) {
            return Err(Error::InvalidStatusTransition {
                cluster: state.cluster.cluster.clone(),
                from: current,
                to: status,
            });
        }

        record.append_status(config_version, status);
        record
            .state_for(config_version)
            .ok_or_else(|| Error::config_not_found(&state.cluster.cluster, config_version))
    }

    async fn status_changes(
        &self,
        cluster: &str,
        lookback: Duration,
    ) -> Result<Vec<ClusterStatus>> {
        let clusters = self.clusters.read().map_err(poison_err)?;
        let record = clusters
            .get(cluster)
            .ok_or_else(|| Error::not_found(cluster))?;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::MAX);
        Ok(record
            .statuses
            .iter()
            .filter(|s| s.created >= cutoff)
            .cloned()
            .collect())
    }

    async fn clusters_to_reconcile(&self) -> Result<Vec<State>> {
        let clusters = self.clusters.read().map_err(poison_err)?;
        let mut due = Vec::new();
        for record in clusters.values() {
            if matches!(
                record.latest_status().status,
                ClusterStatusKind::Deleting | ClusterStatusKind::Deleted
            ) {
                continue;
            }
            let newest_config = record.latest_config().version;
            let Some(state) = record.state_for(newest_config) else {
                continue;
            };
            if state.status.status == ClusterStatusKind::Reconcilable {
                due.push(state);
            }
        }
        Ok(due)
    }

    async fn delete(&self, cluster: &str) -> Result<State> {
        let mut clusters = self.clusters.write().map_err(poison_err)?;
        let record = clusters
            .get_mut(cluster)
            .ok_or_else(|| Error::not_found(cluster))?;

        let latest = record.latest_status();
        if matches!(
            latest.status,
            ClusterStatusKind::Deleting | ClusterStatusKind::Deleted
        ) {
            return record
                .latest_state()
                .ok_or_else(|| Error::not_found(cluster));
        }

        let config_version = latest.config_version;
        record.append_status(config_version, ClusterStatusKind::Deleting);
        record
            .state_for(config_version)
            .ok_or_else(|| Error::config_not_found(cluster, config_version))
    }

    async fn status_counts(&self) -> Result<BTreeMap<ClusterStatusKind, usize>> {
        let clusters = self.clusters.read().map_err(poison_err)?;
        let mut counts = BTreeMap::new();
        for record in clusters.values() {
            *counts.entry(record.latest_status().status).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
