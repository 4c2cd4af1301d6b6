//! Cluster entities and the inbound submission model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::status::ClusterStatus;

fn default_component_priority() -> i64 {
    2
}

/// Desired state of one component inside a cluster configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    /// Component name (e.g. `istio`).
    pub name: String,
    /// Target namespace for the component's resources.
    pub namespace: String,
    /// Component configuration, merged into the rendered charts.
    ///
    /// A `BTreeMap` keeps comparison independent of submission key order,
    /// so reordered but identical configuration never allocates a new
    /// configuration version.
    #[serde(default)]
    pub configuration: BTreeMap<String, Value>,
    /// Advisory priority from the submission.
    ///
    /// Wave assignment for dispatch is derived from the configured
    /// pre-components when the reconciliation is created; this field is
    /// accepted for forward compatibility.
    #[serde(default = "default_component_priority")]
    pub priority: i64,
}

/// Inbound declarative cluster submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterModel {
    /// Stable cluster identifier.
    pub cluster: String,
    /// Kubeconfig for the target cluster (opaque blob).
    pub kubeconfig: String,
    /// Product version to install.
    pub kyma_version: String,
    /// Installation profile (e.g. `production`, `evaluation`).
    #[serde(default)]
    pub profile: Option<String>,
    /// Ordered component list.
    pub components: Vec<ComponentSpec>,
}

impl ClusterModel {
    /// Validates the submission.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] when required fields are missing or empty.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: "cluster identifier must not be empty".into(),
            });
        }
        if self.kubeconfig.trim().is_empty() {
            return Err(Error::InvalidInput {
                message: format!("cluster '{}': kubeconfig must not be empty", self.cluster),
            });
        }
        if self.components.is_empty() {
            return Err(Error::InvalidInput {
                message: format!("cluster '{}': component list must not be empty", self.cluster),
            });
        }
        for component in &self.components {
            if component.name.trim().is_empty() {
                return Err(Error::InvalidInput {
                    message: format!("cluster '{}': component name must not be empty", self.cluster),
                });
            }
        }
        Ok(())
    }
}

/// The cluster entity itself, independent of configuration versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Stable cluster identifier.
    pub cluster: String,
    /// Cluster entity version, bumped on re-creation after deletion.
    pub version: i64,
    /// When the cluster was first registered.
    pub created: DateTime<Utc>,
}

/// One immutable configuration version of a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// The cluster this configuration belongs to.
    pub cluster: String,
    /// Strictly increasing per-cluster configuration version.
    pub version: i64,
    /// Kubeconfig for the target cluster (opaque blob).
    pub kubeconfig: String,
    /// Contract version of the submitting client.
    pub contract_version: u64,
    /// Product version to install.
    pub kyma_version: String,
    /// Installation profile.
    pub profile: Option<String>,
    /// Ordered component list.
    pub components: Vec<ComponentSpec>,
    /// When the configuration version was created.
    pub created: DateTime<Utc>,
}

impl ClusterConfig {
    /// Returns true if `model` describes the same desired state as this
    /// configuration.
    ///
    /// The comparison is semantic: component order is meaningful, map key
    /// order inside component configuration is not (maps are ordered).
    #[must_use]
    pub fn matches(&self, model: &ClusterModel) -> bool {
        self.kubeconfig == model.kubeconfig
            && self.kyma_version == model.kyma_version
            && self.profile == model.profile
            && self.components == model.components
    }

    /// Looks up a component by name.
    #[must_use]
    pub fn component(&self, name: &str) -> Option<&ComponentSpec> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Snapshot of a cluster at one point of its history: the entity, one
/// configuration version, and the authoritative status for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    /// The cluster entity.
    pub cluster: Cluster,
    /// The configuration version of this snapshot.
    pub configuration: ClusterConfig,
    /// The newest status record for this configuration version.
    pub status: ClusterStatus,
}
