//! The work item handed to the component runner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use reef_core::{CorrelationId, SchedulingId};

/// Everything the runner needs to install one component on one cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTask {
    /// The reconciliation this task belongs to.
    pub scheduling_id: SchedulingId,
    /// The operation this task executes.
    pub correlation_id: CorrelationId,
    /// Component name.
    pub component: String,
    /// Target namespace.
    pub namespace: String,
    /// Product version whose charts are rendered.
    pub version: String,
    /// Installation profile.
    #[serde(default)]
    pub profile: Option<String>,
    /// Component configuration merged into the rendered charts.
    #[serde(default)]
    pub configuration: BTreeMap<String, Value>,
    /// Kubeconfig of the target cluster (opaque blob).
    pub kubeconfig: String,
    /// Whether custom resource definitions may be installed.
    pub install_crd: bool,
}
