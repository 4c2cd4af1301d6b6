//! Installation progress tracking.
//!
//! After a deploy, the tracker polls the watchable resources of the bundle
//! until all of them are ready, one of them fails terminally, or the overall
//! timeout elapses. Readiness rules are pure functions over typed objects;
//! the [`StatusReader`] seam supplies the objects.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::Api;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::kubernetes::ResourceRef;

/// Resource kinds the tracker knows how to judge; everything else is
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchableKind {
    /// `v1/Pod`
    Pod,
    /// `apps/v1/Deployment`
    Deployment,
    /// `apps/v1/StatefulSet`
    StatefulSet,
    /// `apps/v1/DaemonSet`
    DaemonSet,
    /// `batch/v1/Job`
    Job,
    /// `v1/PersistentVolumeClaim`
    PersistentVolumeClaim,
}

impl WatchableKind {
    /// Maps a manifest kind to a watchable kind, if any.
    #[must_use]
    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "Pod" => Some(Self::Pod),
            "Deployment" => Some(Self::Deployment),
            "StatefulSet" => Some(Self::StatefulSet),
            "DaemonSet" => Some(Self::DaemonSet),
            "Job" => Some(Self::Job),
            "PersistentVolumeClaim" => Some(Self::PersistentVolumeClaim),
            _ => None,
        }
    }

    /// Returns the manifest kind string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::Deployment => "Deployment",
            Self::StatefulSet => "StatefulSet",
            Self::DaemonSet => "DaemonSet",
            Self::Job => "Job",
            Self::PersistentVolumeClaim => "PersistentVolumeClaim",
        }
    }
}

impl std::fmt::Display for WatchableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One resource under progress tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedResource {
    /// Resource kind.
    pub kind: WatchableKind,
    /// Resource namespace.
    pub namespace: String,
    /// Resource name.
    pub name: String,
}

impl std::fmt::Display for TrackedResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Judged status of one tracked resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceStatus {
    /// The resource is ready.
    Ready,
    /// The resource is not ready yet.
    Pending(String),
    /// The resource entered a non-recoverable error state.
    Failed(String),
}

/// Supplies judged resource statuses to the tracker.
#[async_trait]
pub trait StatusReader: Send + Sync {
    /// Reads and judges the current status of one resource.
    async fn status(&self, resource: &TrackedResource) -> Result<ResourceStatus>;
}

/// Terminal outcome of one tracking run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// All tracked resources became ready.
    Ready,
    /// A tracked resource entered a non-recoverable error state.
    TerminallyFailed {
        /// The failed resource.
        resource: String,
        /// Failure description.
        reason: String,
    },
    /// The timeout elapsed with resources still pending.
    Timeout {
        /// Resources that never became ready.
        pending: Vec<String>,
    },
    /// Tracking was cancelled.
    Cancelled,
}

/// Progress tracker tuning knobs.
#[derive(Debug, Clone)]
pub struct ProgressConfig {
    /// Interval between polls.
    pub interval: Duration,
    /// Overall deadline for the tracked bundle.
    pub timeout: Duration,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Polls a set of resources until a terminal outcome.
pub struct ProgressTracker {
    reader: std::sync::Arc<dyn StatusReader>,
    config: ProgressConfig,
    resources: Vec<TrackedResource>,
}

impl ProgressTracker {
    /// Creates a tracker with no resources.
    #[must_use]
    pub fn new(reader: std::sync::Arc<dyn StatusReader>, config: ProgressConfig) -> Self {
        Self {
            reader,
            config,
            resources: Vec::new(),
        }
    }

    /// Adds one resource to track.
    pub fn add_resource(
        &mut self,
        kind: WatchableKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) {
        self.resources.push(TrackedResource {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        });
    }

    /// Adds the watchable resources of a deployed bundle; non-watchable
    /// kinds are ignored.
    pub fn add_resources(&mut self, resources: &[ResourceRef]) {
        for resource in resources {
            let Some(kind) = WatchableKind::from_kind(&resource.kind) else {
                tracing::debug!(resource = %resource, "ignoring non-watchable resource");
                continue;
            };
            self.add_resource(
                kind,
                resource.namespace.clone().unwrap_or_else(|| "default".to_string()),
                resource.name.clone(),
            );
        }
    }

    /// Returns the number of tracked resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Polls until all resources are ready, one failed terminally, the
    /// timeout elapsed, or `cancel` fired.
    ///
    /// # Errors
    ///
    /// Propagates reader failures (typically transient API errors).
    pub async fn watch(&self, cancel: &CancellationToken) -> Result<TrackerOutcome> {
        if self.resources.is_empty() {
            return Ok(TrackerOutcome::Ready);
        }

        let deadline = tokio::time::Instant::now() + self.config.timeout;
        loop {
            let mut pending = Vec::new();
            for resource in &self.resources {
                match self.reader.status(resource).await? {
                    ResourceStatus::Ready => {}
                    ResourceStatus::Pending(reason) => {
                        pending.push(format!("{resource}: {reason}"));
                    }
                    ResourceStatus::Failed(reason) => {
                        tracing::warn!(resource = %resource, reason, "tracked resource failed");
                        return Ok(TrackerOutcome::TerminallyFailed {
                            resource: resource.to_string(),
                            reason,
                        });
                    }
                }
            }

            if pending.is_empty() {
                tracing::debug!(resources = self.resources.len(), "all tracked resources ready");
                return Ok(TrackerOutcome::Ready);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(TrackerOutcome::Timeout { pending });
            }

            tokio::select! {
                () = cancel.cancelled() => return Ok(TrackerOutcome::Cancelled),
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }
}

/// Judges a pod: running with all containers ready (or succeeded).
#[must_use]
pub fn pod_status(pod: &Pod) -> ResourceStatus {
    let Some(status) = &pod.status else {
        return ResourceStatus::Pending("no status reported".into());
    };
    match status.phase.as_deref() {
        Some("Succeeded") => ResourceStatus::Ready,
        Some("Failed") => ResourceStatus::Failed("pod failed".into()),
        Some("Running") => {
            let all_ready = status
                .container_statuses
                .as_ref()
                .is_some_and(|containers| containers.iter().all(|c| c.ready));
            if all_ready {
                ResourceStatus::Ready
            } else {
                ResourceStatus::Pending("containers not ready".into())
            }
        }
        phase => ResourceStatus::Pending(format!("phase {}", phase.unwrap_or("unknown"))),
    }
}

/// Judges a deployment: observed generation caught up and enough ready
/// replicas.
#[must_use]
pub fn deployment_status(deployment: &Deployment) -> ResourceStatus {
    let Some(status) = &deployment.status else {
        return ResourceStatus::Pending("no status reported".into());
    };
    if status.observed_generation < deployment.metadata.generation {
        return ResourceStatus::Pending("generation not yet observed".into());
    }
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    if ready >= desired {
        ResourceStatus::Ready
    } else {
        ResourceStatus::Pending(format!("{ready}/{desired} replicas ready"))
    }
}

/// Judges a stateful set: observed generation caught up and enough ready
/// replicas.
#[must_use]
pub fn stateful_set_status(stateful_set: &StatefulSet) -> ResourceStatus {
    let Some(status) = &stateful_set.status else {
        return ResourceStatus::Pending("no status reported".into());
    };
    if status.observed_generation < stateful_set.metadata.generation {
        return ResourceStatus::Pending("generation not yet observed".into());
    }
    let desired = stateful_set
        .spec
        .as_ref()
        .and_then(|spec| spec.replicas)
        .unwrap_or(1);
    let ready = status.ready_replicas.unwrap_or(0);
    if ready >= desired {
        ResourceStatus::Ready
    } else {
        ResourceStatus::Pending(format!("{ready}/{desired} replicas ready"))
    }
}

/// Judges a daemon set: every scheduled pod ready.
#[must_use]
pub fn daemon_set_status(daemon_set: &DaemonSet) -> ResourceStatus {
    let Some(status) = &daemon_set.status else {
        return ResourceStatus::Pending("no status reported".into());
    };
    if status.observed_generation < daemon_set.metadata.generation {
        return ResourceStatus::Pending("generation not yet observed".into());
    }
    if status.number_ready >= status.desired_number_scheduled {
        ResourceStatus::Ready
    } else {
        ResourceStatus::Pending(format!(
            "{}/{} pods ready",
            status.number_ready, status.desired_number_scheduled
        ))
    }
}

/// Judges a job: enough successful completions; a `Failed` condition is
/// terminal.
#[must_use]
pub fn job_status(job: &Job) -> ResourceStatus {
    let Some(status) = &job.status else {
        return ResourceStatus::Pending("no status reported".into());
    };
    if let Some(conditions) = &status.conditions {
        if let Some(failed) = conditions
            .iter()
            .find(|c| c.type_ == "Failed" && c.status == "True")
        {
            let reason = failed
                .message
                .clone()
                .unwrap_or_else(|| "job failed".to_string());
            return ResourceStatus::Failed(reason);
        }
    }
    let completions = job
        .spec
        .as_ref()
        .and_then(|spec| spec.completions)
        .unwrap_or(1);
    if status.succeeded.unwrap_or(0) >= completions {
        ResourceStatus::Ready
    } else {
        ResourceStatus::Pending(format!(
            "{}/{completions} completions",
            status.succeeded.unwrap_or(0)
        ))
    }
}

/// Judges a persistent volume claim: `Bound` is ready, `Lost` is terminal.
#[must_use]
pub fn persistent_volume_claim_status(claim: &PersistentVolumeClaim) -> ResourceStatus {
    let phase = claim
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref());
    match phase {
        Some("Bound") => ResourceStatus::Ready,
        Some("Lost") => ResourceStatus::Failed("persistent volume lost".into()),
        phase => ResourceStatus::Pending(format!("phase {}", phase.unwrap_or("unknown"))),
    }
}

/// [`StatusReader`] backed by a kube client; a missing resource counts as
/// pending, not failed.
pub struct KubeStatusReader {
    client: kube::Client,
}

impl KubeStatusReader {
    /// Creates a reader for one cluster.
    #[must_use]
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    async fn read<K>(
        &self,
        resource: &TrackedResource,
        judge: fn(&K) -> ResourceStatus,
    ) -> Result<ResourceStatus>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + std::fmt::Debug,
        <K as kube::Resource>::DynamicType: Default,
    {
        let api = Api::<K>::namespaced(self.client.clone(), &resource.namespace);
        match api.get_opt(&resource.name).await {
            Ok(Some(object)) => Ok(judge(&object)),
            Ok(None) => Ok(ResourceStatus::Pending("resource not visible yet".into())),
            Err(err) => Err(Error::retriable(format!(
                "failed to read status of {resource}: {err}"
            ))),
        }
    }
}

#[async_trait]
impl StatusReader for KubeStatusReader {
    async fn status(&self, resource: &TrackedResource) -> Result<ResourceStatus> {
        match resource.kind {
            WatchableKind::Pod => self.read::<Pod>(resource, pod_status).await,
            WatchableKind::Deployment => self.read::<Deployment>(resource, deployment_status).await,
            WatchableKind::StatefulSet => {
                self.read::<StatefulSet>(resource, stateful_set_status).await
            }
            WatchableKind::DaemonSet => self.read::<DaemonSet>(resource, daemon_set_status).await,
            WatchableKind::Job => self.read::<Job>(resource, job_status).await,
            WatchableKind::PersistentVolumeClaim => {
                self.read::<PersistentVolumeClaim>(resource, persistent_volume_claim_status)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{
        DaemonSetStatus, DeploymentSpec, DeploymentStatus, StatefulSetSpec, StatefulSetStatus,
    };
    use k8s_openapi::api::batch::v1::{JobCondition, JobSpec, JobStatus};
    use k8s_openapi::api::core::v1::{
        ContainerStatus, PersistentVolumeClaimStatus, PodStatus,
    };
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    #[test]
    fn watchable_kind_roundtrip_and_unknowns() {
        assert_eq!(WatchableKind::from_kind("Pod"), Some(WatchableKind::Pod));
        assert_eq!(
            WatchableKind::from_kind("PersistentVolumeClaim"),
            Some(WatchableKind::PersistentVolumeClaim)
        );
        assert_eq!(WatchableKind::from_kind("ConfigMap"), None);
        assert_eq!(WatchableKind::from_kind("ClusterRole"), None);
    }

    #[test]
    fn pod_readiness() {
        let mut pod = Pod::default();
        assert!(matches!(pod_status(&pod), ResourceStatus::Pending(_)));

        pod.status = Some(PodStatus {
            phase: Some("Running".into()),
            container_statuses: Some(vec![
                ContainerStatus {
                    ready: true,
                    ..ContainerStatus::default()
                },
                ContainerStatus {
                    ready: false,
                    ..ContainerStatus::default()
                },
            ]),
            ..PodStatus::default()
        });
        assert!(matches!(pod_status(&pod), ResourceStatus::Pending(_)));

        pod.status = Some(PodStatus {
            phase: Some("Running".into()),
            container_statuses: Some(vec![ContainerStatus {
                ready: true,
                ..ContainerStatus::default()
            }]),
            ..PodStatus::default()
        });
        assert_eq!(pod_status(&pod), ResourceStatus::Ready);

        pod.status = Some(PodStatus {
            phase: Some("Failed".into()),
            ..PodStatus::default()
        });
        assert!(matches!(pod_status(&pod), ResourceStatus::Failed(_)));
    }

    #[test]
    fn deployment_readiness() {
        let mut deployment = Deployment {
            spec: Some(DeploymentSpec {
                replicas: Some(3),
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        };
        deployment.metadata.generation = Some(2);

        deployment.status = Some(DeploymentStatus {
            observed_generation: Some(1),
            ready_replicas: Some(3),
            ..DeploymentStatus::default()
        });
        assert!(matches!(
            deployment_status(&deployment),
            ResourceStatus::Pending(_)
        ));

        deployment.status = Some(DeploymentStatus {
            observed_generation: Some(2),
            ready_replicas: Some(2),
            ..DeploymentStatus::default()
        });
        assert!(matches!(
            deployment_status(&deployment),
            ResourceStatus::Pending(_)
        ));

        deployment.status = Some(DeploymentStatus {
            observed_generation: Some(2),
            ready_replicas: Some(3),
            ..DeploymentStatus::default()
        });
        assert_eq!(deployment_status(&deployment), ResourceStatus::Ready);
    }

    #[test]
    fn stateful_set_readiness() {
        let mut stateful_set = StatefulSet {
            spec: Some(StatefulSetSpec {
                replicas: Some(2),
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        };
        stateful_set.metadata.generation = Some(1);
        stateful_set.status = Some(StatefulSetStatus {
            observed_generation: Some(1),
            ready_replicas: Some(2),
            ..StatefulSetStatus::default()
        });
        assert_eq!(stateful_set_status(&stateful_set), ResourceStatus::Ready);
    }

    #[test]
    fn daemon_set_readiness() {
        let mut daemon_set = DaemonSet::default();
        daemon_set.status = Some(DaemonSetStatus {
            desired_number_scheduled: 3,
            number_ready: 2,
            ..DaemonSetStatus::default()
        });
        assert!(matches!(
            daemon_set_status(&daemon_set),
            ResourceStatus::Pending(_)
        ));

        daemon_set.status = Some(DaemonSetStatus {
            desired_number_scheduled: 3,
            number_ready: 3,
            ..DaemonSetStatus::default()
        });
        assert_eq!(daemon_set_status(&daemon_set), ResourceStatus::Ready);
    }

    #[test]
    fn job_readiness_and_failure() {
        let mut job = Job {
            spec: Some(JobSpec {
                completions: Some(1),
                ..JobSpec::default()
            }),
            ..Job::default()
        };

        job.status = Some(JobStatus {
            succeeded: Some(1),
            ..JobStatus::default()
        });
        assert_eq!(job_status(&job), ResourceStatus::Ready);

        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".into(),
                status: "True".into(),
                message: Some("backoff limit exceeded".into()),
                ..JobCondition::default()
            }]),
            ..JobStatus::default()
        });
        assert_eq!(
            job_status(&job),
            ResourceStatus::Failed("backoff limit exceeded".into())
        );
    }

    #[test]
    fn pvc_readiness() {
        let mut claim = PersistentVolumeClaim::default();
        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Pending".into()),
            ..PersistentVolumeClaimStatus::default()
        });
        assert!(matches!(
            persistent_volume_claim_status(&claim),
            ResourceStatus::Pending(_)
        ));

        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".into()),
            ..PersistentVolumeClaimStatus::default()
        });
        assert_eq!(persistent_volume_claim_status(&claim), ResourceStatus::Ready);

        claim.status = Some(PersistentVolumeClaimStatus {
            phase: Some("Lost".into()),
            ..PersistentVolumeClaimStatus::default()
        });
        assert!(matches!(
            persistent_volume_claim_status(&claim),
            ResourceStatus::Failed(_)
        ));
    }

    /// Reader replaying a scripted status sequence per resource.
    struct FakeReader {
        scripts: Mutex<HashMap<String, VecDeque<ResourceStatus>>>,
    }

    impl FakeReader {
        fn new(scripts: &[(&str, &[ResourceStatus])]) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(
                    scripts
                        .iter()
                        .map(|(name, steps)| {
                            ((*name).to_string(), steps.iter().cloned().collect())
                        })
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl StatusReader for FakeReader {
        async fn status(&self, resource: &TrackedResource) -> Result<ResourceStatus> {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.entry(resource.name.clone()).or_default();
            Ok(if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap_or(ResourceStatus::Ready)
            })
        }
    }

    fn config(timeout: Duration) -> ProgressConfig {
        ProgressConfig {
            interval: Duration::from_millis(5),
            timeout,
        }
    }

    #[tokio::test]
    async fn watch_without_resources_is_ready() -> Result<()> {
        let reader = FakeReader::new(&[]);
        let tracker = ProgressTracker::new(reader, config(Duration::from_secs(1)));
        assert_eq!(
            tracker.watch(&CancellationToken::new()).await?,
            TrackerOutcome::Ready
        );
        Ok(())
    }

    #[tokio::test]
    async fn watch_waits_until_all_ready() -> Result<()> {
        let reader = FakeReader::new(&[(
            "istiod",
            &[
                ResourceStatus::Pending("0/1 replicas ready".into()),
                ResourceStatus::Pending("0/1 replicas ready".into()),
                ResourceStatus::Ready,
            ],
        )]);
        let mut tracker = ProgressTracker::new(reader, config(Duration::from_secs(5)));
        tracker.add_resource(WatchableKind::Deployment, "istio-system", "istiod");

        assert_eq!(
            tracker.watch(&CancellationToken::new()).await?,
            TrackerOutcome::Ready
        );
        Ok(())
    }

    #[tokio::test]
    async fn watch_reports_terminal_failure() -> Result<()> {
        let reader = FakeReader::new(&[
            ("istiod", &[ResourceStatus::Ready]),
            (
                "migration",
                &[ResourceStatus::Failed("backoff limit exceeded".into())],
            ),
        ]);
        let mut tracker = ProgressTracker::new(reader, config(Duration::from_secs(5)));
        tracker.add_resource(WatchableKind::Deployment, "istio-system", "istiod");
        tracker.add_resource(WatchableKind::Job, "istio-system", "migration");

        let outcome = tracker.watch(&CancellationToken::new()).await?;
        assert!(matches!(
            outcome,
            TrackerOutcome::TerminallyFailed { ref resource, .. }
                if resource.contains("migration")
        ));
        Ok(())
    }

    #[tokio::test]
    async fn watch_times_out_with_pending_resources() -> Result<()> {
        let reader = FakeReader::new(&[(
            "istiod",
            &[ResourceStatus::Pending("0/1 replicas ready".into())],
        )]);
        let mut tracker = ProgressTracker::new(reader, config(Duration::from_millis(20)));
        tracker.add_resource(WatchableKind::Deployment, "istio-system", "istiod");

        let outcome = tracker.watch(&CancellationToken::new()).await?;
        let TrackerOutcome::Timeout { pending } = outcome else {
            panic!("expected timeout, got {outcome:?}");
        };
        assert_eq!(pending.len(), 1);
        assert!(pending[0].contains("istiod"));
        Ok(())
    }

    #[tokio::test]
    async fn watch_aborts_on_cancellation() -> Result<()> {
        let reader = FakeReader::new(&[(
            "istiod",
            &[ResourceStatus::Pending("0/1 replicas ready".into())],
        )]);
        let mut tracker = ProgressTracker::new(reader, config(Duration::from_secs(60)));
        tracker.add_resource(WatchableKind::Deployment, "istio-system", "istiod");

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(tracker.watch(&cancel).await?, TrackerOutcome::Cancelled);
        Ok(())
    }

    #[tokio::test]
    async fn add_resources_ignores_unknown_kinds() {
        let reader = FakeReader::new(&[]);
        let mut tracker = ProgressTracker::new(reader, ProgressConfig::default());
        tracker.add_resources(&[
            ResourceRef {
                kind: "Deployment".into(),
                namespace: Some("istio-system".into()),
                name: "istiod".into(),
            },
            ResourceRef {
                kind: "ConfigMap".into(),
                namespace: Some("istio-system".into()),
                name: "istio-config".into(),
            },
            ResourceRef {
                kind: "ClusterRole".into(),
                namespace: None,
                name: "istiod-role".into(),
            },
        ]);
        assert_eq!(tracker.len(), 1);
        assert!(!tracker.is_empty());
    }
}
