//! Drives one component operation to a terminal state.
//!
//! One run is a bounded retry loop around the reconcile sequence:
//! pre-install hook, install (custom action or render/deploy/track), and
//! post-install hook. Lifecycle changes stream to the origin through the
//! status updater; cancellation aborts between steps and between attempts.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use reef_core::retry::{retry, Attempt, RetryError};

use crate::actions::{ActionContext, ActionRegistry};
use crate::callback::CallbackHandler;
use crate::chart::{assemble_bundle, ChartProvider, Component, ComponentSet, RenderOptions};
use crate::error::{Error, Result};
use crate::kubernetes::{KubernetesClient, KubernetesClientFactory};
use crate::progress::{ProgressConfig, ProgressTracker, TrackerOutcome};
use crate::status::{StatusUpdater, StatusUpdaterConfig};
use crate::task::ComponentTask;

/// Runner tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Attempts per operation before giving up.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Status updater configuration.
    pub status_updater: StatusUpdaterConfig,
    /// Progress tracker configuration.
    pub progress: ProgressConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_secs(30),
            status_updater: StatusUpdaterConfig::default(),
            progress: ProgressConfig::default(),
        }
    }
}

/// Installs one component on one target cluster.
pub struct ComponentRunner {
    chart_provider: Arc<dyn ChartProvider>,
    clients: Arc<dyn KubernetesClientFactory>,
    actions: Arc<ActionRegistry>,
    config: RunnerConfig,
}

impl ComponentRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(
        chart_provider: Arc<dyn ChartProvider>,
        clients: Arc<dyn KubernetesClientFactory>,
        actions: Arc<ActionRegistry>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            chart_provider,
            clients,
            actions,
            config,
        }
    }

    /// Runs the task to a terminal state.
    ///
    /// On overall success the status updater reports `success`; on
    /// exhaustion of retries or a permanent failure it reports `error`.
    /// Cancellation aborts the retry loop immediately without a terminal
    /// report.
    ///
    /// # Errors
    ///
    /// Returns the last reconcile error; its retry classification tells the
    /// dispatcher whether the operation may be re-queued.
    pub async fn run(
        &self,
        task: &ComponentTask,
        callback: Arc<dyn CallbackHandler>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let updater = StatusUpdater::new(callback, self.config.status_updater.clone(), cancel);

        let outcome = retry(
            self.config.max_retries,
            self.config.retry_delay,
            cancel,
            |attempt| {
                let updater = &updater;
                async move {
                    if let Err(err) = updater.running().await {
                        return Attempt::Abort(err);
                    }
                    match self.reconcile(task, cancel).await {
                        Ok(()) => Attempt::Done(()),
                        Err(err) if err.is_cancelled() => Attempt::Abort(err),
                        Err(err) => {
                            if let Err(callback_err) = updater.failed(Some(&err.to_string())).await
                            {
                                return Attempt::Abort(callback_err);
                            }
                            if err.is_retriable() {
                                tracing::warn!(
                                    component = %task.component,
                                    version = %task.version,
                                    attempt,
                                    error = %err,
                                    "reconciliation attempt failed, retrying"
                                );
                                Attempt::Retry(err)
                            } else {
                                Attempt::Abort(err)
                            }
                        }
                    }
                }
            },
        )
        .await;

        match outcome {
            Ok(()) => {
                tracing::info!(
                    component = %task.component,
                    version = %task.version,
                    "reconciliation of component finished successfully"
                );
                updater.success().await?;
                Ok(())
            }
            Err(RetryError::Cancelled) => {
                tracing::info!(
                    component = %task.component,
                    "reconciliation of component cancelled"
                );
                Err(Error::Cancelled)
            }
            Err(RetryError::Aborted(err) | RetryError::Exhausted(err)) => {
                if err.is_cancelled() {
                    return Err(err);
                }
                tracing::warn!(
                    component = %task.component,
                    version = %task.version,
                    error = %err,
                    "reconciliation of component failed consistently: giving up"
                );
                if let Err(callback_err) = updater.error(Some(&err.to_string())).await {
                    tracing::warn!(
                        component = %task.component,
                        error = %callback_err,
                        "failed to report terminal error state"
                    );
                }
                Err(err)
            }
        }
    }

    /// One reconcile attempt: hooks plus install.
    async fn reconcile(&self, task: &ComponentTask, cancel: &CancellationToken) -> Result<()> {
        let kube = self.clients.client_for(&task.kubeconfig).await?;
        let context = self.action_context(task, kube.clone());

        if let Some(action) = self.actions.pre_install(&task.component, &task.version) {
            action.run(&context).await.map_err(|err| {
                tracing::warn!(
                    component = %task.component,
                    version = %task.version,
                    error = %err,
                    "pre-installation action failed"
                );
                err
            })?;
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        if let Some(action) = self.actions.install(&task.component, &task.version) {
            action.run(&context).await.map_err(|err| {
                tracing::warn!(
                    component = %task.component,
                    version = %task.version,
                    error = %err,
                    "installation action failed"
                );
                err
            })?;
        } else {
            self.install(task, &kube, cancel).await?;
        }

        if let Some(action) = self.actions.post_install(&task.component, &task.version) {
            action.run(&context).await.map_err(|err| {
                tracing::warn!(
                    component = %task.component,
                    version = %task.version,
                    error = %err,
                    "post-installation action failed"
                );
                err
            })?;
        }
        Ok(())
    }

    /// Default install path: render, deploy, track.
    async fn install(
        &self,
        task: &ComponentTask,
        kube: &Arc<dyn KubernetesClient>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let bundle = self.render_bundle(task).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        kube.deploy(&bundle).await.map_err(|err| {
            tracing::warn!(
                component = %task.component,
                error = %err,
                "failed to deploy manifests on target cluster"
            );
            err
        })?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.track_progress(kube, &bundle, cancel).await
    }

    async fn render_bundle(&self, task: &ComponentTask) -> Result<String> {
        let component_set = ComponentSet::single(
            task.kubeconfig.clone(),
            task.version.clone(),
            task.profile.clone(),
            Component {
                name: task.component.clone(),
                namespace: task.namespace.clone(),
                configuration: task.configuration.clone(),
            },
        );
        let manifests = self
            .chart_provider
            .manifests(&component_set, task.install_crd, &RenderOptions::default())
            .await
            .map_err(|err| {
                tracing::warn!(
                    component = %task.component,
                    error = %err,
                    "failed to render manifests"
                );
                err
            })?;
        tracing::debug!(
            component = %task.component,
            manifests = manifests.len(),
            "chart rendering returned manifests"
        );
        Ok(assemble_bundle(&task.component, &manifests, task.install_crd))
    }

    /// Watches the deployed resources until ready; blocking call.
    async fn track_progress(
        &self,
        kube: &Arc<dyn KubernetesClient>,
        bundle: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let resources = kube.deployed_resources(bundle).await?;
        let mut tracker = ProgressTracker::new(kube.status_reader(), self.config.progress.clone());
        tracker.add_resources(&resources);
        tracing::debug!(resources = tracker.len(), "start watching installation progress");

        match tracker.watch(cancel).await? {
            TrackerOutcome::Ready => Ok(()),
            TrackerOutcome::TerminallyFailed { resource, reason } => Err(Error::non_retriable(
                format!("deployed resource '{resource}' failed: {reason}"),
            )),
            TrackerOutcome::Timeout { pending } => Err(Error::retriable(format!(
                "timeout waiting for deployed resources: {}",
                pending.join(", ")
            ))),
            TrackerOutcome::Cancelled => Err(Error::Cancelled),
        }
    }

    fn action_context(&self, task: &ComponentTask, kube: Arc<dyn KubernetesClient>) -> ActionContext {
        ActionContext {
            component: task.component.clone(),
            version: task.version.clone(),
            profile: task.profile.clone(),
            namespace: task.namespace.clone(),
            configuration: task.configuration.clone(),
            kube,
        }
    }
}
