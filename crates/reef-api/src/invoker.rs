//! Bridges dispatched operations to the component runner.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use reef_inventory::Inventory;
use reef_reconciler::{CallbackHandler, ComponentRunner, ComponentTask};
use reef_scheduler::{ComponentInvoker, InvokeError, Operation};

/// [`ComponentInvoker`] that executes operations in-process through the
/// component runner.
pub struct RunnerInvoker {
    inventory: Arc<dyn Inventory>,
    runner: Arc<ComponentRunner>,
    callback: Arc<dyn CallbackHandler>,
    shutdown: CancellationToken,
}

impl RunnerInvoker {
    /// Creates an invoker.
    #[must_use]
    pub fn new(
        inventory: Arc<dyn Inventory>,
        runner: Arc<ComponentRunner>,
        callback: Arc<dyn CallbackHandler>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inventory,
            runner,
            callback,
            shutdown,
        }
    }

    async fn build_task(&self, operation: &Operation) -> Result<ComponentTask, InvokeError> {
        let state = self
            .inventory
            .get(&operation.cluster, operation.config_version)
            .await
            .map_err(|err| {
                InvokeError::non_retriable(format!("failed to load cluster state: {err}"))
            })?;

        let component = state
            .configuration
            .component(&operation.component)
            .ok_or_else(|| {
                InvokeError::non_retriable(format!(
                    "component '{}' not part of configuration version {}",
                    operation.component, operation.config_version
                ))
            })?;

        Ok(ComponentTask {
            scheduling_id: operation.scheduling_id,
            correlation_id: operation.correlation_id,
            component: operation.component.clone(),
            namespace: operation.namespace.clone(),
            version: state.configuration.kyma_version.clone(),
            profile: state.configuration.profile.clone(),
            configuration: component.configuration.clone(),
            kubeconfig: state.configuration.kubeconfig.clone(),
            // Wave-1 components prepare the cluster and bring their CRDs.
            install_crd: operation.priority == 1,
        })
    }
}

#[async_trait]
impl ComponentInvoker for RunnerInvoker {
    async fn invoke(&self, operation: &Operation) -> Result<(), InvokeError> {
        let task = self.build_task(operation).await?;
        self.runner
            .run(&task, self.callback.clone(), &self.shutdown)
            .await
            .map_err(|err| {
                if err.is_cancelled() {
                    // Shutdown mid-run: re-queue so the next process picks
                    // the operation up again.
                    InvokeError::retriable("reconciliation cancelled during shutdown")
                } else if err.is_retriable() {
                    InvokeError::retriable(err.to_string())
                } else {
                    InvokeError::non_retriable(err.to_string())
                }
            })
    }
}
