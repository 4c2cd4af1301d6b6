//! Install action overrides.
//!
//! The default install path (render, deploy, track) can be replaced or
//! wrapped per `(component, version)`: a pre-install hook, a replacement
//! install action, and a post-install hook. Absence of an install action
//! selects the default path.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::kubernetes::KubernetesClient;

/// Everything an action may need about the component being reconciled.
#[derive(Clone)]
pub struct ActionContext {
    /// Component name.
    pub component: String,
    /// Product version being installed.
    pub version: String,
    /// Installation profile.
    pub profile: Option<String>,
    /// Target namespace.
    pub namespace: String,
    /// Component configuration.
    pub configuration: BTreeMap<String, Value>,
    /// Client for the target cluster.
    pub kube: Arc<dyn KubernetesClient>,
}

/// A custom step executed instead of (or around) the default install path.
#[async_trait]
pub trait Action: Send + Sync {
    /// Runs the action against the target cluster.
    async fn run(&self, context: &ActionContext) -> Result<()>;
}

type ActionKey = (String, String);

/// Registry of per `(component, version)` actions.
#[derive(Default)]
pub struct ActionRegistry {
    pre_install: HashMap<ActionKey, Arc<dyn Action>>,
    install: HashMap<ActionKey, Arc<dyn Action>>,
    post_install: HashMap<ActionKey, Arc<dyn Action>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pre-install hook.
    pub fn register_pre_install(
        &mut self,
        component: impl Into<String>,
        version: impl Into<String>,
        action: Arc<dyn Action>,
    ) {
        self.pre_install
            .insert((component.into(), version.into()), action);
    }

    /// Registers an install action replacing the default install path.
    pub fn register_install(
        &mut self,
        component: impl Into<String>,
        version: impl Into<String>,
        action: Arc<dyn Action>,
    ) {
        self.install
            .insert((component.into(), version.into()), action);
    }

    /// Registers a post-install hook.
    pub fn register_post_install(
        &mut self,
        component: impl Into<String>,
        version: impl Into<String>,
        action: Arc<dyn Action>,
    ) {
        self.post_install
            .insert((component.into(), version.into()), action);
    }

    /// Looks up the pre-install hook for a component and version.
    #[must_use]
    pub fn pre_install(&self, component: &str, version: &str) -> Option<Arc<dyn Action>> {
        self.pre_install
            .get(&(component.to_string(), version.to_string()))
            .cloned()
    }

    /// Looks up the install action for a component and version.
    #[must_use]
    pub fn install(&self, component: &str, version: &str) -> Option<Arc<dyn Action>> {
        self.install
            .get(&(component.to_string(), version.to_string()))
            .cloned()
    }

    /// Looks up the post-install hook for a component and version.
    #[must_use]
    pub fn post_install(&self, component: &str, version: &str) -> Option<Arc<dyn Action>> {
        self.post_install
            .get(&(component.to_string(), version.to_string()))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    struct NoopAction;

    #[async_trait]
    impl Action for NoopAction {
        async fn run(&self, _context: &ActionContext) -> Result<()> {
            Ok(())
        }
    }

    struct FailingAction;

    #[async_trait]
    impl Action for FailingAction {
        async fn run(&self, _context: &ActionContext) -> Result<()> {
            Err(Error::non_retriable("migration script missing"))
        }
    }

    #[test]
    fn lookup_is_exact_on_component_and_version() {
        let mut registry = ActionRegistry::new();
        registry.register_install("istio", "2.4.0", Arc::new(NoopAction));
        registry.register_pre_install("istio", "2.4.0", Arc::new(FailingAction));

        assert!(registry.install("istio", "2.4.0").is_some());
        assert!(registry.install("istio", "2.5.0").is_none());
        assert!(registry.install("logging", "2.4.0").is_none());
        assert!(registry.pre_install("istio", "2.4.0").is_some());
        assert!(registry.post_install("istio", "2.4.0").is_none());
    }
}
