//! Chart rendering contract and manifest bundle assembly.
//!
//! The concrete chart-rendering library is an external collaborator; this
//! module captures its contract and ships a file-backed provider for
//! deployments that pre-render their charts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Kind of a rendered manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestType {
    /// A custom resource definition.
    Crd,
    /// A regular chart manifest.
    HelmChart,
}

impl std::fmt::Display for ManifestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crd => f.write_str("CRD"),
            Self::HelmChart => f.write_str("HelmChart"),
        }
    }
}

/// One rendered manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Manifest kind.
    pub manifest_type: ManifestType,
    /// Manifest name (chart or CRD name).
    pub name: String,
    /// Rendered YAML content.
    pub content: String,
}

/// One component to render.
#[derive(Debug, Clone)]
pub struct Component {
    /// Component name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Configuration merged into the chart values.
    pub configuration: BTreeMap<String, Value>,
}

/// A set of components rendered against one cluster and product version.
#[derive(Debug, Clone)]
pub struct ComponentSet {
    /// Kubeconfig of the target cluster.
    pub kubeconfig: String,
    /// Product version whose charts are rendered.
    pub version: String,
    /// Installation profile.
    pub profile: Option<String>,
    /// Components to render.
    pub components: Vec<Component>,
}

impl ComponentSet {
    /// Creates a component set for a single component.
    #[must_use]
    pub fn single(
        kubeconfig: impl Into<String>,
        version: impl Into<String>,
        profile: Option<String>,
        component: Component,
    ) -> Self {
        Self {
            kubeconfig: kubeconfig.into(),
            version: version.into(),
            profile,
            components: vec![component],
        }
    }
}

/// Rendering options; reserved for renderer-specific switches.
#[derive(Debug, Clone, Default)]
pub struct RenderOptions {}

/// Renders manifests for a component set.
///
/// When `install_crd` is false the renderer must not emit CRD manifests;
/// bundle assembly treats such manifests as an illegal state.
#[async_trait]
pub trait ChartProvider: Send + Sync {
    /// Renders all manifests for the component set.
    async fn manifests(
        &self,
        component_set: &ComponentSet,
        install_crd: bool,
        options: &RenderOptions,
    ) -> Result<Vec<Manifest>>;
}

/// Concatenates rendered manifests into one multi-document YAML bundle.
///
/// CRD manifests returned although `install_crd` is false are logged as an
/// illegal state and left out of the bundle; rendering is not failed.
#[must_use]
pub fn assemble_bundle(component: &str, manifests: &[Manifest], install_crd: bool) -> String {
    let mut bundle = String::new();
    for manifest in manifests {
        if !install_crd && manifest.manifest_type == ManifestType::Crd {
            tracing::error!(
                component,
                manifest = %manifest.name,
                "illegal state detected: no CRDs were requested but the chart \
                 provider returned a CRD manifest"
            );
            continue;
        }
        bundle.push_str("---\n");
        bundle.push_str(&format!(
            "# Manifest of {} '{}'\n",
            manifest.manifest_type, component
        ));
        bundle.push_str(&manifest.content);
        if !manifest.content.ends_with('\n') {
            bundle.push('\n');
        }
    }
    bundle
}

/// File-backed chart provider for pre-rendered charts.
///
/// Looks up `{charts_dir}/{component}/{version}.yaml`, falling back to
/// `{charts_dir}/{component}.yaml`. Documents of kind
/// `CustomResourceDefinition` are classified as CRD manifests.
#[derive(Debug, Clone)]
pub struct LocalChartProvider {
    charts_dir: PathBuf,
}

impl LocalChartProvider {
    /// Creates a provider reading from `charts_dir`.
    #[must_use]
    pub fn new(charts_dir: impl Into<PathBuf>) -> Self {
        Self {
            charts_dir: charts_dir.into(),
        }
    }

    async fn read_component_chart(&self, component: &str, version: &str) -> Result<String> {
        let versioned = self
            .charts_dir
            .join(component)
            .join(format!("{version}.yaml"));
        let fallback = self.charts_dir.join(format!("{component}.yaml"));

        for path in [&versioned, &fallback] {
            match tokio::fs::read_to_string(path).await {
                Ok(content) => return Ok(content),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(Error::retriable(format!(
                        "failed to read chart '{}': {err}",
                        path.display()
                    )));
                }
            }
        }
        Err(Error::non_retriable(format!(
            "no chart found for component '{component}' (version '{version}') under '{}'",
            self.charts_dir.display()
        )))
    }
}

fn is_crd_document(document: &str) -> bool {
    serde_yaml::from_str::<Value>(document)
        .ok()
        .and_then(|value| {
            value
                .get("kind")
                .and_then(Value::as_str)
                .map(|kind| kind == "CustomResourceDefinition")
        })
        .unwrap_or(false)
}

#[async_trait]
impl ChartProvider for LocalChartProvider {
    async fn manifests(
        &self,
        component_set: &ComponentSet,
        install_crd: bool,
        _options: &RenderOptions,
    ) -> Result<Vec<Manifest>> {
        let mut manifests = Vec::new();
        for component in &component_set.components {
            let content = self
                .read_component_chart(&component.name, &component_set.version)
                .await?;
            for document in content.split("\n---") {
                let document = document.trim_start_matches("---").trim();
                if document.is_empty() {
                    continue;
                }
                let manifest_type = if is_crd_document(document) {
                    ManifestType::Crd
                } else {
                    ManifestType::HelmChart
                };
                if manifest_type == ManifestType::Crd && !install_crd {
                    // The contract forbids emitting CRDs here; skip early so
                    // bundle assembly does not have to flag us.
                    continue;
                }
                manifests.push(Manifest {
                    manifest_type,
                    name: component.name.clone(),
                    content: document.to_string(),
                });
            }
        }
        tracing::debug!(
            components = component_set.components.len(),
            manifests = manifests.len(),
            "chart rendering finished"
        );
        Ok(manifests)
    }
}
