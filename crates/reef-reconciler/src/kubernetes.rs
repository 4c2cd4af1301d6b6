//! Kubernetes client contract and kube-backed implementation.
//!
//! Deploy is server-side apply: every manifest document is resolved through
//! API discovery and applied as a `DynamicObject` with a fixed field
//! manager. The trait seam keeps the runner testable without a cluster.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::{Discovery, Scope};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::progress::StatusReader;

/// Field manager used for server-side apply.
const FIELD_MANAGER: &str = "reef";

/// Reference to one deployed Kubernetes resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// Resource kind (e.g. `Deployment`).
    pub kind: String,
    /// Resource namespace; `None` for cluster-scoped resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Resource name.
    pub name: String,
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind, namespace, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Client for one target cluster.
#[async_trait]
pub trait KubernetesClient: Send + Sync {
    /// Applies every document of the manifest bundle to the cluster.
    async fn deploy(&self, manifest: &str) -> Result<()>;

    /// Lists the resources defined in the manifest bundle.
    async fn deployed_resources(&self, manifest: &str) -> Result<Vec<ResourceRef>>;

    /// Returns a status reader for progress tracking on this cluster.
    fn status_reader(&self) -> Arc<dyn StatusReader>;
}

/// Builds (and caches) clients per kubeconfig.
#[async_trait]
pub trait KubernetesClientFactory: Send + Sync {
    /// Returns a client for the cluster the kubeconfig points at.
    async fn client_for(&self, kubeconfig: &str) -> Result<Arc<dyn KubernetesClient>>;
}

/// Splits a multi-document YAML bundle into JSON values, dropping empty
/// documents.
///
/// # Errors
///
/// Fails when a document is not valid YAML.
pub fn parse_documents(manifest: &str) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(manifest) {
        let value = Value::deserialize(document)
            .map_err(|e| Error::non_retriable(format!("invalid manifest document: {e}")))?;
        if value.is_null() {
            continue;
        }
        documents.push(value);
    }
    Ok(documents)
}

/// Extracts `(gvk, name, namespace)` from one manifest document.
fn document_target(document: &Value) -> Result<(GroupVersionKind, String, Option<String>)> {
    let api_version = document
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::non_retriable("manifest document missing apiVersion"))?;
    let kind = document
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::non_retriable("manifest document missing kind"))?;
    let metadata = document.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::non_retriable("manifest document missing metadata.name"))?;
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let (group, version) = match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    };

    Ok((
        GroupVersionKind {
            group,
            version,
            kind: kind.to_string(),
        },
        name.to_string(),
        namespace,
    ))
}

/// Lists the resources defined in a manifest bundle without touching the
/// cluster.
fn resources_in(manifest: &str) -> Result<Vec<ResourceRef>> {
    parse_documents(manifest)?
        .iter()
        .map(|document| {
            let (gvk, name, namespace) = document_target(document)?;
            Ok(ResourceRef {
                kind: gvk.kind,
                namespace,
                name,
            })
        })
        .collect()
}

/// kube-backed [`KubernetesClient`].
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    /// Builds a client from an in-memory kubeconfig blob.
    ///
    /// # Errors
    ///
    /// Fails when the kubeconfig cannot be parsed or the client cannot be
    /// constructed from it.
    pub async fn from_kubeconfig(kubeconfig: &str) -> Result<Self> {
        let kubeconfig = Kubeconfig::from_yaml(kubeconfig)
            .map_err(|e| Error::non_retriable(format!("invalid kubeconfig: {e}")))?;
        let config =
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::non_retriable(format!("invalid kubeconfig: {e}")))?;
        let client = kube::Client::try_from(config)
            .map_err(|e| Error::non_retriable(format!("failed to build Kubernetes client: {e}")))?;
        Ok(Self { client })
    }

    /// Returns the underlying typed client, e.g. for install actions.
    #[must_use]
    pub fn clientset(&self) -> kube::Client {
        self.client.clone()
    }

    async fn find_api_resource(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(kube::core::ApiResource, bool)> {
        let discovery = Discovery::new(self.client.clone())
            .run()
            .await
            .map_err(|e| Error::retriable(format!("API discovery failed: {e}")))?;
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                    let namespaced = matches!(caps.scope, Scope::Namespaced);
                    return Ok((ar.clone(), namespaced));
                }
            }
        }
        Err(Error::non_retriable(format!(
            "resource kind not served by cluster: {}/{}/{}",
            gvk.group, gvk.version, gvk.kind
        )))
    }

    async fn apply_document(&self, document: &Value) -> Result<()> {
        let (gvk, name, namespace) = document_target(document)?;
        let (ar, namespaced) = self.find_api_resource(&gvk).await?;

        let api: Api<DynamicObject> = if namespaced {
            let namespace = namespace.as_deref().unwrap_or("default");
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        };

        let params = PatchParams::apply(FIELD_MANAGER).force();
        api.patch(&name, &params, &Patch::Apply(document))
            .await
            .map_err(|e| {
                Error::retriable(format!(
                    "server-side apply of {}/{name} failed: {e}",
                    gvk.kind
                ))
            })?;
        tracing::debug!(kind = %gvk.kind, name = %name, "applied manifest document");
        Ok(())
    }
}

#[async_trait]
impl KubernetesClient for KubeClient {
    async fn deploy(&self, manifest: &str) -> Result<()> {
        for document in parse_documents(manifest)? {
            self.apply_document(&document).await?;
        }
        Ok(())
    }

    async fn deployed_resources(&self, manifest: &str) -> Result<Vec<ResourceRef>> {
        resources_in(manifest)
    }

    fn status_reader(&self) -> Arc<dyn StatusReader> {
        Arc::new(crate::progress::KubeStatusReader::new(self.client.clone()))
    }
}

/// [`KubernetesClientFactory`] with a per-kubeconfig client cache.
///
/// The cache is read-mostly and safe under concurrent lookup; a racing miss
/// may build the client twice, the second build wins nothing but is
/// harmless.
#[derive(Default)]
pub struct CachingClientFactory {
    clients: RwLock<HashMap<u64, Arc<KubeClient>>>,
}

impl CachingClientFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cache_key(kubeconfig: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        kubeconfig.hash(&mut hasher);
        hasher.finish()
    }
}

#[async_trait]
impl KubernetesClientFactory for CachingClientFactory {
    async fn client_for(&self, kubeconfig: &str) -> Result<Arc<dyn KubernetesClient>> {
        let key = Self::cache_key(kubeconfig);
        {
            let clients = self
                .clients
                .read()
                .map_err(|_| Error::non_retriable("client cache lock poisoned"))?;
            if let Some(client) = clients.get(&key) {
                return Ok(client.clone() as Arc<dyn KubernetesClient>);
            }
        }

        let client = Arc::new(KubeClient::from_kubeconfig(kubeconfig).await?);
        let mut clients = self
            .clients
            .write()
            .map_err(|_| Error::non_retriable("client cache lock poisoned"))?;
        let client = clients.entry(key).or_insert(client).clone();
        Ok(client as Arc<dyn KubernetesClient>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUNDLE: &str = r"---
# Manifest of HelmChart 'istio'
apiVersion: apps/v1
kind: Deployment
metadata:
  name: istiod
  namespace: istio-system
---
# Manifest of HelmChart 'istio'
apiVersion: v1
kind: Service
metadata:
  name: istiod
  namespace: istio-system
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: istiod-role
";

    #[test]
    fn parse_documents_splits_bundles() -> Result<()> {
        let documents = parse_documents(BUNDLE)?;
        assert_eq!(documents.len(), 3);
        assert_eq!(documents[0]["kind"], "Deployment");
        assert_eq!(documents[2]["kind"], "ClusterRole");
        Ok(())
    }

    #[test]
    fn parse_documents_skips_empty_documents() -> Result<()> {
        let documents = parse_documents("---\n---\nkind: Pod\napiVersion: v1\nmetadata:\n  name: p\n")?;
        assert_eq!(documents.len(), 1);
        Ok(())
    }

    #[test]
    fn parse_documents_rejects_garbage() {
        let err = parse_documents("kind: [unclosed").unwrap_err();
        assert!(!err.is_retriable());
    }

    #[test]
    fn document_target_extracts_gvk_name_namespace() -> Result<()> {
        let documents = parse_documents(BUNDLE)?;

        let (gvk, name, namespace) = document_target(&documents[0])?;
        assert_eq!(gvk.group, "apps");
        assert_eq!(gvk.version, "v1");
        assert_eq!(gvk.kind, "Deployment");
        assert_eq!(name, "istiod");
        assert_eq!(namespace.as_deref(), Some("istio-system"));

        // Core-group resources have no group prefix.
        let (gvk, _, _) = document_target(&documents[1])?;
        assert_eq!(gvk.group, "");
        assert_eq!(gvk.version, "v1");

        // Cluster-scoped resources have no namespace.
        let (_, _, namespace) = document_target(&documents[2])?;
        assert!(namespace.is_none());
        Ok(())
    }

    #[test]
    fn document_target_requires_identity_fields() {
        let document: Value = serde_json::json!({"kind": "Pod"});
        let err = document_target(&document).unwrap_err();
        assert!(err.to_string().contains("apiVersion"));

        let document: Value = serde_json::json!({"apiVersion": "v1", "kind": "Pod"});
        let err = document_target(&document).unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn resources_in_lists_every_document() -> Result<()> {
        let resources = resources_in(BUNDLE)?;
        assert_eq!(
            resources,
            vec![
                ResourceRef {
                    kind: "Deployment".into(),
                    namespace: Some("istio-system".into()),
                    name: "istiod".into(),
                },
                ResourceRef {
                    kind: "Service".into(),
                    namespace: Some("istio-system".into()),
                    name: "istiod".into(),
                },
                ResourceRef {
                    kind: "ClusterRole".into(),
                    namespace: None,
                    name: "istiod-role".into(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn resource_ref_display() {
        let namespaced = ResourceRef {
            kind: "Pod".into(),
            namespace: Some("default".into()),
            name: "web".into(),
        };
        assert_eq!(namespaced.to_string(), "Pod/default/web");

        let cluster_scoped = ResourceRef {
            kind: "ClusterRole".into(),
            namespace: None,
            name: "admin".into(),
        };
        assert_eq!(cluster_scoped.to_string(), "ClusterRole/admin");
    }

    #[test]
    fn cache_key_is_stable_per_kubeconfig() {
        let a = CachingClientFactory::cache_key("kubeconfig-a");
        let b = CachingClientFactory::cache_key("kubeconfig-b");
        assert_eq!(a, CachingClientFactory::cache_key("kubeconfig-a"));
        assert_ne!(a, b);
    }
}
