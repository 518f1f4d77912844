//! Server-side create-or-update and deletion of generated manifests.
//!
//! Resource kinds are a closed table: everything the generator can emit is
//! listed here, and anything else fails with `UnsupportedKind` instead of
//! silently succeeding.

use std::path::{Path, PathBuf};

use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::manifest::{LABEL_APP, LABEL_MANAGED_BY, MANAGED_BY_VALUE};

/// The closed set of kinds the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedKind {
    Deployment,
    Service,
    Secret,
    ConfigMap,
    Namespace,
    Ingress,
    HorizontalPodAutoscaler,
}

impl SupportedKind {
    pub fn from_kind(kind: &str) -> Result<Self> {
        match kind {
            "Deployment" => Ok(Self::Deployment),
            "Service" => Ok(Self::Service),
            "Secret" => Ok(Self::Secret),
            "ConfigMap" => Ok(Self::ConfigMap),
            "Namespace" => Ok(Self::Namespace),
            "Ingress" => Ok(Self::Ingress),
            "HorizontalPodAutoscaler" => Ok(Self::HorizontalPodAutoscaler),
            other => Err(Error::UnsupportedKind(other.to_string())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Deployment => "Deployment",
            Self::Service => "Service",
            Self::Secret => "Secret",
            Self::ConfigMap => "ConfigMap",
            Self::Namespace => "Namespace",
            Self::Ingress => "Ingress",
            Self::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
        }
    }

    /// Group/version/resource mapping for this kind.
    pub fn api_resource(&self) -> ApiResource {
        let (group, version, plural) = match self {
            Self::Deployment => ("apps", "v1", "deployments"),
            Self::Service => ("", "v1", "services"),
            Self::Secret => ("", "v1", "secrets"),
            Self::ConfigMap => ("", "v1", "configmaps"),
            Self::Namespace => ("", "v1", "namespaces"),
            Self::Ingress => ("networking.k8s.io", "v1", "ingresses"),
            Self::HorizontalPodAutoscaler => ("autoscaling", "v2", "horizontalpodautoscalers"),
        };
        let api_version = if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version,
            kind: self.kind().to_string(),
            plural: plural.to_string(),
        }
    }

    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, Self::Namespace)
    }

    /// The namespaced kinds swept by a label-scoped bulk delete.
    pub fn bulk_delete_set() -> &'static [SupportedKind] {
        &[
            Self::Deployment,
            Self::HorizontalPodAutoscaler,
            Self::Service,
            Self::Secret,
            Self::ConfigMap,
            Self::Ingress,
        ]
    }
}

/// Split a file's contents into YAML documents on `---` separator lines.
pub fn split_documents(content: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line.trim_end() == "---" {
            if !current.trim().is_empty() {
                docs.push(current.clone());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        docs.push(current);
    }
    docs
}

/// Every `*.yaml` file directly under a directory, lexicographically.
fn yaml_files_sorted(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "yaml") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Applies and deletes manifest files against the cluster.
pub struct ApplyEngine {
    client: Client,
}

impl ApplyEngine {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api_for(&self, kind: SupportedKind, namespace: &str) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        if kind.is_cluster_scoped() {
            Api::all_with(self.client.clone(), &ar)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        }
    }

    /// Apply every document in every `*.yaml` file under a directory, files
    /// in lexicographic order, documents in file order.
    pub async fn apply_dir(&self, dir: &Path, default_namespace: &str) -> Result<usize> {
        let mut applied = 0;
        for file in yaml_files_sorted(dir)? {
            applied += self.apply_file(&file, default_namespace).await?;
        }
        Ok(applied)
    }

    /// Apply every document in one manifest file, in order.
    pub async fn apply_file(&self, path: &Path, default_namespace: &str) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let docs = split_documents(&content);
        for doc in &docs {
            self.apply_document(doc, default_namespace).await?;
        }
        Ok(docs.len())
    }

    /// Create-or-update one document: `get`, on not-found `create`,
    /// otherwise carry over the live `resourceVersion` and `replace`.
    pub async fn apply_document(&self, doc: &str, default_namespace: &str) -> Result<()> {
        let value: serde_json::Value =
            serde_yaml::from_str(doc).map_err(|e| Error::ManifestRender(e.to_string()))?;
        let kind_str = value["kind"]
            .as_str()
            .ok_or_else(|| Error::ManifestRender("document has no kind".to_string()))?;
        let kind = SupportedKind::from_kind(kind_str)?;

        let mut obj: DynamicObject = serde_json::from_value(value)?;
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::ManifestRender("document has no metadata.name".to_string()))?;
        let namespace = obj
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace.to_string());
        if !kind.is_cluster_scoped() && obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(namespace.clone());
        }

        let api = self.api_for(kind, &namespace);
        match api.get(&name).await {
            Ok(existing) => {
                obj.metadata.resource_version = existing.metadata.resource_version;
                api.replace(&name, &PostParams::default(), &obj)
                    .await
                    .map_err(|e| rejection(kind, &name, e))?;
                debug!(kind = kind.kind(), %name, %namespace, "resource updated");
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                api.create(&PostParams::default(), &obj)
                    .await
                    .map_err(|e| rejection(kind, &name, e))?;
                info!(kind = kind.kind(), %name, %namespace, "resource created");
            }
            Err(e) => return Err(rejection(kind, &name, e)),
        }
        Ok(())
    }

    /// Delete everything a directory's files describe, files in reverse
    /// lexicographic order and documents in reverse order within each file.
    /// Missing objects are fine.
    pub async fn delete_dir(&self, dir: &Path, default_namespace: &str) -> Result<()> {
        for file in yaml_files_sorted(dir)?.into_iter().rev() {
            let content = std::fs::read_to_string(&file)?;
            for doc in split_documents(&content).into_iter().rev() {
                self.delete_document(&doc, default_namespace).await?;
            }
        }
        Ok(())
    }

    async fn delete_document(&self, doc: &str, default_namespace: &str) -> Result<()> {
        let value: serde_json::Value =
            serde_yaml::from_str(doc).map_err(|e| Error::ManifestRender(e.to_string()))?;
        let kind_str = value["kind"]
            .as_str()
            .ok_or_else(|| Error::ManifestRender("document has no kind".to_string()))?;
        let kind = SupportedKind::from_kind(kind_str)?;
        let obj: DynamicObject = serde_json::from_value(value)?;
        let name = obj
            .metadata
            .name
            .ok_or_else(|| Error::ManifestRender("document has no metadata.name".to_string()))?;
        let namespace = obj
            .metadata
            .namespace
            .unwrap_or_else(|| default_namespace.to_string());

        self.delete_object(kind, &name, &namespace).await
    }

    /// Delete a single object by kind and name, tolerating its absence.
    pub async fn delete_object(
        &self,
        kind: SupportedKind,
        name: &str,
        namespace: &str,
    ) -> Result<()> {
        let api = self.api_for(kind, namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(kind = kind.kind(), %name, %namespace, "resource deleted");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(rejection(kind, name, e)),
        }
    }

    /// Delete every resource of the standard set labeled as owned by an app.
    /// Ownership is decided by labels, never by names.
    pub async fn delete_labeled(&self, app_name: &str, namespaces: &[&str]) -> Result<()> {
        let selector = format!("{LABEL_APP}={app_name},{LABEL_MANAGED_BY}={MANAGED_BY_VALUE}");
        let lp = ListParams::default().labels(&selector);
        for namespace in namespaces {
            for kind in SupportedKind::bulk_delete_set() {
                let api = self.api_for(*kind, namespace);
                if let Err(e) = api
                    .delete_collection(&DeleteParams::default(), &lp)
                    .await
                {
                    warn!(
                        kind = kind.kind(),
                        %namespace,
                        error = %e,
                        "bulk delete failed, continuing"
                    );
                }
            }
        }
        Ok(())
    }
}

fn rejection(kind: SupportedKind, name: &str, err: kube::Error) -> Error {
    let reason = match err {
        kube::Error::Api(ae) => ae.message,
        other => other.to_string(),
    };
    Error::ApplyRejected {
        kind: kind.kind().to_string(),
        name: name.to_string(),
        reason,
    }
}
