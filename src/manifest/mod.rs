//! Rendering of the per-app manifest bundle and shared resources.
//!
//! Objects are built with typed `k8s-openapi` structs and written as YAML
//! documents under `<state>/manifests/`. Every object carries the ownership
//! labels; those labels, not names, are what status and delete queries key
//! on.

pub mod ingress;
pub mod secrets;
pub mod service;
pub mod workload;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use crate::db::models::{RegistryCredential, Release};
use crate::errors::{Error, Result};
use crate::spec::Spec;

pub const LABEL_APP: &str = "app";
pub const LABEL_MANAGED_BY: &str = "managed-by";
pub const MANAGED_BY_VALUE: &str = "shipyard";
pub const LABEL_VERSION: &str = "shipyard.version";
pub const LABEL_IMAGE_TAG: &str = "shipyard.image-tag";
pub const LABEL_IMAGE_HASH: &str = "shipyard.image-hash";
pub const LABEL_DEPLOYED_AT: &str = "shipyard.deployed-at";
pub const LABEL_ROLLBACK_FROM: &str = "shipyard.rollback-from";

/// Labels present on every object we own.
pub fn common_labels(app_name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_APP.to_string(), app_name.to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels
}

/// Common labels plus release traceability.
pub fn release_labels(app_name: &str, release: &Release) -> BTreeMap<String, String> {
    let mut labels = common_labels(app_name);
    labels.insert(LABEL_VERSION.to_string(), release.version.clone());
    labels.insert(
        LABEL_IMAGE_TAG.to_string(),
        sanitize_label_value(&release.image_tag),
    );
    labels.insert(LABEL_IMAGE_HASH.to_string(), release.image_hash.clone());
    labels.insert(
        LABEL_DEPLOYED_AT.to_string(),
        release.deployed_at.timestamp().to_string(),
    );
    if let Some(target) = &release.rollback_to_version {
        labels.insert(LABEL_ROLLBACK_FROM.to_string(), target.clone());
    }
    labels
}

/// Squash a string into a valid label value. Sequences of invalid characters
/// collapse to `--` so distinct inputs stay distinct.
pub fn sanitize_label_value(value: &str) -> String {
    let mut result = String::new();
    let mut last_was_invalid = false;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
            result.push(ch);
            last_was_invalid = false;
        } else if !last_was_invalid {
            result.push_str("--");
            last_was_invalid = true;
        }
    }
    result.trim_matches('-').to_string()
}

/// Serialize a typed resource as a YAML document with its `apiVersion` and
/// `kind` present (the typed structs leave them implicit).
pub fn to_document<T>(obj: &T) -> Result<String>
where
    T: Serialize + k8s_openapi::Resource,
{
    let mut value = serde_json::to_value(obj)?;
    if let serde_json::Value::Object(map) = &mut value {
        map.insert(
            "apiVersion".to_string(),
            serde_json::Value::String(T::API_VERSION.to_string()),
        );
        map.insert(
            "kind".to_string(),
            serde_json::Value::String(T::KIND.to_string()),
        );
    }
    let yaml = serde_yaml::to_string(&value).map_err(|e| Error::ManifestRender(e.to_string()))?;
    Ok(yaml)
}

/// Join YAML documents with `---` separators.
pub fn join_documents(docs: &[String]) -> String {
    docs.iter()
        .map(|d| d.trim_end().to_string() + "\n")
        .collect::<Vec<_>>()
        .join("---\n")
}

/// Writes the on-disk bundle for one app plus the shared namespace file.
pub struct ManifestGenerator {
    manifests_dir: PathBuf,
}

impl ManifestGenerator {
    pub fn new(manifests_dir: &Path) -> Self {
        Self {
            manifests_dir: manifests_dir.to_path_buf(),
        }
    }

    pub fn app_dir(&self, app_name: &str) -> PathBuf {
        self.manifests_dir.join("apps").join(app_name)
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.manifests_dir.join("shared")
    }

    /// Render and write the bundle for a release. Returns the files written.
    ///
    /// Omitted artifacts (no secrets, no credential) also remove any stale
    /// file from a prior release so the bundle always mirrors the spec.
    pub fn write_bundle(
        &self,
        spec: &Spec,
        release: &Release,
        creds: &[RegistryCredential],
    ) -> Result<Vec<PathBuf>> {
        let app_name = spec.name();
        let namespace = spec.namespace();
        let app_dir = self.app_dir(&app_name);
        std::fs::create_dir_all(&app_dir)?;
        std::fs::create_dir_all(self.shared_dir())?;

        let mut written = Vec::new();

        let mut workload_docs = vec![to_document(&workload::deployment(spec, release, creds))?];
        if let Some(hpa) = workload::autoscaler(spec, release) {
            workload_docs.push(to_document(&hpa)?);
        }
        let deployment_path = app_dir.join("deployment.yaml");
        std::fs::write(&deployment_path, join_documents(&workload_docs))?;
        written.push(deployment_path);

        let service_path = app_dir.join("service.yaml");
        std::fs::write(
            &service_path,
            to_document(&service::service(spec, release))?,
        )?;
        written.push(service_path);

        let secrets_path = app_dir.join("secrets.yaml");
        match secrets::app_secret(spec, release) {
            Some(secret) => {
                std::fs::write(&secrets_path, to_document(&secret)?)?;
                written.push(secrets_path);
            }
            None => remove_if_present(&secrets_path)?,
        }

        let registry_path = app_dir.join("registry-secret.yaml");
        match secrets::registry_secret(spec, release, creds)? {
            Some(secret) => {
                std::fs::write(&registry_path, to_document(&secret)?)?;
                written.push(registry_path);
            }
            None => remove_if_present(&registry_path)?,
        }

        if namespace != "default" {
            let ns_path = self.shared_dir().join(format!("namespace-{namespace}.yaml"));
            std::fs::write(&ns_path, to_document(&namespace_object(&app_name, &namespace))?)?;
            written.push(ns_path);
        }

        info!(app = %app_name, files = written.len(), "manifest bundle written");
        Ok(written)
    }

    /// Remove an app's bundle directory and, when no other app references
    /// the namespace, its shared namespace file.
    pub fn remove_bundle(&self, app_name: &str, namespace: &str, namespace_shared: bool) -> Result<()> {
        let app_dir = self.app_dir(app_name);
        if app_dir.exists() {
            std::fs::remove_dir_all(&app_dir)?;
            debug!(app = %app_name, "bundle directory removed");
        }
        if namespace != "default" && !namespace_shared {
            remove_if_present(&self.shared_dir().join(format!("namespace-{namespace}.yaml")))?;
        }
        Ok(())
    }
}

fn namespace_object(app_name: &str, namespace: &str) -> k8s_openapi::api::core::v1::Namespace {
    use k8s_openapi::api::core::v1::Namespace;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    Namespace {
        metadata: ObjectMeta {
            name: Some(namespace.to_string()),
            labels: Some(common_labels(app_name)),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ReleaseStatus;
    use chrono::Utc;

    pub(crate) fn release_for(spec: &Spec) -> Release {
        Release {
            id: 1,
            app_id: 1,
            version: "v1700000000".to_string(),
            image: spec.app.image.clone(),
            image_tag: crate::version::image_tag_of(&spec.app.image),
            image_hash: crate::version::short_digest(spec.app.image.as_bytes()),
            config_json: serde_json::to_string(spec).unwrap(),
            config_hash: "abcdefabcdef".to_string(),
            status: ReleaseStatus::Pending,
            rollback_to_version: None,
            deployed_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }

    #[test]
    fn sanitize_label_values() {
        assert_eq!(sanitize_label_value("v1.2.3"), "v1.2.3");
        assert_eq!(sanitize_label_value("mr/26"), "mr--26");
        assert_eq!(sanitize_label_value("-edge-"), "edge");
    }

    #[test]
    fn documents_carry_api_version_and_kind() {
        let spec = Spec::parse("app:\n  name: hello\n  image: nginx:1.25\n  port: 80\n").unwrap();
        let release = release_for(&spec);
        let doc = to_document(&workload::deployment(&spec, &release, &[])).unwrap();
        assert!(doc.contains("apiVersion: apps/v1"));
        assert!(doc.contains("kind: Deployment"));
    }

    #[test]
    fn join_documents_separates_with_dashes() {
        let joined = join_documents(&["a: 1\n".to_string(), "b: 2\n".to_string()]);
        assert_eq!(joined, "a: 1\n---\nb: 2\n");
    }

    #[test]
    fn minimal_bundle_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = Spec::parse("app:\n  name: hello\n  image: nginx:1.25\n  port: 80\n").unwrap();
        let release = release_for(&spec);
        let generator = ManifestGenerator::new(tmp.path());

        let files = generator.write_bundle(&spec, &release, &[]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        // Namespace defaults to the app name, so a shared namespace file is
        // part of the bundle.
        assert_eq!(
            names,
            vec!["deployment.yaml", "service.yaml", "namespace-hello.yaml"]
        );

        let deployment = std::fs::read_to_string(tmp.path().join("apps/hello/deployment.yaml")).unwrap();
        assert!(deployment.contains("replicas: 1"));
        assert!(deployment.contains("containerPort: 80"));
        assert!(deployment.contains("cpu: 100m"));
        assert!(deployment.contains("memory: 128Mi"));
        assert!(!deployment.contains("HorizontalPodAutoscaler"));

        assert!(!tmp.path().join("apps/hello/secrets.yaml").exists());
        assert!(!tmp.path().join("apps/hello/registry-secret.yaml").exists());
    }

    #[test]
    fn scaling_adds_autoscaler_document() {
        let tmp = tempfile::tempdir().unwrap();
        let spec = Spec::parse(
            "app:\n  name: hello\n  image: nginx:1.25\n  port: 80\n\
             scaling:\n  min: 2\n  max: 5\n  target_cpu: 60\n",
        )
        .unwrap();
        let generator = ManifestGenerator::new(tmp.path());
        generator
            .write_bundle(&spec, &release_for(&spec), &[])
            .unwrap();

        let deployment = std::fs::read_to_string(tmp.path().join("apps/hello/deployment.yaml")).unwrap();
        let docs: Vec<&str> = deployment.split("---\n").collect();
        assert_eq!(docs.len(), 2);
        assert!(docs[0].contains("kind: Deployment"));
        assert!(docs[0].contains("replicas: 2"));
        assert!(docs[1].contains("kind: HorizontalPodAutoscaler"));
        assert!(docs[1].contains("minReplicas: 2"));
        assert!(docs[1].contains("maxReplicas: 5"));
        assert!(docs[1].contains("averageUtilization: 60"));
    }

    #[test]
    fn stale_optional_files_are_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let with_secrets = Spec::parse(
            "app:\n  name: hello\n  image: nginx:1.25\nsecrets:\n  API_KEY: shh\n",
        )
        .unwrap();
        let generator = ManifestGenerator::new(tmp.path());
        generator
            .write_bundle(&with_secrets, &release_for(&with_secrets), &[])
            .unwrap();
        assert!(tmp.path().join("apps/hello/secrets.yaml").exists());

        let without = Spec::parse("app:\n  name: hello\n  image: nginx:1.25\n").unwrap();
        generator
            .write_bundle(&without, &release_for(&without), &[])
            .unwrap();
        assert!(!tmp.path().join("apps/hello/secrets.yaml").exists());
    }
}
