//! Secret rendering: app env secrets and registry pull secrets.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;

use crate::db::models::{RegistryCredential, Release};
use crate::errors::Result;
use crate::manifest::release_labels;
use crate::registry::docker_config_json;
use crate::spec::Spec;

pub fn app_secret_name(app_name: &str) -> String {
    format!("{app_name}-secrets")
}

pub fn registry_secret_name(app_name: &str) -> String {
    format!("{app_name}-registry")
}

/// Opaque secret holding the spec's `secrets` mapping, or `None` when the
/// spec has none. Values are base64-encoded on serialization.
pub fn app_secret(spec: &Spec, release: &Release) -> Option<Secret> {
    if spec.secrets.is_empty() {
        return None;
    }
    let app_name = spec.name();
    let data: BTreeMap<String, ByteString> = spec
        .secrets
        .iter()
        .map(|(key, value)| (key.clone(), ByteString(value.clone().into_bytes())))
        .collect();

    Some(Secret {
        metadata: ObjectMeta {
            name: Some(app_secret_name(&app_name)),
            namespace: Some(spec.namespace()),
            labels: Some(release_labels(&app_name, release)),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    })
}

/// Docker-config pull secret for the attached credentials, rendered into the
/// deploying app's namespace. `None` when nothing is attached.
pub fn registry_secret(
    spec: &Spec,
    release: &Release,
    creds: &[RegistryCredential],
) -> Result<Option<Secret>> {
    if creds.is_empty() {
        return Ok(None);
    }
    let app_name = spec.name();
    let blob = docker_config_json(creds)?;

    let mut data = BTreeMap::new();
    data.insert(
        ".dockerconfigjson".to_string(),
        ByteString(blob.into_bytes()),
    );

    Ok(Some(Secret {
        metadata: ObjectMeta {
            name: Some(registry_secret_name(&app_name)),
            namespace: Some(spec.namespace()),
            labels: Some(release_labels(&app_name, release)),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        data: Some(data),
        ..Default::default()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::tests::release_for;
    use base64::Engine;

    #[test]
    fn no_secrets_means_no_secret_object() {
        let spec = Spec::parse("app:\n  name: a\n  image: i:1\n").unwrap();
        assert!(app_secret(&spec, &release_for(&spec)).is_none());
    }

    #[test]
    fn secret_values_are_base64_in_yaml() {
        let spec =
            Spec::parse("app:\n  name: a\n  image: i:1\nsecrets:\n  API_KEY: hunter2\n").unwrap();
        let secret = app_secret(&spec, &release_for(&spec)).unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("a-secrets"));
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));

        let yaml = crate::manifest::to_document(&secret).unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode("hunter2");
        assert!(yaml.contains(&encoded));
        assert!(!yaml.contains("hunter2"));
    }

    #[test]
    fn registry_secret_is_dockerconfigjson() {
        let spec = Spec::parse("app:\n  name: a\n  image: ghcr.io/x/y:1\n").unwrap();
        let cred = RegistryCredential {
            id: 1,
            registry_url: "ghcr.io".to_string(),
            username: "bot".to_string(),
            secret: base64::engine::general_purpose::STANDARD.encode("pw"),
            is_default: false,
            created_at: chrono::Utc::now(),
        };
        let secret = registry_secret(&spec, &release_for(&spec), std::slice::from_ref(&cred))
            .unwrap()
            .unwrap();
        assert_eq!(secret.metadata.name.as_deref(), Some("a-registry"));
        assert_eq!(
            secret.type_.as_deref(),
            Some("kubernetes.io/dockerconfigjson")
        );
        assert!(secret.data.unwrap().contains_key(".dockerconfigjson"));
    }
}
