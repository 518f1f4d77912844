//! Registry credential store and docker-config secret material.

use base64::Engine;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::credentials;
use crate::db::models::RegistryCredential;
use crate::errors::{Error, Result};

/// Registry host implied by a bare image reference.
pub const DOCKER_HUB_REGISTRY: &str = "https://index.docker.io/v1/";

/// Which credentials to attach to a deployment. The CLI decides; the
/// pipeline only resolves.
#[derive(Debug, Clone, Default)]
pub enum CredentialSelection {
    /// Match the deploying image's registry, falling back to the default
    /// credential.
    #[default]
    Automatic,
    /// An explicit set of registry URLs chosen by the user. Every entry must
    /// resolve or the deploy fails before a release row is opened.
    Explicit(Vec<String>),
    /// Attach nothing.
    None,
}

pub struct CredentialStore<'a> {
    pool: &'a SqlitePool,
}

impl<'a> CredentialStore<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a credential. The password is base64-encoded at rest.
    pub async fn add(
        &self,
        registry_url: &str,
        username: &str,
        password: &str,
        is_default: bool,
    ) -> Result<RegistryCredential> {
        let secret = base64::engine::general_purpose::STANDARD.encode(password);
        credentials::upsert(self.pool, registry_url, username, &secret, is_default).await
    }

    pub async fn remove(&self, registry_url: &str) -> Result<bool> {
        credentials::delete(self.pool, registry_url).await
    }

    pub async fn list(&self) -> Result<Vec<RegistryCredential>> {
        credentials::list(self.pool).await
    }

    pub async fn set_default(&self, registry_url: &str) -> Result<bool> {
        credentials::set_default(self.pool, registry_url).await
    }

    /// Credential for the registry an image reference points at, falling
    /// back to the default credential when the registry has no entry.
    pub async fn for_image(&self, image: &str) -> Result<Option<RegistryCredential>> {
        let host = registry_host(image);
        if let Some(cred) = credentials::find_by_registry(self.pool, &host).await? {
            return Ok(Some(cred));
        }
        let fallback = credentials::find_default(self.pool).await?;
        if fallback.is_some() {
            debug!(%host, "no credential for registry, using default");
        }
        Ok(fallback)
    }

    /// Resolve the CLI's selection into the set of credentials to attach.
    pub async fn resolve(
        &self,
        selection: &CredentialSelection,
        image: &str,
    ) -> Result<Vec<RegistryCredential>> {
        match selection {
            CredentialSelection::None => Ok(Vec::new()),
            CredentialSelection::Automatic => Ok(self.for_image(image).await?.into_iter().collect()),
            CredentialSelection::Explicit(urls) => {
                let mut creds = Vec::with_capacity(urls.len());
                for url in urls {
                    let cred = credentials::find_by_registry(self.pool, url)
                        .await?
                        .ok_or_else(|| Error::CredentialMissing(url.clone()))?;
                    creds.push(cred);
                }
                Ok(creds)
            }
        }
    }
}

/// Registry host of an image reference: the part before the first `/` iff it
/// looks like a host (contains `.` or `:`), else Docker Hub.
pub fn registry_host(image: &str) -> String {
    match image.split_once('/') {
        Some((prefix, _)) if prefix.contains('.') || prefix.contains(':') => prefix.to_string(),
        _ => DOCKER_HUB_REGISTRY.to_string(),
    }
}

/// Render the `.dockerconfigjson` blob for a set of credentials.
pub fn docker_config_json(creds: &[RegistryCredential]) -> Result<String> {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut auths = serde_json::Map::new();
    for cred in creds {
        let password_bytes = engine
            .decode(&cred.secret)
            .map_err(|e| Error::ManifestRender(format!("stored secret is not base64: {e}")))?;
        let password = String::from_utf8(password_bytes)
            .map_err(|e| Error::ManifestRender(format!("stored secret is not utf-8: {e}")))?;
        let auth = engine.encode(format!("{}:{}", cred.username, password));
        auths.insert(
            cred.registry_url.clone(),
            serde_json::json!({
                "username": cred.username,
                "password": password,
                "auth": auth,
            }),
        );
    }
    Ok(serde_json::json!({ "auths": auths }).to_string())
}
