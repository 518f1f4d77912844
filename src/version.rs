//! Release identity and deployment history.

use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tracing::debug;

use crate::db::models::{App, Release, ReleaseStatus};
use crate::db::{deployments, domains};
use crate::errors::{Error, Result};
use crate::spec::Spec;

/// Hex length of the truncated identity digests.
const DIGEST_LEN: usize = 12;

/// Assigns release identities and persists the deployment lifecycle for one
/// app. Enforces the at-most-one-pending invariant at `save`.
pub struct VersionManager<'a> {
    pool: &'a SqlitePool,
    app: &'a App,
}

impl<'a> VersionManager<'a> {
    pub fn new(pool: &'a SqlitePool, app: &'a App) -> Self {
        Self { pool, app }
    }

    /// Build a pending release for this spec. Nothing is persisted until
    /// `save`.
    pub fn generate(&self, spec: &Spec, rollback_to: Option<&str>) -> Result<Release> {
        let now = Utc::now();
        let config_json = canonical_config(spec)?;
        Ok(Release {
            id: 0,
            app_id: self.app.id,
            version: format!("v{}", now.timestamp()),
            image: spec.app.image.clone(),
            image_tag: image_tag_of(&spec.app.image),
            image_hash: short_digest(spec.app.image.as_bytes()),
            config_hash: short_digest(config_json.as_bytes()),
            config_json,
            status: ReleaseStatus::Pending,
            rollback_to_version: rollback_to.map(str::to_string),
            deployed_at: now,
            completed_at: None,
            error_message: None,
        })
    }

    /// Persist a pending release, refusing to open a second one for the app.
    pub async fn save(&self, release: &Release) -> Result<Release> {
        if deployments::count_pending(self.pool, self.app.id).await? > 0 {
            return Err(Error::DeploymentPending(self.app.name.clone()));
        }
        let row = deployments::insert(self.pool, release).await?;
        debug!(app = %self.app.name, version = %row.version, "opened pending release");
        Ok(row)
    }

    /// Close a pending release as success or failed.
    pub async fn update_status(
        &self,
        version: &str,
        status: ReleaseStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        deployments::update_status(self.pool, self.app.id, version, status, error_message).await
    }

    /// Most recent successful release.
    pub async fn latest_success(&self) -> Result<Release> {
        deployments::latest_success(self.pool, self.app.id)
            .await?
            .ok_or_else(|| Error::LatestNotFound(self.app.name.clone()))
    }

    /// Resolve a version label or image tag to a release, most recent
    /// candidate first.
    pub async fn lookup(&self, identifier: &str) -> Result<Release> {
        deployments::find_by_identifier(self.pool, self.app.id, identifier)
            .await?
            .ok_or_else(|| Error::NotFound(identifier.to_string()))
    }

    /// Release history, newest first.
    pub async fn list(&self, limit: i64) -> Result<Vec<Release>> {
        deployments::list(self.pool, self.app.id, limit).await
    }

    /// Cascade-delete every per-app row in one transaction.
    pub async fn delete_app(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        domains::delete_for_app(&mut *tx, &self.app.name).await?;
        deployments::delete_for_app(&mut *tx, self.app.id).await?;
        tx.commit().await?;
        Ok(())
    }
}

/// Canonical JSON snapshot of a spec. Maps inside the spec are ordered, so
/// the serialization is invariant over key order and whitespace in the
/// source YAML.
pub fn canonical_config(spec: &Spec) -> Result<String> {
    Ok(serde_json::to_string(spec)?)
}

/// First 12 hex chars of the SHA-256 digest.
pub fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..DIGEST_LEN].to_string()
}

/// Tag suffix of an image reference. A colon inside the registry host
/// (`localhost:5000/app`) is not a tag separator.
pub fn image_tag_of(image: &str) -> String {
    match image.rsplit_once(':') {
        Some((_, tag)) if !tag.contains('/') => tag.to_string(),
        _ => "latest".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::apps;

    fn sample_spec(yaml: &str) -> Spec {
        Spec::parse(yaml).unwrap()
    }

    #[test]
    fn image_tag_suffix_split() {
        assert_eq!(image_tag_of("nginx:1.25"), "1.25");
        assert_eq!(image_tag_of("nginx"), "latest");
        assert_eq!(image_tag_of("localhost:5000/app"), "latest");
        assert_eq!(image_tag_of("localhost:5000/app:v2"), "v2");
        assert_eq!(image_tag_of("ghcr.io/org/app:sha-abc123"), "sha-abc123");
    }

    #[test]
    fn short_digest_is_stable_and_truncated() {
        let a = short_digest(b"nginx:1.25");
        let b = short_digest(b"nginx:1.25");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, short_digest(b"nginx:1.26"));
    }

    #[test]
    fn config_hash_ignores_yaml_key_order_and_whitespace() {
        let a = sample_spec(
            "app:\n  name: web\n  image: img:1\nenv:\n  B: two\n  A: one\n",
        );
        let b = sample_spec(
            "env:\n  A: one\n  B: two\n\napp:\n  image: img:1\n  name: web\n",
        );
        let ha = short_digest(canonical_config(&a).unwrap().as_bytes());
        let hb = short_digest(canonical_config(&b).unwrap().as_bytes());
        assert_eq!(ha, hb);
    }

    #[tokio::test]
    async fn at_most_one_pending_per_app() {
        let pool = db::connect_in_memory().await.unwrap();
        let app = apps::find_or_create(&pool, "web").await.unwrap();
        let vm = VersionManager::new(&pool, &app);
        let spec = sample_spec("app:\n  name: web\n  image: img:1\n");

        let first = vm.generate(&spec, None).unwrap();
        let first = vm.save(&first).await.unwrap();
        assert_eq!(first.status, ReleaseStatus::Pending);

        let second = vm.generate(&spec, None).unwrap();
        let err = vm.save(&second).await.unwrap_err();
        assert!(matches!(err, Error::DeploymentPending(_)));

        vm.update_status(&first.version, ReleaseStatus::Success, None)
            .await
            .unwrap();
        let third = vm.generate(&spec, None).unwrap();
        vm.save(&third).await.unwrap();
    }

    #[tokio::test]
    async fn terminal_rows_are_immutable() {
        let pool = db::connect_in_memory().await.unwrap();
        let app = apps::find_or_create(&pool, "web").await.unwrap();
        let vm = VersionManager::new(&pool, &app);
        let spec = sample_spec("app:\n  name: web\n  image: img:1\n");

        let release = vm.save(&vm.generate(&spec, None).unwrap()).await.unwrap();
        vm.update_status(&release.version, ReleaseStatus::Failed, Some("boom"))
            .await
            .unwrap();
        // A second flip must not touch the terminal row.
        vm.update_status(&release.version, ReleaseStatus::Success, None)
            .await
            .unwrap();

        let row = vm.lookup(&release.version).await.unwrap();
        assert_eq!(row.status, ReleaseStatus::Failed);
        assert_eq!(row.error_message.as_deref(), Some("boom"));
        assert!(row.completed_at.is_some());
    }

    #[tokio::test]
    async fn lookup_matches_version_and_tag() {
        let pool = db::connect_in_memory().await.unwrap();
        let app = apps::find_or_create(&pool, "web").await.unwrap();
        let vm = VersionManager::new(&pool, &app);
        let spec = sample_spec("app:\n  name: web\n  image: img:2.0\n");

        let release = vm.save(&vm.generate(&spec, None).unwrap()).await.unwrap();
        vm.update_status(&release.version, ReleaseStatus::Success, None)
            .await
            .unwrap();

        assert_eq!(vm.lookup(&release.version).await.unwrap().id, release.id);
        assert_eq!(vm.lookup("2.0").await.unwrap().id, release.id);
        assert!(matches!(
            vm.lookup("nope").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn latest_success_skips_failures() {
        let pool = db::connect_in_memory().await.unwrap();
        let app = apps::find_or_create(&pool, "web").await.unwrap();
        let vm = VersionManager::new(&pool, &app);

        let ok = sample_spec("app:\n  name: web\n  image: img:1\n");
        let bad = sample_spec("app:\n  name: web\n  image: img:2\n");

        let mut first = vm.generate(&ok, None).unwrap();
        first.version = "v100".to_string();
        first.deployed_at = chrono::DateTime::from_timestamp(100, 0).unwrap();
        let first = vm.save(&first).await.unwrap();
        vm.update_status(&first.version, ReleaseStatus::Success, None)
            .await
            .unwrap();

        let mut second = vm.generate(&bad, None).unwrap();
        second.version = "v200".to_string();
        second.deployed_at = chrono::DateTime::from_timestamp(200, 0).unwrap();
        let second = vm.save(&second).await.unwrap();
        vm.update_status(&second.version, ReleaseStatus::Failed, Some("rollout timed out"))
            .await
            .unwrap();

        let latest = vm.latest_success().await.unwrap();
        assert_eq!(latest.version, "v100");
        assert_eq!(latest.image, "img:1");
    }

    #[tokio::test]
    async fn rollback_rows_carry_lineage() {
        let pool = db::connect_in_memory().await.unwrap();
        let app = apps::find_or_create(&pool, "web").await.unwrap();
        let vm = VersionManager::new(&pool, &app);

        // v1 succeeded with img:1, v2 failed with img:2.
        let mut v1 = vm
            .generate(&sample_spec("app:\n  name: web\n  image: img:1\n"), None)
            .unwrap();
        v1.version = "v100".to_string();
        v1.deployed_at = chrono::DateTime::from_timestamp(100, 0).unwrap();
        let v1 = vm.save(&v1).await.unwrap();
        vm.update_status(&v1.version, ReleaseStatus::Success, None)
            .await
            .unwrap();

        let mut v2 = vm
            .generate(&sample_spec("app:\n  name: web\n  image: img:2\n"), None)
            .unwrap();
        v2.version = "v200".to_string();
        v2.deployed_at = chrono::DateTime::from_timestamp(200, 0).unwrap();
        let v2 = vm.save(&v2).await.unwrap();
        vm.update_status(&v2.version, ReleaseStatus::Failed, Some("rollout timed out"))
            .await
            .unwrap();

        // Rolling back with no identifier targets the latest success.
        let target = vm.latest_success().await.unwrap();
        assert_eq!(target.version, "v100");

        let mut spec: Spec = serde_json::from_str(&target.config_json).unwrap();
        spec.app.image = target.image.clone();
        let v3 = vm.generate(&spec, Some(&target.version)).unwrap();
        let v3 = vm.save(&v3).await.unwrap();
        vm.update_status(&v3.version, ReleaseStatus::Success, None)
            .await
            .unwrap();

        let v3 = vm.lookup(&v3.version).await.unwrap();
        assert_eq!(v3.image, "img:1");
        assert_eq!(v3.status, ReleaseStatus::Success);
        assert_eq!(v3.rollback_to_version.as_deref(), Some("v100"));
        assert!(v3.deployed_at > target.deployed_at);
    }

    #[tokio::test]
    async fn cicd_placeholder_never_matches_by_tag() {
        let pool = db::connect_in_memory().await.unwrap();
        let app = apps::find_or_create(&pool, "web").await.unwrap();
        let vm = VersionManager::new(&pool, &app);

        let mut release = vm
            .generate(&sample_spec("app:\n  name: web\n  image: img:1\n"), None)
            .unwrap();
        release.image_tag = crate::db::deployments::CICD_TAG_PLACEHOLDER.to_string();
        let release = vm.save(&release).await.unwrap();
        vm.update_status(&release.version, ReleaseStatus::Success, None)
            .await
            .unwrap();

        // Tag-based lookup skips the placeholder row; version lookup still works.
        assert!(matches!(
            vm.lookup(crate::db::deployments::CICD_TAG_PLACEHOLDER)
                .await
                .unwrap_err(),
            Error::NotFound(_)
        ));
        assert_eq!(vm.lookup(&release.version).await.unwrap().id, release.id);
    }

    #[tokio::test]
    async fn delete_app_cascades() {
        let pool = db::connect_in_memory().await.unwrap();
        let app = apps::find_or_create(&pool, "web").await.unwrap();
        let vm = VersionManager::new(&pool, &app);
        let spec = sample_spec("app:\n  name: web\n  image: img:1\n");
        vm.save(&vm.generate(&spec, None).unwrap()).await.unwrap();
        crate::db::domains::insert(&pool, "web", "web.example.com", "example.com", "/", true)
            .await
            .unwrap();

        vm.delete_app().await.unwrap();

        assert!(apps::find_by_name(&pool, "web").await.unwrap().is_none());
        assert!(vm.list(10).await.unwrap().is_empty());
        assert!(
            crate::db::domains::find_by_hostname(&pool, "web.example.com")
                .await
                .unwrap()
                .is_none()
        );
    }
}
