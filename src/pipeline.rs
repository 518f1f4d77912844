//! The deployment pipeline: Spec → Version → Manifests → Ingress → Apply →
//! Readiness → Status, plus its rollback and delete inversions.
//!
//! The sequence within one run is strict, and one run owns the generated
//! files and the store connection for its duration. Failures before a
//! release row opens leave the store untouched; failures after mark the row
//! failed and keep the generated files for post-mortem.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::cluster::wait::DEFAULT_TIMEOUT;
use crate::cluster::{ApplyEngine, ReadinessWaiter, SupportedKind};
use crate::db::models::{App, Release, ReleaseStatus};
use crate::db::{apps, deployments};
use crate::domain::DomainRegistry;
use crate::environment::Environment;
use crate::errors::{Error, Result};
use crate::manifest::ingress::{BaseChange, IngressConsolidator, INGRESS_NAMESPACE};
use crate::manifest::ManifestGenerator;
use crate::registry::{CredentialSelection, CredentialStore};
use crate::spec::Spec;
use crate::version::VersionManager;

/// What to do when normalization rewrote any identifier. The CLI asks the
/// user; the core only enforces the answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameChangePolicy {
    Accept,
    Reject,
}

#[derive(Debug, Clone)]
pub struct DeployOptions {
    pub name_policy: NameChangePolicy,
    pub credentials: CredentialSelection,
    pub timeout: Duration,
    /// Render the bundle without opening a release row or touching the
    /// cluster.
    pub generate_only: bool,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            name_policy: NameChangePolicy::Reject,
            credentials: CredentialSelection::Automatic,
            timeout: DEFAULT_TIMEOUT,
            generate_only: false,
        }
    }
}

/// Deploy a spec. Returns the closed release row.
pub async fn deploy(env: &Environment, spec: Spec, opts: &DeployOptions) -> Result<Release> {
    deploy_with_lineage(env, spec, opts, None).await
}

/// Roll back to an earlier release: the identifier matches a version label
/// or image tag, and no identifier selects the latest success. A new row is
/// written; the target row is never revived.
pub async fn rollback(
    env: &Environment,
    app_name: &str,
    identifier: Option<&str>,
    opts: &DeployOptions,
) -> Result<Release> {
    let app = require_app(env, app_name).await?;
    let vm = VersionManager::new(&env.pool, &app);
    let target = match identifier {
        Some(id) => vm.lookup(id).await?,
        None => vm.latest_success().await?,
    };
    info!(
        app = %app_name,
        target = %target.version,
        image = %target.image,
        "rolling back"
    );

    let mut spec: Spec = serde_json::from_str(&target.config_json)?;
    spec.app.image = target.image.clone();

    deploy_with_lineage(env, spec, opts, Some(target.version)).await
}

async fn deploy_with_lineage(
    env: &Environment,
    raw_spec: Spec,
    opts: &DeployOptions,
    rollback_to: Option<String>,
) -> Result<Release> {
    // Everything up to `save` must leave the store untouched on failure.
    let changes = raw_spec.name_changes();
    if !changes.is_empty() && opts.name_policy == NameChangePolicy::Reject {
        return Err(Error::NameNormalizationRejected);
    }
    let spec = raw_spec.normalized();
    spec.validate()?;

    let app_name = spec.name();
    let domain_registry = DomainRegistry::new(&env.pool);
    domain_registry
        .check_available(&app_name, &spec.domains)
        .await?;

    let credential_store = CredentialStore::new(&env.pool);
    let creds = credential_store
        .resolve(&opts.credentials, &spec.app.image)
        .await?;

    let app = apps::find_or_create(&env.pool, &app_name).await?;
    let vm = VersionManager::new(&env.pool, &app);
    let release = vm.generate(&spec, rollback_to.as_deref())?;

    if opts.generate_only {
        let generator = ManifestGenerator::new(&env.manifests_dir());
        generator.write_bundle(&spec, &release, &creds)?;
        info!(app = %app_name, "bundle generated, cluster untouched");
        return Ok(release);
    }

    let release = vm.save(&release).await?;
    info!(app = %app_name, version = %release.version, "deploying");

    match run_rollout(env, &spec, &release, &creds, opts).await {
        Ok(()) => {
            vm.update_status(&release.version, ReleaseStatus::Success, None)
                .await?;
            info!(app = %app_name, version = %release.version, "deployed");
            vm.lookup(&release.version).await
        }
        Err(e) => {
            error!(app = %app_name, version = %release.version, error = %e, "deploy failed");
            vm.update_status(&release.version, ReleaseStatus::Failed, Some(&e.to_string()))
                .await?;
            Err(e)
        }
    }
}

/// The fallible middle of the pipeline; any error here fails the open row.
async fn run_rollout(
    env: &Environment,
    spec: &Spec,
    release: &Release,
    creds: &[crate::db::models::RegistryCredential],
    opts: &DeployOptions,
) -> Result<()> {
    let app_name = spec.name();
    let namespace = spec.namespace();

    let generator = ManifestGenerator::new(&env.manifests_dir());
    generator.write_bundle(spec, release, creds)?;

    let domain_registry = DomainRegistry::new(&env.pool);
    let outcome = domain_registry
        .sync_from_spec(&app_name, &spec.domains)
        .await?;

    // Rewrite every base this app currently touches, plus any base it just
    // left: backend ports or namespaces may have changed even when the
    // domain set did not.
    let mut bases: BTreeSet<String> = outcome.affected_bases;
    for domain in domain_registry.for_app(&app_name).await? {
        bases.insert(domain.base_domain);
    }

    let consolidator = IngressConsolidator::new(&env.pool, &env.shared_dir());
    let mut retired_bases = Vec::new();
    for base in &bases {
        if let BaseChange::Removed(_) = consolidator.rewrite_base(base).await? {
            retired_bases.push(base.clone());
        }
    }

    let client = env.kube_client().await?;
    let engine = ApplyEngine::new(client.clone());

    // Shared resources first: namespaces must exist before anything
    // namespaced lands in them.
    engine.apply_dir(&env.shared_dir(), &namespace).await?;
    engine.apply_dir(&env.app_dir(&app_name), &namespace).await?;

    for base in retired_bases {
        engine
            .delete_object(SupportedKind::Ingress, &base, INGRESS_NAMESPACE)
            .await?;
    }

    let waiter = ReadinessWaiter::new(client, &namespace, &app_name);
    waiter.wait(opts.timeout).await
}

/// Delete an app: cluster resources in reverse order plus a label-scoped
/// sweep, ingress rewrites for the bases it owned, the on-disk bundle, and
/// the store rows in one transaction.
pub async fn delete_app(env: &Environment, app_name: &str) -> Result<()> {
    let app = require_app(env, app_name).await?;
    let namespace = stored_namespace(env, &app).await;

    let client = env.kube_client().await?;
    let engine = ApplyEngine::new(client);

    engine
        .delete_dir(&env.app_dir(&app.name), &namespace)
        .await?;
    engine
        .delete_labeled(&app.name, &[namespace.as_str(), INGRESS_NAMESPACE])
        .await?;

    let domain_registry = DomainRegistry::new(&env.pool);
    let bases: BTreeSet<String> = domain_registry
        .for_app(&app.name)
        .await?
        .into_iter()
        .map(|d| d.base_domain)
        .collect();

    let vm = VersionManager::new(&env.pool, &app);
    vm.delete_app().await?;

    let consolidator = IngressConsolidator::new(&env.pool, &env.shared_dir());
    for base in &bases {
        match consolidator.rewrite_base(base).await? {
            BaseChange::Removed(_) => {
                engine
                    .delete_object(SupportedKind::Ingress, base, INGRESS_NAMESPACE)
                    .await?;
            }
            BaseChange::Written(path) => {
                engine.apply_file(&path, INGRESS_NAMESPACE).await?;
            }
        }
    }

    let generator = ManifestGenerator::new(&env.manifests_dir());
    // A namespace that isn't named after the app may be shared; leave its
    // file (and the cluster object) alone.
    generator.remove_bundle(&app.name, &namespace, namespace != app.name)?;

    info!(app = %app.name, "app deleted");
    Ok(())
}

async fn require_app(env: &Environment, app_name: &str) -> Result<App> {
    apps::find_by_name(&env.pool, app_name)
        .await?
        .ok_or_else(|| Error::NotFound(app_name.to_string()))
}

/// Namespace the app last deployed into, from its most recent snapshot.
async fn stored_namespace(env: &Environment, app: &App) -> String {
    match deployments::latest(&env.pool, app.id).await {
        Ok(Some(release)) => serde_json::from_str::<Spec>(&release.config_json)
            .map(|s| s.namespace())
            .unwrap_or_else(|_| app.name.clone()),
        Ok(None) => app.name.clone(),
        Err(e) => {
            warn!(app = %app.name, error = %e, "cannot read last snapshot, assuming default namespace");
            app.name.clone()
        }
    }
}
