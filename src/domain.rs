//! Domain ownership and base-domain grouping.

use std::collections::BTreeSet;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::domains;
use crate::db::models::Domain;
use crate::errors::{Error, Result};

/// Grouping key for ingress consolidation: the rightmost two labels of a
/// hostname, or the hostname itself when it has two or fewer.
pub fn base_domain(hostname: &str) -> String {
    let labels: Vec<&str> = hostname.split('.').collect();
    if labels.len() <= 2 {
        hostname.to_string()
    } else {
        labels[labels.len() - 2..].join(".")
    }
}

/// Outcome of reconciling an app's spec domains with the store.
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Base domains whose ingress must be rewritten (or deleted when the
    /// base emptied).
    pub affected_bases: BTreeSet<String>,
}

pub struct DomainRegistry<'a> {
    pool: &'a SqlitePool,
}

impl<'a> DomainRegistry<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Route a hostname to an app. A hostname maps to exactly one app across
    /// the whole store; re-adding it to its current owner is a no-op.
    pub async fn add(
        &self,
        app_name: &str,
        hostname: &str,
        path: &str,
        ssl_enabled: bool,
    ) -> Result<Domain> {
        if let Some(existing) = domains::find_by_hostname(self.pool, hostname).await? {
            if existing.app_name == app_name {
                return Ok(existing);
            }
            return Err(Error::HostnameTaken {
                hostname: hostname.to_string(),
                owner: existing.app_name,
            });
        }
        let base = base_domain(hostname);
        let domain =
            domains::insert(self.pool, app_name, hostname, &base, path, ssl_enabled).await?;
        info!(app = %app_name, %hostname, base = %base, "domain added");
        Ok(domain)
    }

    /// Remove a hostname owned by an app. Idempotent.
    pub async fn remove(&self, app_name: &str, hostname: &str) -> Result<bool> {
        let removed = domains::delete(self.pool, app_name, hostname).await?;
        if removed {
            info!(app = %app_name, %hostname, "domain removed");
        }
        Ok(removed)
    }

    pub async fn for_app(&self, app_name: &str) -> Result<Vec<Domain>> {
        domains::list_for_app(self.pool, app_name).await
    }

    pub async fn by_base(&self, base: &str) -> Result<Vec<Domain>> {
        domains::list_by_base(self.pool, base).await
    }

    pub async fn bases(&self) -> Result<Vec<String>> {
        domains::list_bases(self.pool).await
    }

    pub async fn list_all(&self) -> Result<Vec<Domain>> {
        domains::list_all(self.pool).await
    }

    /// Check that every hostname in a spec is free or already owned by the
    /// app. Runs before any row is written so collisions leave the store
    /// untouched.
    pub async fn check_available(&self, app_name: &str, hostnames: &[String]) -> Result<()> {
        for hostname in hostnames {
            if let Some(existing) = domains::find_by_hostname(self.pool, hostname).await? {
                if existing.app_name != app_name {
                    return Err(Error::HostnameTaken {
                        hostname: hostname.clone(),
                        owner: existing.app_name,
                    });
                }
            }
        }
        Ok(())
    }

    /// Make the stored set for this app equal to the spec set: add missing,
    /// remove extras. Other apps' domains under the same base are never
    /// touched.
    pub async fn sync_from_spec(
        &self,
        app_name: &str,
        hostnames: &[String],
    ) -> Result<SyncOutcome> {
        self.check_available(app_name, hostnames).await?;

        let wanted: BTreeSet<&str> = hostnames.iter().map(String::as_str).collect();
        let current = self.for_app(app_name).await?;
        let mut outcome = SyncOutcome::default();

        for domain in &current {
            if !wanted.contains(domain.hostname.as_str()) {
                domains::delete(self.pool, app_name, &domain.hostname).await?;
                outcome.affected_bases.insert(domain.base_domain.clone());
                outcome.removed.push(domain.hostname.clone());
            }
        }

        let have: BTreeSet<&str> = current.iter().map(|d| d.hostname.as_str()).collect();
        for hostname in &wanted {
            if !have.contains(hostname) {
                let base = base_domain(hostname);
                domains::insert(self.pool, app_name, hostname, &base, "/", true).await?;
                outcome.affected_bases.insert(base);
                outcome.added.push((*hostname).to_string());
            }
        }

        debug!(
            app = %app_name,
            added = outcome.added.len(),
            removed = outcome.removed.len(),
            "domains reconciled with spec"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn base_domain_is_rightmost_two_labels() {
        assert_eq!(base_domain("a.b.example.com"), "example.com");
        assert_eq!(base_domain("api.example.com"), "example.com");
        assert_eq!(base_domain("example.com"), "example.com");
        assert_eq!(base_domain("localhost"), "localhost");
        assert_eq!(base_domain("x.y.z.deep.co.uk"), "co.uk");
    }

    #[tokio::test]
    async fn hostname_maps_to_exactly_one_app() {
        let pool = db::connect_in_memory().await.unwrap();
        let registry = DomainRegistry::new(&pool);

        registry
            .add("appa", "api.example.com", "/", true)
            .await
            .unwrap();
        let err = registry
            .add("appb", "api.example.com", "/", true)
            .await
            .unwrap_err();
        match err {
            Error::HostnameTaken { hostname, owner } => {
                assert_eq!(hostname, "api.example.com");
                assert_eq!(owner, "appa");
            }
            other => panic!("expected HostnameTaken, got {other}"),
        }

        // Re-adding to the same owner is a no-op.
        registry
            .add("appa", "api.example.com", "/", true)
            .await
            .unwrap();
        assert_eq!(registry.for_app("appa").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let pool = db::connect_in_memory().await.unwrap();
        let registry = DomainRegistry::new(&pool);
        registry
            .add("appa", "api.example.com", "/", true)
            .await
            .unwrap();
        assert!(registry.remove("appa", "api.example.com").await.unwrap());
        assert!(!registry.remove("appa", "api.example.com").await.unwrap());
    }

    #[tokio::test]
    async fn sync_equalizes_without_touching_other_apps() {
        let pool = db::connect_in_memory().await.unwrap();
        let registry = DomainRegistry::new(&pool);
        registry
            .add("appa", "app.ex.com", "/", true)
            .await
            .unwrap();
        registry
            .add("appb", "api.ex.com", "/", true)
            .await
            .unwrap();

        let outcome = registry
            .sync_from_spec(
                "appa",
                &["www.ex.com".to_string(), "app.ex.com".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(outcome.added, vec!["www.ex.com".to_string()]);
        assert!(outcome.removed.is_empty());

        let outcome = registry
            .sync_from_spec("appa", &["www.ex.com".to_string()])
            .await
            .unwrap();
        assert_eq!(outcome.removed, vec!["app.ex.com".to_string()]);
        assert!(outcome.affected_bases.contains("ex.com"));

        // appb untouched throughout.
        let appb = registry.for_app("appb").await.unwrap();
        assert_eq!(appb.len(), 1);
        assert_eq!(appb[0].hostname, "api.ex.com");
    }

    #[tokio::test]
    async fn sync_collision_leaves_store_unchanged() {
        let pool = db::connect_in_memory().await.unwrap();
        let registry = DomainRegistry::new(&pool);
        registry
            .add("appa", "api.example.com", "/", true)
            .await
            .unwrap();
        registry
            .add("appb", "web.example.com", "/", true)
            .await
            .unwrap();

        let err = registry
            .sync_from_spec(
                "appb",
                &["api.example.com".to_string(), "new.example.com".to_string()],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HostnameTaken { .. }));

        // Nothing was added or removed for appb.
        let appb = registry.for_app("appb").await.unwrap();
        assert_eq!(appb.len(), 1);
        assert_eq!(appb[0].hostname, "web.example.com");
    }

    #[tokio::test]
    async fn bases_enumerates_distinct_base_domains() {
        let pool = db::connect_in_memory().await.unwrap();
        let registry = DomainRegistry::new(&pool);
        registry.add("a", "x.ex.com", "/", true).await.unwrap();
        registry.add("b", "y.ex.com", "/", true).await.unwrap();
        registry.add("c", "z.other.io", "/", false).await.unwrap();

        assert_eq!(
            registry.bases().await.unwrap(),
            vec!["ex.com".to_string(), "other.io".to_string()]
        );
    }
}
