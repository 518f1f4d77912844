//! Multi-tenant ingress consolidation.
//!
//! Every base domain with at least one stored hostname gets one ingress file
//! under `shared/`, spanning all owning apps. Cross-namespace fan-in works
//! through an `ExternalName` proxy Service per referenced app, emitted in the
//! ingress's own namespace.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::models::Domain;
use crate::db::{apps, deployments, domains};
use crate::errors::Result;
use crate::manifest::{common_labels, join_documents, to_document};
use crate::spec::Spec;

/// Namespace the consolidated ingresses and their proxy Services live in.
pub const INGRESS_NAMESPACE: &str = "default";

/// cert-manager issuer referenced when any hostname under a base wants SSL.
pub const CLUSTER_ISSUER: &str = "letsencrypt-prod";

/// Backend target for one app referenced by an ingress rule.
#[derive(Debug, Clone)]
pub struct AppEndpoint {
    pub namespace: String,
    pub port: u16,
}

pub fn proxy_service_name(app_name: &str) -> String {
    format!("{app_name}-proxy")
}

/// What a base-domain rewrite did to its shared file.
#[derive(Debug)]
pub enum BaseChange {
    Written(PathBuf),
    /// The base has no hostnames left; the file (if any) was deleted and the
    /// in-cluster ingress must go too.
    Removed(PathBuf),
}

/// Render the full document set for one base domain: the ingress plus one
/// proxy Service per referenced app. `domains` must all share the base.
pub fn render_base(
    base: &str,
    domain_rows: &[Domain],
    endpoints: &BTreeMap<String, AppEndpoint>,
) -> Result<String> {
    let mut rules = Vec::with_capacity(domain_rows.len());
    for domain in domain_rows {
        let endpoint = &endpoints[&domain.app_name];
        rules.push(IngressRule {
            host: Some(domain.hostname.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some(domain.path.clone()),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: proxy_service_name(&domain.app_name),
                            port: Some(ServiceBackendPort {
                                number: Some(endpoint.port as i32),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
        });
    }

    // TLS covers every hostname under the base iff any of them asks for it.
    let tls = domain_rows.iter().any(|d| d.ssl_enabled).then(|| {
        vec![IngressTLS {
            hosts: Some(domain_rows.iter().map(|d| d.hostname.clone()).collect()),
            secret_name: Some(format!("{base}-tls")),
        }]
    });

    let mut annotations = BTreeMap::new();
    annotations.insert(
        "traefik.ingress.kubernetes.io/router.entrypoints".to_string(),
        "web,websecure".to_string(),
    );
    annotations.insert(
        "traefik.ingress.kubernetes.io/router.tls".to_string(),
        "true".to_string(),
    );
    annotations.insert(
        "nginx.ingress.kubernetes.io/ssl-redirect".to_string(),
        "true".to_string(),
    );
    annotations.insert(
        "cert-manager.io/cluster-issuer".to_string(),
        CLUSTER_ISSUER.to_string(),
    );

    let mut labels = BTreeMap::new();
    labels.insert(
        crate::manifest::LABEL_MANAGED_BY.to_string(),
        crate::manifest::MANAGED_BY_VALUE.to_string(),
    );

    let ingress = Ingress {
        metadata: ObjectMeta {
            name: Some(base.to_string()),
            namespace: Some(INGRESS_NAMESPACE.to_string()),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            tls,
            rules: Some(rules),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut docs = vec![to_document(&ingress)?];
    for (app_name, endpoint) in endpoints {
        docs.push(to_document(&proxy_service(app_name, endpoint))?);
    }
    Ok(join_documents(&docs))
}

/// ExternalName Service routing the ingress namespace to an app's own
/// Service in its namespace.
fn proxy_service(app_name: &str, endpoint: &AppEndpoint) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(proxy_service_name(app_name)),
            namespace: Some(INGRESS_NAMESPACE.to_string()),
            labels: Some(common_labels(app_name)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ExternalName".to_string()),
            external_name: Some(format!(
                "{app_name}.{}.svc.cluster.local",
                endpoint.namespace
            )),
            ports: Some(vec![ServicePort {
                port: endpoint.port as i32,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Rewrites shared ingress files from the domain store.
pub struct IngressConsolidator<'a> {
    pool: &'a SqlitePool,
    shared_dir: PathBuf,
}

impl<'a> IngressConsolidator<'a> {
    pub fn new(pool: &'a SqlitePool, shared_dir: &Path) -> Self {
        Self {
            pool,
            shared_dir: shared_dir.to_path_buf(),
        }
    }

    pub fn file_for(&self, base: &str) -> PathBuf {
        self.shared_dir.join(format!("{base}.yaml"))
    }

    /// Rewrite (or delete) the shared file for one base domain from the
    /// current store contents.
    pub async fn rewrite_base(&self, base: &str) -> Result<BaseChange> {
        let path = self.file_for(base);
        let domain_rows = domains::list_by_base(self.pool, base).await?;

        if domain_rows.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            info!(%base, "last hostname removed, ingress retired");
            return Ok(BaseChange::Removed(path));
        }

        let endpoints = self.endpoints_for(&domain_rows).await?;
        std::fs::create_dir_all(&self.shared_dir)?;
        std::fs::write(&path, render_base(base, &domain_rows, &endpoints)?)?;
        debug!(%base, hosts = domain_rows.len(), "ingress rewritten");
        Ok(BaseChange::Written(path))
    }

    /// Backend endpoints for every app referenced under a base. Port and
    /// namespace come from the app's most recent deployment snapshot; apps
    /// that never deployed fall back to defaults.
    async fn endpoints_for(
        &self,
        domain_rows: &[Domain],
    ) -> Result<BTreeMap<String, AppEndpoint>> {
        let mut endpoints = BTreeMap::new();
        for domain in domain_rows {
            if endpoints.contains_key(&domain.app_name) {
                continue;
            }
            let endpoint = match apps::find_by_name(self.pool, &domain.app_name).await? {
                Some(app) => match deployments::latest(self.pool, app.id).await? {
                    Some(release) => {
                        let spec: Spec = serde_json::from_str(&release.config_json)?;
                        AppEndpoint {
                            namespace: spec.namespace(),
                            port: spec.app.port,
                        }
                    }
                    None => default_endpoint(&domain.app_name),
                },
                None => default_endpoint(&domain.app_name),
            };
            endpoints.insert(domain.app_name.clone(), endpoint);
        }
        Ok(endpoints)
    }
}

fn default_endpoint(app_name: &str) -> AppEndpoint {
    AppEndpoint {
        namespace: app_name.to_string(),
        port: crate::spec::DEFAULT_PORT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn domain(app: &str, hostname: &str, base: &str, ssl: bool) -> Domain {
        Domain {
            id: 0,
            app_name: app.to_string(),
            hostname: hostname.to_string(),
            base_domain: base.to_string(),
            path: "/".to_string(),
            ssl_enabled: ssl,
            created_at: Utc::now(),
        }
    }

    fn endpoints(entries: &[(&str, &str, u16)]) -> BTreeMap<String, AppEndpoint> {
        entries
            .iter()
            .map(|(app, ns, port)| {
                (
                    app.to_string(),
                    AppEndpoint {
                        namespace: ns.to_string(),
                        port: *port,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn consolidates_two_apps_under_one_base() {
        let rows = vec![
            domain("appb", "api.ex.com", "ex.com", true),
            domain("appa", "app.ex.com", "ex.com", false),
        ];
        let eps = endpoints(&[("appa", "appa", 3000), ("appb", "appb", 8080)]);
        let rendered = render_base("ex.com", &rows, &eps).unwrap();

        let docs: Vec<serde_yaml::Value> = rendered
            .split("---\n")
            .map(|d| serde_yaml::from_str(d).unwrap())
            .collect();
        assert_eq!(docs.len(), 3);

        let ingress = &docs[0];
        assert_eq!(ingress["kind"], "Ingress");
        assert_eq!(ingress["metadata"]["name"], "ex.com");
        let rules = ingress["spec"]["rules"].as_sequence().unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0]["host"], "api.ex.com");
        assert_eq!(
            rules[0]["http"]["paths"][0]["backend"]["service"]["name"],
            "appb-proxy"
        );
        assert_eq!(rules[1]["host"], "app.ex.com");

        // TLS present because one hostname requests SSL; lists both hosts.
        let tls = ingress["spec"]["tls"].as_sequence().unwrap();
        assert_eq!(tls[0]["secretName"], "ex.com-tls");
        let hosts = tls[0]["hosts"].as_sequence().unwrap();
        assert_eq!(hosts.len(), 2);

        // One ExternalName proxy per app, sorted by app name.
        assert_eq!(docs[1]["metadata"]["name"], "appa-proxy");
        assert_eq!(
            docs[1]["spec"]["externalName"],
            "appa.appa.svc.cluster.local"
        );
        assert_eq!(docs[2]["metadata"]["name"], "appb-proxy");
        assert_eq!(
            docs[2]["spec"]["externalName"],
            "appb.appb.svc.cluster.local"
        );
    }

    #[test]
    fn tls_omitted_when_no_hostname_wants_ssl() {
        let rows = vec![domain("appa", "app.ex.com", "ex.com", false)];
        let eps = endpoints(&[("appa", "appa", 3000)]);
        let rendered = render_base("ex.com", &rows, &eps).unwrap();
        let ingress: serde_yaml::Value =
            serde_yaml::from_str(rendered.split("---\n").next().unwrap()).unwrap();
        assert!(ingress["spec"]["tls"].is_null());
    }

    #[test]
    fn ingress_enumerates_exactly_the_stored_hostnames() {
        let rows = vec![
            domain("a", "one.ex.com", "ex.com", true),
            domain("a", "two.ex.com", "ex.com", true),
            domain("b", "three.ex.com", "ex.com", true),
        ];
        let eps = endpoints(&[("a", "ns-a", 80), ("b", "ns-b", 81)]);
        let rendered = render_base("ex.com", &rows, &eps).unwrap();
        let ingress: serde_yaml::Value =
            serde_yaml::from_str(rendered.split("---\n").next().unwrap()).unwrap();

        let rule_hosts: Vec<&str> = ingress["spec"]["rules"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|r| r["host"].as_str().unwrap())
            .collect();
        assert_eq!(rule_hosts, vec!["one.ex.com", "two.ex.com", "three.ex.com"]);

        let tls_hosts: Vec<&str> = ingress["spec"]["tls"][0]["hosts"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|h| h.as_str().unwrap())
            .collect();
        assert_eq!(tls_hosts, rule_hosts);
    }

    #[tokio::test]
    async fn rewrite_base_tracks_store_contents() {
        let pool = crate::db::connect_in_memory().await.unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let registry = crate::domain::DomainRegistry::new(&pool);
        let consolidator = IngressConsolidator::new(&pool, tmp.path());

        registry
            .add("appa", "app.ex.com", "/", true)
            .await
            .unwrap();
        match consolidator.rewrite_base("ex.com").await.unwrap() {
            BaseChange::Written(path) => assert!(path.exists()),
            other => panic!("expected Written, got {other:?}"),
        }

        registry.remove("appa", "app.ex.com").await.unwrap();
        match consolidator.rewrite_base("ex.com").await.unwrap() {
            BaseChange::Removed(path) => assert!(!path.exists()),
            other => panic!("expected Removed, got {other:?}"),
        }
    }
}
