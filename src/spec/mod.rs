//! Loader for `paas.yaml` application specs.
//!
//! Unknown top-level keys are ignored so newer specs stay loadable; unknown
//! keys inside a recognized section are errors.

pub mod normalize;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
pub use normalize::{normalize_name, NameChange};

pub const DEFAULT_PORT: u16 = 3000;
pub const NODE_PORT_MIN: u16 = 30000;
pub const NODE_PORT_MAX: u16 = 32767;

/// Parsed application spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub app: AppSection,
    #[serde(default)]
    pub service: ServiceSection,
    #[serde(default)]
    pub resources: ResourcesSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling: Option<ScalingSection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppSection {
    pub name: String,
    pub image: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    #[serde(rename = "type", default)]
    pub service_type: ServiceType,
    #[serde(
        rename = "externalPort",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub external_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::NodePort => write!(f, "NodePort"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourcesSection {
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_memory")]
    pub memory: String,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            cpu: default_cpu(),
            memory: default_memory(),
        }
    }
}

/// Autoscaling bounds. The section being present is what opts an app into an
/// HPA; defaults apply per-field once it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScalingSection {
    #[serde(default = "default_scaling_min")]
    pub min: u32,
    #[serde(default = "default_scaling_max")]
    pub max: u32,
    #[serde(default = "default_target_cpu")]
    pub target_cpu: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct HealthSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liveness: Option<ProbeSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ProbeSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProbeSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(
        rename = "initialDelaySeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub initial_delay_seconds: Option<i32>,
    #[serde(
        rename = "periodSeconds",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub period_seconds: Option<i32>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cpu() -> String {
    "100m".to_string()
}

fn default_memory() -> String {
    "128Mi".to_string()
}

fn default_scaling_min() -> u32 {
    1
}

fn default_scaling_max() -> u32 {
    10
}

fn default_target_cpu() -> u32 {
    70
}

impl Spec {
    /// Load a spec from a `paas.yaml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::SpecInvalid(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&content)
    }

    /// Parse a spec from YAML source.
    pub fn parse(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::SpecInvalid(e.to_string()))
    }

    /// Canonical app name (normalized).
    pub fn name(&self) -> String {
        normalize_name(&self.app.name)
    }

    /// Canonical namespace (normalized, defaults to the app name).
    pub fn namespace(&self) -> String {
        match &self.app.namespace {
            Some(ns) => normalize_name(ns),
            None => self.name(),
        }
    }

    /// Replicas the Deployment starts with.
    pub fn replicas(&self) -> u32 {
        self.scaling.as_ref().map_or(1, |s| s.min)
    }

    /// Whether the spec asks for an HPA.
    pub fn wants_autoscaler(&self) -> bool {
        self.scaling.as_ref().is_some_and(|s| s.max > s.min)
    }

    /// Every identifier the normalizer had to rewrite.
    pub fn name_changes(&self) -> Vec<NameChange> {
        let mut changes = Vec::new();
        let name = normalize_name(&self.app.name);
        if name != self.app.name {
            changes.push(NameChange {
                field: "app.name".to_string(),
                from: self.app.name.clone(),
                to: name,
            });
        }
        if let Some(ns) = &self.app.namespace {
            let normalized = normalize_name(ns);
            if normalized != *ns {
                changes.push(NameChange {
                    field: "app.namespace".to_string(),
                    from: ns.clone(),
                    to: normalized,
                });
            }
        }
        changes
    }

    /// A copy with all DNS-sensitive identifiers normalized.
    pub fn normalized(&self) -> Spec {
        let mut spec = self.clone();
        spec.app.name = normalize_name(&spec.app.name);
        if let Some(ns) = &spec.app.namespace {
            spec.app.namespace = Some(normalize_name(ns));
        }
        spec
    }

    /// Validate required fields and the service exposure policy.
    pub fn validate(&self) -> Result<()> {
        if self.app.name.trim().is_empty() {
            return Err(Error::SpecInvalid("app.name is required".to_string()));
        }
        if self.app.image.trim().is_empty() {
            return Err(Error::SpecInvalid("app.image is required".to_string()));
        }
        if let Some(scaling) = &self.scaling {
            if scaling.min < 1 {
                return Err(Error::SpecInvalid(
                    "scaling.min must be at least 1".to_string(),
                ));
            }
            if scaling.max < scaling.min {
                return Err(Error::SpecInvalid(
                    "scaling.max must not be below scaling.min".to_string(),
                ));
            }
            if !(1..=100).contains(&scaling.target_cpu) {
                return Err(Error::SpecInvalid(
                    "scaling.target_cpu must be between 1 and 100".to_string(),
                ));
            }
        }
        if self.service.service_type == ServiceType::NodePort {
            match self.service.external_port {
                None => {
                    return Err(Error::ServiceInvalid(
                        "service.externalPort is required for NodePort services".to_string(),
                    ))
                }
                Some(port) if !(NODE_PORT_MIN..=NODE_PORT_MAX).contains(&port) => {
                    return Err(Error::ServiceInvalid(format!(
                        "service.externalPort {port} is outside the NodePort range \
                         {NODE_PORT_MIN}-{NODE_PORT_MAX}"
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
app:
  name: hello
  image: nginx:1.25
  port: 80
"#;

    #[test]
    fn minimal_spec_applies_defaults() {
        let spec = Spec::parse(MINIMAL).unwrap();
        assert_eq!(spec.app.name, "hello");
        assert_eq!(spec.app.port, 80);
        assert_eq!(spec.namespace(), "hello");
        assert_eq!(spec.resources.cpu, "100m");
        assert_eq!(spec.resources.memory, "128Mi");
        assert_eq!(spec.service.service_type, ServiceType::ClusterIP);
        assert_eq!(spec.replicas(), 1);
        assert!(!spec.wants_autoscaler());
        assert!(spec.env.is_empty());
        assert!(spec.domains.is_empty());
        spec.validate().unwrap();
    }

    #[test]
    fn port_defaults_to_3000() {
        let spec = Spec::parse("app:\n  name: a\n  image: img:1\n").unwrap();
        assert_eq!(spec.app.port, 3000);
    }

    #[test]
    fn missing_image_is_a_parse_error() {
        let err = Spec::parse("app:\n  name: a\n").unwrap_err();
        assert!(matches!(err, Error::SpecInvalid(_)));
    }

    #[test]
    fn unknown_top_level_keys_are_ignored() {
        let spec = Spec::parse(&format!("{MINIMAL}\nmonitoring:\n  enabled: true\n")).unwrap();
        assert_eq!(spec.app.name, "hello");
    }

    #[test]
    fn unknown_nested_keys_are_errors() {
        let err = Spec::parse("app:\n  name: a\n  image: i:1\n  flavor: spicy\n").unwrap_err();
        assert!(matches!(err, Error::SpecInvalid(_)));
    }

    #[test]
    fn scaling_section_enables_autoscaler() {
        let spec = Spec::parse(&format!(
            "{MINIMAL}\nscaling:\n  min: 2\n  max: 5\n  target_cpu: 60\n"
        ))
        .unwrap();
        assert_eq!(spec.replicas(), 2);
        assert!(spec.wants_autoscaler());
    }

    #[test]
    fn scaling_with_equal_bounds_has_no_autoscaler() {
        let spec = Spec::parse(&format!("{MINIMAL}\nscaling:\n  min: 3\n  max: 3\n")).unwrap();
        assert_eq!(spec.replicas(), 3);
        assert!(!spec.wants_autoscaler());
    }

    #[test]
    fn node_port_requires_external_port() {
        let spec = Spec::parse(&format!("{MINIMAL}\nservice:\n  type: NodePort\n")).unwrap();
        assert!(matches!(
            spec.validate().unwrap_err(),
            Error::ServiceInvalid(_)
        ));
    }

    #[test]
    fn node_port_range_is_enforced() {
        let spec = Spec::parse(&format!(
            "{MINIMAL}\nservice:\n  type: NodePort\n  externalPort: 80\n"
        ))
        .unwrap();
        assert!(matches!(
            spec.validate().unwrap_err(),
            Error::ServiceInvalid(_)
        ));

        let spec = Spec::parse(&format!(
            "{MINIMAL}\nservice:\n  type: NodePort\n  externalPort: 30080\n"
        ))
        .unwrap();
        spec.validate().unwrap();
    }

    #[test]
    fn name_changes_reported_for_denormalized_identifiers() {
        let spec = Spec::parse("app:\n  name: My_App\n  image: img:1\n").unwrap();
        let changes = spec.name_changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "app.name");
        assert_eq!(changes[0].to, "my-app");

        let normalized = spec.normalized();
        assert!(normalized.name_changes().is_empty());
        assert_eq!(normalized.app.name, "my-app");
    }
}
