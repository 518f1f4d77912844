//! Deployment and autoscaler rendering.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec,
    MetricTarget, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, EnvVar, HTTPGetAction, LocalObjectReference, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, SecretEnvSource,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::db::models::{RegistryCredential, Release};
use crate::manifest::{release_labels, secrets};
use crate::spec::{ProbeSection, Spec};

const LIVENESS_DELAY_SECONDS: i32 = 10;
const LIVENESS_PERIOD_SECONDS: i32 = 10;
const READINESS_DELAY_SECONDS: i32 = 5;
const READINESS_PERIOD_SECONDS: i32 = 5;

/// Build the app Deployment for a release.
pub fn deployment(spec: &Spec, release: &Release, creds: &[RegistryCredential]) -> Deployment {
    let app_name = spec.name();
    let selector = BTreeMap::from([(crate::manifest::LABEL_APP.to_string(), app_name.clone())]);

    let env: Vec<EnvVar> = spec
        .env
        .iter()
        .map(|(key, value)| EnvVar {
            name: key.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let env_from = (!spec.secrets.is_empty()).then(|| {
        vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secrets::app_secret_name(&app_name),
                optional: None,
            }),
            ..Default::default()
        }]
    });

    let image_pull_secrets = (!creds.is_empty()).then(|| {
        vec![LocalObjectReference {
            name: secrets::registry_secret_name(&app_name),
        }]
    });

    let mut resource_map = BTreeMap::new();
    resource_map.insert("cpu".to_string(), Quantity(spec.resources.cpu.clone()));
    resource_map.insert("memory".to_string(), Quantity(spec.resources.memory.clone()));

    Deployment {
        metadata: ObjectMeta {
            name: Some(app_name.clone()),
            namespace: Some(spec.namespace()),
            labels: Some(release_labels(&app_name, release)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas() as i32),
            selector: LabelSelector {
                match_labels: Some(selector),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(release_labels(&app_name, release)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: app_name.clone(),
                        image: Some(spec.app.image.clone()),
                        ports: Some(vec![ContainerPort {
                            container_port: spec.app.port as i32,
                            ..Default::default()
                        }]),
                        env: (!env.is_empty()).then_some(env),
                        env_from,
                        resources: Some(ResourceRequirements {
                            limits: Some(resource_map.clone()),
                            requests: Some(resource_map),
                            ..Default::default()
                        }),
                        liveness_probe: Some(http_probe(
                            spec.health.liveness.as_ref(),
                            spec.app.port,
                            LIVENESS_DELAY_SECONDS,
                            LIVENESS_PERIOD_SECONDS,
                        )),
                        readiness_probe: Some(http_probe(
                            spec.health.readiness.as_ref(),
                            spec.app.port,
                            READINESS_DELAY_SECONDS,
                            READINESS_PERIOD_SECONDS,
                        )),
                        ..Default::default()
                    }],
                    image_pull_secrets,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the CPU-utilization autoscaler when the spec opts in and the bounds
/// leave room to scale.
pub fn autoscaler(spec: &Spec, release: &Release) -> Option<HorizontalPodAutoscaler> {
    if !spec.wants_autoscaler() {
        return None;
    }
    let scaling = spec.scaling.as_ref()?;
    let app_name = spec.name();

    Some(HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(app_name.clone()),
            namespace: Some(spec.namespace()),
            labels: Some(release_labels(&app_name, release)),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".to_string()),
                kind: "Deployment".to_string(),
                name: app_name,
            },
            min_replicas: Some(scaling.min as i32),
            max_replicas: scaling.max as i32,
            metrics: Some(vec![MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: "cpu".to_string(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(scaling.target_cpu as i32),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn http_probe(section: Option<&ProbeSection>, app_port: u16, delay: i32, period: i32) -> Probe {
    let path = section
        .and_then(|s| s.path.clone())
        .unwrap_or_else(|| "/".to_string());
    let port = section.and_then(|s| s.port).unwrap_or(app_port);
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path),
            port: IntOrString::Int(port as i32),
            ..Default::default()
        }),
        initial_delay_seconds: Some(
            section
                .and_then(|s| s.initial_delay_seconds)
                .unwrap_or(delay),
        ),
        period_seconds: Some(section.and_then(|s| s.period_seconds).unwrap_or(period)),
        ..Default::default()
    }
}
