//! Service rendering.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::db::models::Release;
use crate::manifest::release_labels;
use crate::spec::{ServiceType, Spec};

/// Build the app Service. `nodePort` is set only for NodePort services.
pub fn service(spec: &Spec, release: &Release) -> Service {
    let app_name = spec.name();
    let selector = BTreeMap::from([(crate::manifest::LABEL_APP.to_string(), app_name.clone())]);

    let node_port = match spec.service.service_type {
        ServiceType::NodePort => spec.service.external_port.map(|p| p as i32),
        ServiceType::ClusterIP => None,
    };

    Service {
        metadata: ObjectMeta {
            name: Some(app_name.clone()),
            namespace: Some(spec.namespace()),
            labels: Some(release_labels(&app_name, release)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(spec.service.service_type.to_string()),
            selector: Some(selector),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: spec.app.port as i32,
                target_port: Some(IntOrString::Int(spec.app.port as i32)),
                node_port,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
