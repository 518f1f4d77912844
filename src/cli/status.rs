use anyhow::Result;
use chrono::DateTime;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, ListParams};

use crate::environment::Environment;
use crate::manifest::{
    LABEL_APP, LABEL_DEPLOYED_AT, LABEL_IMAGE_TAG, LABEL_MANAGED_BY, LABEL_VERSION,
    MANAGED_BY_VALUE,
};

/// Show what we own in the cluster. Ownership is decided purely by labels.
pub async fn handle_status(env: &Environment, app: Option<String>) -> Result<()> {
    let client = env.kube_client().await?;
    let deployments: Api<Deployment> = Api::all(client);

    let selector = match &app {
        Some(app) => format!("{LABEL_APP}={app},{LABEL_MANAGED_BY}={MANAGED_BY_VALUE}"),
        None => format!("{LABEL_MANAGED_BY}={MANAGED_BY_VALUE}"),
    };
    let list = deployments
        .list(&ListParams::default().labels(&selector))
        .await?;

    if list.items.is_empty() {
        println!("No managed deployments found in the cluster.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("APP"),
            Cell::new("NAMESPACE"),
            Cell::new("READY"),
            Cell::new("VERSION"),
            Cell::new("IMAGE TAG"),
            Cell::new("DEPLOYED AT"),
        ]);

    for deployment in &list.items {
        let labels = deployment.metadata.labels.clone().unwrap_or_default();
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(0);
        let ready = deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0);
        let deployed_at = labels
            .get(LABEL_DEPLOYED_AT)
            .and_then(|ts| ts.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(labels.get(LABEL_APP).map(String::as_str).unwrap_or("-")),
            Cell::new(deployment.metadata.namespace.as_deref().unwrap_or("-")),
            Cell::new(format!("{ready}/{desired}")),
            Cell::new(labels.get(LABEL_VERSION).map(String::as_str).unwrap_or("-")),
            Cell::new(
                labels
                    .get(LABEL_IMAGE_TAG)
                    .map(String::as_str)
                    .unwrap_or("-"),
            ),
            Cell::new(deployed_at),
        ]);
    }
    println!("{table}");
    Ok(())
}
