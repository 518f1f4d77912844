//! Rollout readiness polling with diagnostic surfacing.
//!
//! Observational only: nothing here mutates cluster resources. Diagnostics
//! (events, pod pending reasons, container waits, log tails) are informative
//! and never change the outcome.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Event, Pod};
use kube::api::{Api, ListParams, LogParams};
use kube::Client;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::errors::{Error, Result};
use crate::manifest::LABEL_APP;

/// Poll cadence during rollout.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default rollout deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Events older than this are not surfaced.
const EVENT_WINDOW_SECONDS: i64 = 60;

/// Container waiting reasons that warrant a log tail.
const FAILING_WAIT_REASONS: &[&str] = &[
    "CrashLoopBackOff",
    "ErrImagePull",
    "ImagePullBackOff",
    "InvalidImageName",
    "CreateContainerConfigError",
    "CreateContainerError",
    "RunContainerError",
];

const LOG_TAIL_LINES: i64 = 15;

/// Polls one Deployment until every desired replica is ready or the deadline
/// passes.
pub struct ReadinessWaiter {
    client: Client,
    namespace: String,
    name: String,
}

impl ReadinessWaiter {
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Wait until `ready == desired && desired > 0`, surfacing diagnostics
    /// on each tick. Returns `RolloutTimeout` past the deadline.
    pub async fn wait(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut ticker = interval(POLL_INTERVAL);
        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), &self.namespace);

        let mut last_ready = -1;
        let mut last_desired = -1;
        let mut seen_events: HashSet<String> = HashSet::new();

        loop {
            ticker.tick().await;
            if Instant::now() >= deadline {
                return Err(Error::RolloutTimeout(timeout.as_secs()));
            }

            let Some(deployment) = deployments.get_opt(&self.name).await? else {
                debug!(name = %self.name, "deployment not visible yet");
                continue;
            };

            let desired = deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(1);
            let status = deployment.status.unwrap_or_default();
            let ready = status.ready_replicas.unwrap_or(0);

            if ready != last_ready || desired != last_desired {
                info!(name = %self.name, "{ready}/{desired} replicas ready");
                last_ready = ready;
                last_desired = desired;
            }

            for condition in status.conditions.iter().flatten() {
                if condition.type_ == "Progressing" && condition.status == "False" {
                    warn!(
                        name = %self.name,
                        reason = condition.reason.as_deref().unwrap_or(""),
                        message = condition.message.as_deref().unwrap_or(""),
                        "deployment is not progressing"
                    );
                }
            }

            self.surface_events(&mut seen_events).await;
            self.surface_pod_diagnostics().await;

            if ready == desired && desired > 0 {
                info!(name = %self.name, "rollout complete");
                return Ok(());
            }
        }
    }

    /// Report new events for the Deployment object within the recent window.
    /// Event listing failures are ignored; diagnostics must not break waits.
    async fn surface_events(&self, seen: &mut HashSet<String>) {
        let events: Api<Event> = Api::namespaced(self.client.clone(), &self.namespace);
        let lp = ListParams::default().fields(&format!(
            "involvedObject.name={},involvedObject.kind=Deployment",
            self.name
        ));
        let Ok(list) = events.list(&lp).await else {
            return;
        };
        let now = Utc::now();
        for event in list.items {
            let Some(uid) = event.metadata.uid.clone() else {
                continue;
            };
            let stamp = event
                .last_timestamp
                .as_ref()
                .map(|t| t.0)
                .or(event.event_time.as_ref().map(|t| t.0));
            let recent = stamp
                .map(|t| (now - t).num_seconds() <= EVENT_WINDOW_SECONDS)
                .unwrap_or(false);
            if recent && seen.insert(uid) {
                info!(
                    name = %self.name,
                    reason = event.reason.as_deref().unwrap_or(""),
                    message = event.message.as_deref().unwrap_or(""),
                    "event"
                );
            }
        }
    }

    /// Report pending reasons, waiting containers, and log tails for pods
    /// that are not yet ready.
    async fn surface_pod_diagnostics(&self) {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &self.namespace);
        let lp = ListParams::default().labels(&format!("{LABEL_APP}={}", self.name));
        let Ok(list) = pods.list(&lp).await else {
            return;
        };

        for pod in list.items {
            let pod_name = pod.metadata.name.clone().unwrap_or_default();
            let Some(status) = pod.status else { continue };

            if status.phase.as_deref() == Some("Pending") {
                for condition in status.conditions.iter().flatten() {
                    if condition.status == "False" {
                        warn!(
                            pod = %pod_name,
                            reason = condition.reason.as_deref().unwrap_or(""),
                            message = condition.message.as_deref().unwrap_or(""),
                            "pod pending"
                        );
                    }
                }
            }

            for container in status.container_statuses.iter().flatten() {
                if let Some(waiting) = container.state.as_ref().and_then(|s| s.waiting.as_ref()) {
                    let reason = waiting.reason.as_deref().unwrap_or("");
                    warn!(
                        pod = %pod_name,
                        container = %container.name,
                        reason,
                        message = waiting.message.as_deref().unwrap_or(""),
                        "container waiting"
                    );
                    if FAILING_WAIT_REASONS.contains(&reason) || container.restart_count > 0 {
                        self.surface_log_tail(&pods, &pod_name, &container.name).await;
                    }
                } else if !container.ready && container.restart_count > 0 {
                    self.surface_log_tail(&pods, &pod_name, &container.name).await;
                }
            }
        }
    }

    async fn surface_log_tail(&self, pods: &Api<Pod>, pod_name: &str, container: &str) {
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines: Some(LOG_TAIL_LINES),
            ..Default::default()
        };
        match pods.logs(pod_name, &params).await {
            Ok(logs) if !logs.trim().is_empty() => {
                warn!(pod = %pod_name, %container, "recent logs:\n{logs}");
            }
            Ok(_) => {}
            Err(e) => debug!(pod = %pod_name, %container, error = %e, "cannot read logs"),
        }
    }
}
