use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Application row. One per app name; removed only by explicit delete.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct App {
    pub id: i64,
    pub name: String,
}

/// One durable deployment record; one pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Release {
    pub id: i64,
    pub app_id: i64,
    /// Timestamp-based label (`v<unix_seconds>`), sortable within an app.
    pub version: String,
    /// Full image reference as given in the spec.
    pub image: String,
    /// Tag suffix of the image reference, `latest` when absent.
    pub image_tag: String,
    /// 12-char hex digest of the image reference string.
    pub image_hash: String,
    /// Full spec snapshot, canonical JSON.
    pub config_json: String,
    /// 12-char hex digest of the spec snapshot.
    pub config_hash: String,
    pub status: ReleaseStatus,
    /// Version of the release this one was rolled back to, when applicable.
    pub rollback_to_version: Option<String>,
    pub deployed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Release lifecycle. A row transitions out of `Pending` exactly once and the
/// terminal state is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ReleaseStatus {
    Pending,
    Success,
    Failed,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseStatus::Pending => write!(f, "pending"),
            ReleaseStatus::Success => write!(f, "success"),
            ReleaseStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A hostname routed to exactly one app.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: i64,
    pub app_name: String,
    pub hostname: String,
    /// Rightmost two labels of the hostname; grouping key for ingress files.
    pub base_domain: String,
    pub path: String,
    pub ssl_enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Stored registry credential. `secret` holds the base64-encoded password.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegistryCredential {
    pub id: i64,
    pub registry_url: String,
    pub username: String,
    pub secret: String,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}
