use thiserror::Error;

/// Error sum type for the deployment core.
///
/// Pipeline stages return these directly; the CLI layer wraps them with
/// `anyhow::Context` describing the operation that raised them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid spec: {0}")]
    SpecInvalid(String),

    #[error("invalid service configuration: {0}")]
    ServiceInvalid(String),

    #[error("name normalization was rejected; fix the names in paas.yaml or rerun with --yes")]
    NameNormalizationRejected,

    #[error("hostname '{hostname}' is already routed to app '{owner}'")]
    HostnameTaken { hostname: String, owner: String },

    #[error("no stored credential matches registry '{0}'")]
    CredentialMissing(String),

    #[error("a deployment for app '{0}' is already in progress")]
    DeploymentPending(String),

    #[error("cannot open state store: {0}")]
    StoreUnavailable(#[source] sqlx::Error),

    #[error("failed to render manifest: {0}")]
    ManifestRender(String),

    #[error("cluster rejected {kind}/{name}: {reason}")]
    ApplyRejected {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("unsupported resource kind '{0}'")]
    UnsupportedKind(String),

    #[error("rollout did not become ready within {0} seconds")]
    RolloutTimeout(u64),

    #[error("no successful release found for app '{0}'")]
    LatestNotFound(String),

    #[error("no release matches '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
