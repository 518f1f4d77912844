//! Explicit pipeline environment: state directory, store handle, cluster
//! client construction. No ambient singletons.

use std::path::{Path, PathBuf};

use kube::Client;
use sqlx::SqlitePool;
use tracing::debug;

use crate::db;
use crate::errors::{Error, Result};

/// Per-user state directory name under the home directory.
const STATE_DIR_NAME: &str = ".shipyard";

/// Everything the pipeline needs from the outside world.
pub struct Environment {
    pub state_dir: PathBuf,
    pub pool: SqlitePool,
}

impl Environment {
    /// Open the default per-user environment, creating the state directory
    /// and store on first use.
    pub async fn init() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "cannot determine home directory",
            ))
        })?;
        Self::init_at(home.join(STATE_DIR_NAME)).await
    }

    /// Open an environment rooted at an explicit state directory.
    pub async fn init_at(state_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&state_dir)?;
        let pool = db::connect(&state_dir).await?;
        debug!(state_dir = %state_dir.display(), "environment ready");
        Ok(Self { state_dir, pool })
    }

    pub fn manifests_dir(&self) -> PathBuf {
        self.state_dir.join("manifests")
    }

    pub fn shared_dir(&self) -> PathBuf {
        self.manifests_dir().join("shared")
    }

    pub fn app_dir(&self, app_name: &str) -> PathBuf {
        self.manifests_dir().join("apps").join(app_name)
    }

    /// Build a cluster client from the ambient kubeconfig/in-cluster config.
    pub async fn kube_client(&self) -> Result<Client> {
        Ok(Client::try_default().await?)
    }
}
