use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::warn;

use crate::cli::resolve_app_name;
use crate::environment::Environment;
use crate::pipeline::{self, DeployOptions, NameChangePolicy};

pub async fn handle_rollback(
    env: &Environment,
    app: Option<String>,
    identifier: Option<String>,
    file: &Path,
    timeout_secs: u64,
) -> Result<()> {
    let app_name = resolve_app_name(app, file)?;
    let opts = DeployOptions {
        // The snapshot being replayed already carries normalized names.
        name_policy: NameChangePolicy::Accept,
        timeout: Duration::from_secs(timeout_secs),
        ..Default::default()
    };

    match pipeline::rollback(env, &app_name, identifier.as_deref(), &opts).await {
        Ok(release) => {
            println!(
                "✓ Rolled back '{}' to {} (new release {}, image {})",
                app_name,
                release.rollback_to_version.as_deref().unwrap_or("?"),
                release.version,
                release.image
            );
            Ok(())
        }
        Err(e) => {
            // A failed rollback still wrote a failed row, and the cluster may
            // already be running the target image.
            warn!(
                app = %app_name,
                "rollback failed after apply may have started; the cluster can be \
                 in the target state even though the new release is marked failed"
            );
            Err(e).context("rollback failed")
        }
    }
}
