use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::cli::{confirm, resolve_app_name};
use crate::db::apps;
use crate::environment::Environment;
use crate::pipeline;

pub async fn handle_delete(
    env: &Environment,
    app: Option<String>,
    all: bool,
    force: bool,
    file: &Path,
) -> Result<()> {
    if all {
        let known = apps::list(&env.pool).await?;
        if known.is_empty() {
            println!("Nothing to delete.");
            return Ok(());
        }
        if !force {
            let names: Vec<&str> = known.iter().map(|a| a.name.as_str()).collect();
            if !confirm(&format!(
                "Delete ALL apps ({}) and their cluster resources?",
                names.join(", ")
            ))? {
                bail!("delete aborted");
            }
        }
        for app in known {
            pipeline::delete_app(env, &app.name)
                .await
                .with_context(|| format!("failed to delete app '{}'", app.name))?;
            println!("✓ Deleted app '{}'", app.name);
        }
        return Ok(());
    }

    let app_name = resolve_app_name(app, file)?;
    if !force && !confirm(&format!("Delete app '{app_name}' and its cluster resources?"))? {
        bail!("delete aborted");
    }
    pipeline::delete_app(env, &app_name)
        .await
        .with_context(|| format!("failed to delete app '{app_name}'"))?;
    println!("✓ Deleted app '{app_name}'");
    Ok(())
}
