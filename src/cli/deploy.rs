use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};

use crate::cli::confirm;
use crate::environment::Environment;
use crate::pipeline::{self, DeployOptions, NameChangePolicy};
use crate::registry::CredentialSelection;
use crate::spec::Spec;

#[allow(clippy::too_many_arguments)]
pub async fn handle_deploy(
    env: &Environment,
    file: &Path,
    yes: bool,
    registries: Vec<String>,
    no_registry: bool,
    timeout_secs: u64,
    generate_only: bool,
) -> Result<()> {
    let spec = Spec::load(file)
        .with_context(|| format!("failed to load spec from {}", file.display()))?;

    // Normalization changes need an explicit go-ahead before anything runs.
    let changes = spec.name_changes();
    if !changes.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_header(vec![Cell::new("FIELD"), Cell::new("FROM"), Cell::new("TO")]);
        for change in &changes {
            table.add_row(vec![
                Cell::new(&change.field),
                Cell::new(&change.from),
                Cell::new(&change.to),
            ]);
        }
        println!("Some names are not valid Kubernetes identifiers and will be rewritten:");
        println!("{table}");
        if !yes && !confirm("Continue with the rewritten names?")? {
            bail!("deploy aborted: name normalization rejected");
        }
    }

    let credentials = if no_registry {
        CredentialSelection::None
    } else if !registries.is_empty() {
        CredentialSelection::Explicit(registries)
    } else {
        CredentialSelection::Automatic
    };

    let opts = DeployOptions {
        name_policy: NameChangePolicy::Accept,
        credentials,
        timeout: Duration::from_secs(timeout_secs),
        generate_only,
    };

    let app_name = spec.name();
    let release = pipeline::deploy(env, spec, &opts)
        .await
        .context("deploy failed")?;

    if generate_only {
        println!(
            "✓ Generated manifests for '{}' under {}",
            app_name,
            env.app_dir(&app_name).display()
        );
    } else {
        println!(
            "✓ Deployed '{}' release {} (image {})",
            app_name, release.version, release.image
        );
    }
    Ok(())
}
