use std::path::Path;

use anyhow::{bail, Result};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};

use crate::cli::resolve_app_name;
use crate::db::apps;
use crate::environment::Environment;
use crate::version::VersionManager;

pub async fn handle_releases(
    env: &Environment,
    app: Option<String>,
    file: &Path,
    limit: i64,
) -> Result<()> {
    let app_name = resolve_app_name(app, file)?;
    let Some(app) = apps::find_by_name(&env.pool, &app_name).await? else {
        bail!("unknown app '{app_name}'");
    };

    let vm = VersionManager::new(&env.pool, &app);
    let releases = vm.list(limit).await?;
    if releases.is_empty() {
        println!("No releases recorded for '{app_name}'.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("VERSION"),
            Cell::new("IMAGE"),
            Cell::new("TAG"),
            Cell::new("STATUS"),
            Cell::new("DEPLOYED AT"),
            Cell::new("ROLLBACK OF"),
            Cell::new("ERROR"),
        ]);
    for release in &releases {
        table.add_row(vec![
            Cell::new(&release.version),
            Cell::new(&release.image),
            Cell::new(&release.image_tag),
            Cell::new(release.status),
            Cell::new(release.deployed_at.format("%Y-%m-%d %H:%M:%S UTC")),
            Cell::new(release.rollback_to_version.as_deref().unwrap_or("-")),
            Cell::new(release.error_message.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    Ok(())
}
