use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};

use crate::cluster::{ApplyEngine, SupportedKind};
use crate::domain::{base_domain, DomainRegistry};
use crate::environment::Environment;
use crate::manifest::ingress::{BaseChange, IngressConsolidator, INGRESS_NAMESPACE};

#[derive(Subcommand, Debug)]
pub enum DomainCommands {
    /// Route a hostname to an app
    Add {
        /// App that owns the hostname
        app: String,
        /// Hostname to route (e.g. api.example.com)
        hostname: String,
        /// Path prefix routed to the app
        #[arg(long, default_value = "/")]
        path: String,
        /// Skip SSL for this hostname
        #[arg(long)]
        no_ssl: bool,
    },
    /// Remove a hostname from an app
    Remove { app: String, hostname: String },
    /// List stored domains
    List {
        /// Only show domains owned by this app
        #[arg(short, long)]
        app: Option<String>,
    },
}

pub async fn handle_domain(env: &Environment, command: DomainCommands) -> Result<()> {
    let registry = DomainRegistry::new(&env.pool);
    match command {
        DomainCommands::Add {
            app,
            hostname,
            path,
            no_ssl,
        } => {
            registry
                .add(&app, &hostname, &path, !no_ssl)
                .await
                .context("failed to add domain")?;
            sync_base(env, &base_domain(&hostname)).await?;
            println!("✓ Added domain '{hostname}' to app '{app}'");
        }
        DomainCommands::Remove { app, hostname } => {
            let removed = registry
                .remove(&app, &hostname)
                .await
                .context("failed to remove domain")?;
            sync_base(env, &base_domain(&hostname)).await?;
            if removed {
                println!("✓ Removed domain '{hostname}' from app '{app}'");
            } else {
                println!("Domain '{hostname}' was not routed to app '{app}'");
            }
        }
        DomainCommands::List { app } => {
            let domains = match app {
                Some(app) => registry.for_app(&app).await?,
                None => registry.list_all().await?,
            };
            if domains.is_empty() {
                println!("No domains configured.");
                return Ok(());
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("HOSTNAME"),
                    Cell::new("APP"),
                    Cell::new("BASE"),
                    Cell::new("PATH"),
                    Cell::new("SSL"),
                    Cell::new("CREATED AT"),
                ]);
            for domain in &domains {
                table.add_row(vec![
                    Cell::new(&domain.hostname),
                    Cell::new(&domain.app_name),
                    Cell::new(&domain.base_domain),
                    Cell::new(&domain.path),
                    Cell::new(if domain.ssl_enabled { "yes" } else { "no" }),
                    Cell::new(domain.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
                ]);
            }
            println!("{table}");
        }
    }
    Ok(())
}

/// Rewrite the base's shared file and push the change to the cluster.
async fn sync_base(env: &Environment, base: &str) -> Result<()> {
    let consolidator = IngressConsolidator::new(&env.pool, &env.shared_dir());
    let change = consolidator.rewrite_base(base).await?;

    let client = env.kube_client().await?;
    let engine = ApplyEngine::new(client);
    match change {
        BaseChange::Written(path) => {
            engine
                .apply_file(&path, INGRESS_NAMESPACE)
                .await
                .context("failed to apply updated ingress")?;
        }
        BaseChange::Removed(_) => {
            engine
                .delete_object(SupportedKind::Ingress, base, INGRESS_NAMESPACE)
                .await
                .context("failed to delete retired ingress")?;
        }
    }
    Ok(())
}
