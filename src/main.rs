use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod cluster;
mod db;
mod domain;
mod environment;
mod errors;
mod manifest;
mod pipeline;
mod registry;
mod spec;
mod version;

use cli::{DomainCommands, RegistryCommands};
use environment::Environment;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy the application described by paas.yaml
    Deploy {
        /// Path to the spec file
        #[arg(short, long, default_value = "paas.yaml")]
        file: PathBuf,
        /// Accept name normalization without prompting
        #[arg(short, long)]
        yes: bool,
        /// Attach credentials for these registries instead of auto-matching
        #[arg(long = "registry")]
        registries: Vec<String>,
        /// Attach no registry credentials
        #[arg(long)]
        no_registry: bool,
        /// Seconds to wait for the rollout to become ready
        #[arg(long, default_value_t = 300)]
        timeout: u64,
        /// Write the manifest bundle without touching the cluster
        #[arg(long)]
        generate_only: bool,
    },
    /// Roll back to an earlier release (version, image tag, or latest success)
    #[command(visible_alias = "rb")]
    Rollback {
        /// Version label or image tag; omit for the latest success
        identifier: Option<String>,
        #[arg(short, long)]
        app: Option<String>,
        #[arg(short, long, default_value = "paas.yaml")]
        file: PathBuf,
        /// Seconds to wait for the rollout to become ready
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Delete an app and everything it owns in the cluster
    Delete {
        #[arg(short, long)]
        app: Option<String>,
        /// Delete every known app
        #[arg(long)]
        all: bool,
        /// Skip the confirmation prompt
        #[arg(long)]
        force: bool,
        #[arg(short, long, default_value = "paas.yaml")]
        file: PathBuf,
    },
    /// List release history
    #[command(visible_alias = "rel")]
    Releases {
        #[arg(short, long)]
        app: Option<String>,
        #[arg(short, long, default_value = "paas.yaml")]
        file: PathBuf,
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },
    /// Show managed deployments in the cluster
    Status {
        #[arg(short, long)]
        app: Option<String>,
    },
    /// Custom domain management commands
    #[command(subcommand)]
    #[command(visible_alias = "dom")]
    Domain(DomainCommands),
    /// Registry credential management commands
    #[command(subcommand)]
    #[command(visible_alias = "reg")]
    Registry(RegistryCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let env = Environment::init().await?;

    match cli.command {
        Commands::Deploy {
            file,
            yes,
            registries,
            no_registry,
            timeout,
            generate_only,
        } => {
            cli::deploy::handle_deploy(
                &env,
                &file,
                yes,
                registries,
                no_registry,
                timeout,
                generate_only,
            )
            .await
        }
        Commands::Rollback {
            identifier,
            app,
            file,
            timeout,
        } => cli::rollback::handle_rollback(&env, app, identifier, &file, timeout).await,
        Commands::Delete {
            app,
            all,
            force,
            file,
        } => cli::delete::handle_delete(&env, app, all, force, &file).await,
        Commands::Releases { app, file, limit } => {
            cli::releases::handle_releases(&env, app, &file, limit).await
        }
        Commands::Status { app } => cli::status::handle_status(&env, app).await,
        Commands::Domain(command) => cli::domain::handle_domain(&env, command).await,
        Commands::Registry(command) => cli::registry::handle_registry(&env, command).await,
    }
}
