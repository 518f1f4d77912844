use anyhow::{bail, Result};
use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Table};

use crate::environment::Environment;
use crate::registry::CredentialStore;

#[derive(Subcommand, Debug)]
pub enum RegistryCommands {
    /// Store credentials for a registry
    Add {
        /// Registry URL (e.g. ghcr.io, or https://index.docker.io/v1/ for Docker Hub)
        url: String,
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        password: String,
        /// Use this credential when no registry-specific one matches
        #[arg(long)]
        default: bool,
    },
    /// Remove stored credentials for a registry
    Remove { url: String },
    /// List stored registry credentials
    List,
    /// Mark a stored credential as the default
    SetDefault { url: String },
}

pub async fn handle_registry(env: &Environment, command: RegistryCommands) -> Result<()> {
    let store = CredentialStore::new(&env.pool);
    match command {
        RegistryCommands::Add {
            url,
            username,
            password,
            default,
        } => {
            store.add(&url, &username, &password, default).await?;
            println!("✓ Stored credentials for '{url}'");
        }
        RegistryCommands::Remove { url } => {
            if store.remove(&url).await? {
                println!("✓ Removed credentials for '{url}'");
            } else {
                println!("No credentials stored for '{url}'");
            }
        }
        RegistryCommands::List => {
            let creds = store.list().await?;
            if creds.is_empty() {
                println!("No registry credentials stored.");
                return Ok(());
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("REGISTRY"),
                    Cell::new("USERNAME"),
                    Cell::new("DEFAULT"),
                    Cell::new("CREATED AT"),
                ]);
            for cred in &creds {
                table.add_row(vec![
                    Cell::new(&cred.registry_url),
                    Cell::new(&cred.username),
                    Cell::new(if cred.is_default { "yes" } else { "" }),
                    Cell::new(cred.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
                ]);
            }
            println!("{table}");
        }
        RegistryCommands::SetDefault { url } => {
            if !store.set_default(&url).await? {
                bail!("no credentials stored for '{url}'");
            }
            println!("✓ '{url}' is now the default registry credential");
        }
    }
    Ok(())
}
