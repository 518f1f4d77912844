//! CLI command handlers. The core pipeline stays interaction-free; prompts
//! and table rendering live here.

pub mod delete;
pub mod deploy;
pub mod domain;
pub mod registry;
pub mod releases;
pub mod rollback;
pub mod status;

pub use domain::DomainCommands;
pub use registry::RegistryCommands;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use crate::spec::Spec;

/// App name from an explicit argument, falling back to the spec file next to
/// the caller.
pub fn resolve_app_name(explicit: Option<String>, file: &Path) -> Result<String> {
    if let Some(app) = explicit {
        return Ok(crate::spec::normalize_name(&app));
    }
    let spec = Spec::load(file)
        .with_context(|| format!("no app name given and {} is not readable", file.display()))?;
    Ok(spec.name())
}

/// Blocking y/N prompt on stdin.
pub fn confirm(question: &str) -> Result<bool> {
    print!("{question} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer == "y" || answer == "yes")
}
