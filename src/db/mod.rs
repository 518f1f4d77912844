pub mod apps;
pub mod credentials;
pub mod deployments;
pub mod domains;
pub mod models;

pub use models::*;

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::errors::{Error, Result};

/// Database file name under the state directory.
pub const DB_FILE: &str = "shipyard.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS apps (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS deployments (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    app_id              INTEGER NOT NULL REFERENCES apps(id) ON DELETE CASCADE,
    version             TEXT NOT NULL,
    image               TEXT NOT NULL,
    image_tag           TEXT NOT NULL,
    image_hash          TEXT NOT NULL,
    config_json         TEXT NOT NULL,
    config_hash         TEXT NOT NULL,
    status              TEXT NOT NULL,
    rollback_to_version TEXT,
    deployed_at         TEXT NOT NULL,
    completed_at        TEXT,
    error_message       TEXT
);

CREATE INDEX IF NOT EXISTS idx_deployments_app_deployed_at
    ON deployments(app_id, deployed_at DESC);

CREATE TABLE IF NOT EXISTS domains (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    app_name    TEXT NOT NULL,
    hostname    TEXT NOT NULL UNIQUE,
    base_domain TEXT NOT NULL,
    path        TEXT NOT NULL DEFAULT '/',
    ssl_enabled INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_domains_base_domain ON domains(base_domain);

CREATE TABLE IF NOT EXISTS registry_credentials (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    registry_url TEXT NOT NULL UNIQUE,
    username     TEXT NOT NULL,
    secret       TEXT NOT NULL,
    is_default   INTEGER NOT NULL DEFAULT 0,
    created_at   TEXT NOT NULL
);
"#;

/// Open (creating if missing) the single-file store under the state
/// directory and bootstrap the schema.
///
/// Failure here is fatal for any command that needs persistence.
pub async fn connect(state_dir: &Path) -> Result<SqlitePool> {
    let path = state_dir.join(DB_FILE);
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .map_err(Error::StoreUnavailable)?;
    bootstrap(&pool).await?;
    Ok(pool)
}

/// In-memory store with the same schema. Used by tests.
///
/// Pinned to a single pooled connection so every query sees the same
/// in-memory database.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options =
        SqliteConnectOptions::from_str("sqlite::memory:").map_err(Error::StoreUnavailable)?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(Error::StoreUnavailable)?;
    bootstrap(&pool).await?;
    Ok(pool)
}

async fn bootstrap(pool: &SqlitePool) -> Result<()> {
    sqlx::raw_sql(SCHEMA)
        .execute(pool)
        .await
        .map_err(Error::StoreUnavailable)?;
    Ok(())
}
