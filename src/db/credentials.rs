use chrono::Utc;
use sqlx::SqlitePool;

use crate::db::models::RegistryCredential;
use crate::errors::Result;

const COLUMNS: &str = "id, registry_url, username, secret, is_default, created_at";

/// Insert or replace a credential for a registry. Making it the default
/// clears any previous default in the same transaction.
pub async fn upsert(
    pool: &SqlitePool,
    registry_url: &str,
    username: &str,
    secret: &str,
    is_default: bool,
) -> Result<RegistryCredential> {
    let mut tx = pool.begin().await?;
    if is_default {
        sqlx::query("UPDATE registry_credentials SET is_default = 0")
            .execute(&mut *tx)
            .await?;
    }
    let sql = format!(
        "INSERT INTO registry_credentials (registry_url, username, secret, is_default, created_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(registry_url) DO UPDATE SET \
             username = excluded.username, \
             secret = excluded.secret, \
             is_default = excluded.is_default \
         RETURNING {COLUMNS}"
    );
    let row = sqlx::query_as::<_, RegistryCredential>(&sql)
        .bind(registry_url)
        .bind(username)
        .bind(secret)
        .bind(is_default)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(row)
}

pub async fn find_by_registry(
    pool: &SqlitePool,
    registry_url: &str,
) -> Result<Option<RegistryCredential>> {
    let sql = format!("SELECT {COLUMNS} FROM registry_credentials WHERE registry_url = ?");
    let row = sqlx::query_as::<_, RegistryCredential>(&sql)
        .bind(registry_url)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// The default credential, if one is marked.
pub async fn find_default(pool: &SqlitePool) -> Result<Option<RegistryCredential>> {
    let sql = format!("SELECT {COLUMNS} FROM registry_credentials WHERE is_default = 1 LIMIT 1");
    let row = sqlx::query_as::<_, RegistryCredential>(&sql)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<RegistryCredential>> {
    let sql = format!("SELECT {COLUMNS} FROM registry_credentials ORDER BY registry_url");
    let rows = sqlx::query_as::<_, RegistryCredential>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Remove a credential. Removing the default promotes no other row.
pub async fn delete(pool: &SqlitePool, registry_url: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM registry_credentials WHERE registry_url = ?")
        .bind(registry_url)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Mark one stored credential as the default, clearing the previous one.
pub async fn set_default(pool: &SqlitePool, registry_url: &str) -> Result<bool> {
    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE registry_credentials SET is_default = 0")
        .execute(&mut *tx)
        .await?;
    let result = sqlx::query("UPDATE registry_credentials SET is_default = 1 WHERE registry_url = ?")
        .bind(registry_url)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}
