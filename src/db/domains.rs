use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::Domain;
use crate::errors::Result;

const COLUMNS: &str = "id, app_name, hostname, base_domain, path, ssl_enabled, created_at";

/// Insert a domain row. Uniqueness of `hostname` is enforced by the schema;
/// callers check ownership first to produce a typed error.
pub async fn insert(
    pool: &SqlitePool,
    app_name: &str,
    hostname: &str,
    base_domain: &str,
    path: &str,
    ssl_enabled: bool,
) -> Result<Domain> {
    let sql = format!(
        "INSERT INTO domains (app_name, hostname, base_domain, path, ssl_enabled, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING {COLUMNS}"
    );
    let row = sqlx::query_as::<_, Domain>(&sql)
        .bind(app_name)
        .bind(hostname)
        .bind(base_domain)
        .bind(path)
        .bind(ssl_enabled)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn find_by_hostname(pool: &SqlitePool, hostname: &str) -> Result<Option<Domain>> {
    let sql = format!("SELECT {COLUMNS} FROM domains WHERE hostname = ?");
    let row = sqlx::query_as::<_, Domain>(&sql)
        .bind(hostname)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_for_app(pool: &SqlitePool, app_name: &str) -> Result<Vec<Domain>> {
    let sql = format!("SELECT {COLUMNS} FROM domains WHERE app_name = ? ORDER BY hostname");
    let rows = sqlx::query_as::<_, Domain>(&sql)
        .bind(app_name)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_by_base(pool: &SqlitePool, base_domain: &str) -> Result<Vec<Domain>> {
    let sql = format!("SELECT {COLUMNS} FROM domains WHERE base_domain = ? ORDER BY hostname");
    let rows = sqlx::query_as::<_, Domain>(&sql)
        .bind(base_domain)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<Domain>> {
    let sql = format!("SELECT {COLUMNS} FROM domains ORDER BY base_domain, hostname");
    let rows = sqlx::query_as::<_, Domain>(&sql).fetch_all(pool).await?;
    Ok(rows)
}

/// Distinct base domains with at least one hostname.
pub async fn list_bases(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT base_domain FROM domains ORDER BY base_domain")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(base,)| base).collect())
}

/// Delete one hostname owned by an app. Idempotent.
pub async fn delete(pool: &SqlitePool, app_name: &str, hostname: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM domains WHERE app_name = ? AND hostname = ?")
        .bind(app_name)
        .bind(hostname)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove every domain row for an app inside the caller's transaction.
pub async fn delete_for_app(conn: &mut SqliteConnection, app_name: &str) -> Result<()> {
    sqlx::query("DELETE FROM domains WHERE app_name = ?")
        .bind(app_name)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
