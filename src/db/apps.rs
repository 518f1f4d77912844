use sqlx::SqlitePool;

use crate::db::models::App;
use crate::errors::Result;

/// Look up an app by its canonical name.
pub async fn find_by_name(pool: &SqlitePool, name: &str) -> Result<Option<App>> {
    let app = sqlx::query_as::<_, App>("SELECT id, name FROM apps WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    Ok(app)
}

/// Fetch an app row, creating it on first deploy.
pub async fn find_or_create(pool: &SqlitePool, name: &str) -> Result<App> {
    sqlx::query("INSERT INTO apps (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(pool)
        .await?;
    let app = sqlx::query_as::<_, App>("SELECT id, name FROM apps WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await?;
    Ok(app)
}

/// Every known app, alphabetically.
pub async fn list(pool: &SqlitePool) -> Result<Vec<App>> {
    let apps = sqlx::query_as::<_, App>("SELECT id, name FROM apps ORDER BY name")
        .fetch_all(pool)
        .await?;
    Ok(apps)
}
