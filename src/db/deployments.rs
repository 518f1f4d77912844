use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{Release, ReleaseStatus};
use crate::errors::Result;

/// Image tag written by CI/CD placeholder rewrites. Rows carrying it are
/// never matched during tag-based lookup.
pub const CICD_TAG_PLACEHOLDER: &str = "${IMAGE_TAG}";

const COLUMNS: &str = "id, app_id, version, image, image_tag, image_hash, config_json, \
                       config_hash, status, rollback_to_version, deployed_at, completed_at, \
                       error_message";

/// Insert a new release row and return it with its assigned id.
pub async fn insert(pool: &SqlitePool, release: &Release) -> Result<Release> {
    let sql = format!(
        "INSERT INTO deployments (app_id, version, image, image_tag, image_hash, config_json, \
         config_hash, status, rollback_to_version, deployed_at, completed_at, error_message) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {COLUMNS}"
    );
    let row = sqlx::query_as::<_, Release>(&sql)
        .bind(release.app_id)
        .bind(&release.version)
        .bind(&release.image)
        .bind(&release.image_tag)
        .bind(&release.image_hash)
        .bind(&release.config_json)
        .bind(&release.config_hash)
        .bind(release.status)
        .bind(release.rollback_to_version.as_deref())
        .bind(release.deployed_at)
        .bind(release.completed_at)
        .bind(release.error_message.as_deref())
        .fetch_one(pool)
        .await?;
    Ok(row)
}

/// Number of rows still pending for an app.
pub async fn count_pending(pool: &SqlitePool, app_id: i64) -> Result<i64> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM deployments WHERE app_id = ? AND status = 'pending'",
    )
    .bind(app_id)
    .fetch_one(pool)
    .await?;
    Ok(count.0)
}

/// Flip a pending row to a terminal status, stamping `completed_at`.
///
/// The `status = 'pending'` guard keeps terminal rows immutable.
pub async fn update_status(
    pool: &SqlitePool,
    app_id: i64,
    version: &str,
    status: ReleaseStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let completed_at: DateTime<Utc> = Utc::now();
    sqlx::query(
        "UPDATE deployments SET status = ?, completed_at = ?, error_message = ? \
         WHERE app_id = ? AND version = ? AND status = 'pending'",
    )
    .bind(status)
    .bind(completed_at)
    .bind(error_message)
    .bind(app_id)
    .bind(version)
    .execute(pool)
    .await?;
    Ok(())
}

/// Most recent successful release for an app.
pub async fn latest_success(pool: &SqlitePool, app_id: i64) -> Result<Option<Release>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM deployments WHERE app_id = ? AND status = 'success' \
         ORDER BY deployed_at DESC, id DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, Release>(&sql)
        .bind(app_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Most recent release for an app regardless of status.
pub async fn latest(pool: &SqlitePool, app_id: i64) -> Result<Option<Release>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM deployments WHERE app_id = ? \
         ORDER BY deployed_at DESC, id DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, Release>(&sql)
        .bind(app_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Resolve an identifier against version labels and image tags, most recent
/// candidate first. CI placeholder tags are excluded from tag matching.
pub async fn find_by_identifier(
    pool: &SqlitePool,
    app_id: i64,
    identifier: &str,
) -> Result<Option<Release>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM deployments WHERE app_id = ? \
         AND (version = ? OR (image_tag = ? AND image_tag != ?)) \
         ORDER BY deployed_at DESC, id DESC LIMIT 1"
    );
    let row = sqlx::query_as::<_, Release>(&sql)
        .bind(app_id)
        .bind(identifier)
        .bind(identifier)
        .bind(CICD_TAG_PLACEHOLDER)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// Release history, newest first.
pub async fn list(pool: &SqlitePool, app_id: i64, limit: i64) -> Result<Vec<Release>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM deployments WHERE app_id = ? \
         ORDER BY deployed_at DESC, id DESC LIMIT ?"
    );
    let rows = sqlx::query_as::<_, Release>(&sql)
        .bind(app_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Remove every release row for an app. Runs inside the caller's
/// delete-app transaction.
pub async fn delete_for_app(conn: &mut SqliteConnection, app_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM deployments WHERE app_id = ?")
        .bind(app_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM apps WHERE id = ?")
        .bind(app_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}
