//! Unique ids that a merge folded into another record.
//!
//! A source keeps listing the records it owns even after they were merged
//! away. Ingest looks those ids up here and updates the record that absorbed
//! them instead of inserting them again.

use sqlx::{SqliteConnection, SqlitePool};

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct AliasRow {
    pub unique_id: String,
    pub vod_id: i64,
    pub merge_id: i64,
    /// JSON array of the play labels this id contributed.
    pub labels: String,
}

impl AliasRow {
    pub fn labels(&self) -> Result<Vec<String>, DbError> {
        serde_json::from_str(&self.labels)
            .map_err(|e| DbError::Corrupt(format!("alias {} labels: {e}", self.unique_id)))
    }
}

pub async fn get(
    conn: &mut SqliteConnection,
    unique_id: &str,
) -> Result<Option<AliasRow>, sqlx::Error> {
    sqlx::query_as("SELECT unique_id, vod_id, merge_id, labels FROM vod_alias WHERE unique_id = ?")
        .bind(unique_id)
        .fetch_optional(conn)
        .await
}

pub async fn for_vod(
    conn: &mut SqliteConnection,
    vod_id: i64,
) -> Result<Vec<AliasRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT unique_id, vod_id, merge_id, labels FROM vod_alias \
         WHERE vod_id = ? ORDER BY unique_id",
    )
    .bind(vod_id)
    .fetch_all(conn)
    .await
}

/// Point `unique_id` at `vod_id`, replacing any earlier alias.
pub async fn upsert(
    conn: &mut SqliteConnection,
    unique_id: &str,
    vod_id: i64,
    merge_id: i64,
    labels: &[String],
) -> Result<(), sqlx::Error> {
    let labels = serde_json::to_string(labels).unwrap_or_else(|_| "[]".into());
    sqlx::query(
        "INSERT INTO vod_alias (unique_id, vod_id, merge_id, labels) VALUES (?, ?, ?, ?) \
         ON CONFLICT(unique_id) DO UPDATE SET vod_id = excluded.vod_id, \
         merge_id = excluded.merge_id, labels = excluded.labels",
    )
    .bind(unique_id)
    .bind(vod_id)
    .bind(merge_id)
    .bind(&labels)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn set_labels(
    conn: &mut SqliteConnection,
    unique_id: &str,
    labels: &[String],
) -> Result<(), sqlx::Error> {
    let labels = serde_json::to_string(labels).unwrap_or_else(|_| "[]".into());
    sqlx::query("UPDATE vod_alias SET labels = ? WHERE unique_id = ?")
        .bind(&labels)
        .bind(unique_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vod_alias")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

/// Aliases whose target record no longer exists, or whose unique id is also
/// stored as a record of its own.
pub async fn dangling(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT unique_id, vod_id FROM vod_alias \
         WHERE vod_id NOT IN (SELECT vod_id FROM vod) \
            OR unique_id IN (SELECT unique_id FROM vod) \
         ORDER BY unique_id",
    )
    .fetch_all(pool)
    .await
}
