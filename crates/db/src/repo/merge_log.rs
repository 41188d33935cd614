use sqlx::{SqliteConnection, SqlitePool};

use crate::DbError;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MergeLogRow {
    pub merge_id: i64,
    pub merge_key: String,
    pub canonical_id: i64,
    pub canonical_unique_id: String,
    /// JSON array of member vod ids, canonical included.
    pub member_ids: String,
    /// JSON array of member unique ids, canonical included.
    pub member_unique_ids: String,
    pub play_from: String,
    pub merged_ts: i64,
}

impl MergeLogRow {
    pub fn members(&self) -> Result<Vec<i64>, DbError> {
        serde_json::from_str(&self.member_ids)
            .map_err(|e| DbError::Corrupt(format!("merge_log {} member_ids: {e}", self.merge_id)))
    }
}

#[derive(Debug, Clone)]
pub struct NewMergeLog<'a> {
    pub merge_key: &'a str,
    pub canonical_id: i64,
    pub canonical_unique_id: &'a str,
    pub member_ids: &'a [i64],
    pub member_unique_ids: &'a [String],
    pub play_from: &'a str,
}

pub async fn insert(conn: &mut SqliteConnection, entry: &NewMergeLog<'_>) -> Result<i64, sqlx::Error> {
    let now = chrono::Utc::now().timestamp();
    let member_ids = serde_json::to_string(entry.member_ids).unwrap_or_else(|_| "[]".into());
    let member_unique_ids =
        serde_json::to_string(entry.member_unique_ids).unwrap_or_else(|_| "[]".into());

    let result = sqlx::query(
        "INSERT INTO merge_log (merge_key, canonical_id, canonical_unique_id, member_ids, \
         member_unique_ids, play_from, merged_ts) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.merge_key)
    .bind(entry.canonical_id)
    .bind(entry.canonical_unique_id)
    .bind(&member_ids)
    .bind(&member_unique_ids)
    .bind(entry.play_from)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn for_canonical(
    pool: &SqlitePool,
    canonical_id: i64,
) -> Result<Vec<MergeLogRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT merge_id, merge_key, canonical_id, canonical_unique_id, member_ids, \
         member_unique_ids, play_from, merged_ts FROM merge_log \
         WHERE canonical_id = ? ORDER BY merge_id",
    )
    .bind(canonical_id)
    .fetch_all(pool)
    .await
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<MergeLogRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT merge_id, merge_key, canonical_id, canonical_unique_id, member_ids, \
         member_unique_ids, play_from, merged_ts FROM merge_log ORDER BY merge_id",
    )
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM merge_log")
        .fetch_one(pool)
        .await?;
    Ok(n)
}
