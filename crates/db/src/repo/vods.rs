use sqlx::{SqliteConnection, SqlitePool};
use vodsync_core::play::PlaySources;
use vodsync_core::record::StagedRecord;

use crate::DbError;

const VOD_COLUMNS: &str = "vod_id, unique_id, source_id, name, name_en, year, type_id, pic, \
     remarks, play_from, play_url, actor, director, blurb, area, lang, class, time_ts, hits";

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct VodRow {
    pub vod_id: i64,
    pub unique_id: String,
    pub source_id: i64,
    pub name: String,
    pub name_en: String,
    pub year: String,
    pub type_id: i64,
    pub pic: String,
    pub remarks: String,
    pub play_from: String,
    pub play_url: String,
    pub actor: String,
    pub director: String,
    pub blurb: String,
    pub area: String,
    pub lang: String,
    pub class: String,
    pub time_ts: i64,
    pub hits: i64,
}

impl VodRow {
    /// Stored play sources. Stored labels are never empty, so no default
    /// label is needed.
    pub fn play_sources(&self) -> Result<PlaySources, DbError> {
        PlaySources::parse(&self.play_from, &self.play_url, "")
            .map_err(|e| DbError::Corrupt(format!("vod {}: {e}", self.vod_id)))
    }
}

/// Fields a detail fetch may refresh on an existing record.
#[derive(Debug, Clone, Default)]
pub struct DetailFields {
    pub name_en: String,
    pub pic: String,
    pub actor: String,
    pub director: String,
    pub blurb: String,
    pub area: String,
    pub lang: String,
}

pub async fn get_by_unique_id(
    conn: &mut SqliteConnection,
    unique_id: &str,
) -> Result<Option<VodRow>, sqlx::Error> {
    let query = format!("SELECT {VOD_COLUMNS} FROM vod WHERE unique_id = ?");
    sqlx::query_as(&query)
        .bind(unique_id)
        .fetch_optional(conn)
        .await
}

pub async fn get_by_id(
    conn: &mut SqliteConnection,
    vod_id: i64,
) -> Result<Option<VodRow>, sqlx::Error> {
    let query = format!("SELECT {VOD_COLUMNS} FROM vod WHERE vod_id = ?");
    sqlx::query_as(&query)
        .bind(vod_id)
        .fetch_optional(conn)
        .await
}

pub async fn get_many(
    conn: &mut SqliteConnection,
    vod_ids: &[i64],
) -> Result<Vec<VodRow>, sqlx::Error> {
    if vod_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; vod_ids.len()].join(",");
    let query =
        format!("SELECT {VOD_COLUMNS} FROM vod WHERE vod_id IN ({placeholders}) ORDER BY vod_id");
    let mut q = sqlx::query_as(&query);
    for id in vod_ids {
        q = q.bind(*id);
    }
    q.fetch_all(conn).await
}

pub async fn list_all(pool: &SqlitePool) -> Result<Vec<VodRow>, sqlx::Error> {
    let query = format!("SELECT {VOD_COLUMNS} FROM vod ORDER BY vod_id");
    sqlx::query_as(&query).fetch_all(pool).await
}

/// `(vod_id, name, year)` of every record, in id order.
pub async fn list_group_keys(pool: &SqlitePool) -> Result<Vec<(i64, String, String)>, sqlx::Error> {
    sqlx::query_as("SELECT vod_id, name, year FROM vod ORDER BY vod_id")
        .fetch_all(pool)
        .await
}

pub async fn list_unique_ids_for_source(
    pool: &SqlitePool,
    source_id: i64,
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT unique_id FROM vod WHERE source_id = ? ORDER BY vod_id")
            .bind(source_id)
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

pub async fn count(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vod")
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn insert(conn: &mut SqliteConnection, rec: &StagedRecord) -> Result<i64, sqlx::Error> {
    let (play_from, play_url) = rec.play.join();
    let result = sqlx::query(
        "INSERT INTO vod (unique_id, source_id, name, name_en, year, type_id, pic, remarks, \
         play_from, play_url, actor, director, blurb, area, lang, class, time_ts, hits) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&rec.unique_id)
    .bind(rec.source_id)
    .bind(&rec.name)
    .bind(&rec.name_en)
    .bind(&rec.year)
    .bind(rec.type_id)
    .bind(&rec.pic)
    .bind(&rec.remarks)
    .bind(&play_from)
    .bind(&play_url)
    .bind(&rec.actor)
    .bind(&rec.director)
    .bind(&rec.blurb)
    .bind(&rec.area)
    .bind(&rec.lang)
    .bind(&rec.class)
    .bind(rec.time_ts)
    .bind(rec.hits)
    .execute(&mut *conn)
    .await?;

    let vod_id = result.last_insert_rowid();
    upsert_search(conn, vod_id, &rec.search_text()).await?;
    Ok(vod_id)
}

/// Overwrite every field of an existing record. `play` is the already
/// combined play sequence; the numeric id is kept.
pub async fn overwrite(
    conn: &mut SqliteConnection,
    vod_id: i64,
    rec: &StagedRecord,
    play: &PlaySources,
) -> Result<(), sqlx::Error> {
    let (play_from, play_url) = play.join();
    sqlx::query(
        "UPDATE vod SET source_id = ?, name = ?, name_en = ?, year = ?, type_id = ?, pic = ?, \
         remarks = ?, play_from = ?, play_url = ?, actor = ?, director = ?, blurb = ?, \
         area = ?, lang = ?, class = ?, time_ts = ?, hits = ? WHERE vod_id = ?",
    )
    .bind(rec.source_id)
    .bind(&rec.name)
    .bind(&rec.name_en)
    .bind(&rec.year)
    .bind(rec.type_id)
    .bind(&rec.pic)
    .bind(&rec.remarks)
    .bind(&play_from)
    .bind(&play_url)
    .bind(&rec.actor)
    .bind(&rec.director)
    .bind(&rec.blurb)
    .bind(&rec.area)
    .bind(&rec.lang)
    .bind(&rec.class)
    .bind(rec.time_ts)
    .bind(rec.hits)
    .bind(vod_id)
    .execute(&mut *conn)
    .await?;

    upsert_search(conn, vod_id, &rec.search_text()).await
}

pub async fn update_details(
    conn: &mut SqliteConnection,
    vod_id: i64,
    fields: &DetailFields,
    play: &PlaySources,
    search_text: &str,
) -> Result<(), sqlx::Error> {
    let (play_from, play_url) = play.join();
    sqlx::query(
        "UPDATE vod SET name_en = ?, pic = ?, actor = ?, director = ?, blurb = ?, area = ?, \
         lang = ?, play_from = ?, play_url = ? WHERE vod_id = ?",
    )
    .bind(&fields.name_en)
    .bind(&fields.pic)
    .bind(&fields.actor)
    .bind(&fields.director)
    .bind(&fields.blurb)
    .bind(&fields.area)
    .bind(&fields.lang)
    .bind(&play_from)
    .bind(&play_url)
    .bind(vod_id)
    .execute(&mut *conn)
    .await?;

    upsert_search(conn, vod_id, search_text).await
}

pub async fn set_play(
    conn: &mut SqliteConnection,
    vod_id: i64,
    play: &PlaySources,
) -> Result<(), sqlx::Error> {
    let (play_from, play_url) = play.join();
    sqlx::query("UPDATE vod SET play_from = ?, play_url = ? WHERE vod_id = ?")
        .bind(&play_from)
        .bind(&play_url)
        .bind(vod_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Delete records together with their search rows.
pub async fn delete_many(conn: &mut SqliteConnection, vod_ids: &[i64]) -> Result<u64, sqlx::Error> {
    if vod_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; vod_ids.len()].join(",");

    let search = format!("DELETE FROM vod_search WHERE vod_id IN ({placeholders})");
    let mut q = sqlx::query(&search);
    for id in vod_ids {
        q = q.bind(*id);
    }
    q.execute(&mut *conn).await?;

    let vods = format!("DELETE FROM vod WHERE vod_id IN ({placeholders})");
    let mut q = sqlx::query(&vods);
    for id in vod_ids {
        q = q.bind(*id);
    }
    Ok(q.execute(&mut *conn).await?.rows_affected())
}

async fn upsert_search(
    conn: &mut SqliteConnection,
    vod_id: i64,
    search_text: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO vod_search (vod_id, search_text) VALUES (?, ?) \
         ON CONFLICT(vod_id) DO UPDATE SET search_text = excluded.search_text",
    )
    .bind(vod_id)
    .bind(search_text)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn search_text(pool: &SqlitePool, vod_id: i64) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT search_text FROM vod_search WHERE vod_id = ?")
        .bind(vod_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(t,)| t))
}

// ─── Invariant checks ────────────────────────────────────────────────────────

/// Unique ids stored more than once, with their counts.
pub async fn duplicate_unique_ids(pool: &SqlitePool) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT unique_id, COUNT(*) AS n FROM vod GROUP BY unique_id HAVING n > 1 ORDER BY unique_id",
    )
    .fetch_all(pool)
    .await
}

/// Records whose type id is not part of the local taxonomy.
pub async fn unknown_type_ids(pool: &SqlitePool) -> Result<Vec<(i64, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT vod_id, type_id FROM vod \
         WHERE type_id NOT IN (SELECT type_id FROM vod_type) ORDER BY vod_id",
    )
    .fetch_all(pool)
    .await
}

/// `(vod_id, play_from, play_url)` of every record.
pub async fn list_play_columns(pool: &SqlitePool) -> Result<Vec<(i64, String, String)>, sqlx::Error> {
    sqlx::query_as("SELECT vod_id, play_from, play_url FROM vod ORDER BY vod_id")
        .fetch_all(pool)
        .await
}
