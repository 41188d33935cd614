use sqlx::SqlitePool;
use vodsync_core::types::{LocalType, Taxonomy};

pub async fn list_types(pool: &SqlitePool) -> Result<Vec<LocalType>, sqlx::Error> {
    let rows: Vec<(i64, String, i64)> =
        sqlx::query_as("SELECT type_id, type_name, type_pid FROM vod_type ORDER BY type_id")
            .fetch_all(pool)
            .await?;

    Ok(rows
        .into_iter()
        .map(|(type_id, name, parent_id)| LocalType {
            type_id,
            name,
            parent_id,
        })
        .collect())
}

pub async fn load(pool: &SqlitePool) -> Result<Taxonomy, sqlx::Error> {
    Ok(Taxonomy::new(list_types(pool).await?))
}

/// Insert a local category. The taxonomy is owned by configuration tooling;
/// collection runs only read it.
pub async fn insert_type(
    pool: &SqlitePool,
    type_id: i64,
    name: &str,
    parent_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO vod_type (type_id, type_name, type_pid) VALUES (?, ?, ?)")
        .bind(type_id)
        .bind(name)
        .bind(parent_id)
        .execute(pool)
        .await?;
    Ok(())
}
