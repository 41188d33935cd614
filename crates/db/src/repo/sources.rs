use sqlx::SqlitePool;
use vodsync_core::error::ConfigError;
use vodsync_core::mapping::CategoryMapping;
use vodsync_core::types::{OperationMode, ResponseFormat, Source, Taxonomy};

#[derive(Debug, Clone)]
pub struct SourceRow {
    pub id: i64,
    pub name: String,
    pub id_prefix: String,
    pub api_url: String,
    pub data_format: String,
    pub operation_mode: String,
}

#[derive(Debug, Clone)]
pub struct NewSource<'a> {
    pub name: &'a str,
    pub id_prefix: &'a str,
    pub api_url: &'a str,
    pub data_format: &'a str,
    pub operation_mode: &'a str,
}

pub async fn create_source(pool: &SqlitePool, new: &NewSource<'_>) -> Result<i64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO source (name, id_prefix, api_url, data_format, operation_mode) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(new.name)
    .bind(new.id_prefix)
    .bind(new.api_url)
    .bind(new.data_format)
    .bind(new.operation_mode)
    .execute(pool)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_sources(pool: &SqlitePool) -> Result<Vec<SourceRow>, sqlx::Error> {
    let rows: Vec<(i64, String, String, String, String, String)> = sqlx::query_as(
        "SELECT source_id, name, id_prefix, api_url, data_format, operation_mode \
         FROM source ORDER BY source_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(row_to_source).collect())
}

pub async fn find_by_prefix(
    pool: &SqlitePool,
    id_prefix: &str,
) -> Result<Option<SourceRow>, sqlx::Error> {
    let row: Option<(i64, String, String, String, String, String)> = sqlx::query_as(
        "SELECT source_id, name, id_prefix, api_url, data_format, operation_mode \
         FROM source WHERE id_prefix = ?",
    )
    .bind(id_prefix)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(row_to_source))
}

/// Replace a source's mapping with `pairs`, keeping their order.
pub async fn set_mapping(
    pool: &SqlitePool,
    source_id: i64,
    pairs: &[(&str, i64)],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM source_category_map WHERE source_id = ?")
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    for (position, (remote, local)) in pairs.iter().enumerate() {
        sqlx::query(
            "INSERT INTO source_category_map (source_id, position, remote_type_id, local_type_id) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(source_id)
        .bind(position as i64)
        .bind(*remote)
        .bind(*local)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn get_mapping(
    pool: &SqlitePool,
    source_id: i64,
) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as(
        "SELECT remote_type_id, local_type_id FROM source_category_map \
         WHERE source_id = ? ORDER BY position",
    )
    .bind(source_id)
    .fetch_all(pool)
    .await
}

/// Turn a stored source into a runnable [`Source`]. An empty mapping is a
/// configuration error: the source must not ingest anything.
pub fn resolve(
    row: &SourceRow,
    pairs: Vec<(String, i64)>,
    taxonomy: &Taxonomy,
) -> Result<Source, ConfigError> {
    if pairs.is_empty() {
        return Err(ConfigError::EmptyMapping {
            source_name: row.name.clone(),
        });
    }

    let format: ResponseFormat = row.data_format.parse()?;
    let mode: OperationMode = row.operation_mode.parse()?;
    let mapping = CategoryMapping::new(pairs, taxonomy)?;

    Ok(Source {
        id: row.id,
        name: row.name.clone(),
        id_prefix: row.id_prefix.clone(),
        api_url: row.api_url.clone(),
        format,
        mode,
        mapping,
    })
}

fn row_to_source(r: (i64, String, String, String, String, String)) -> SourceRow {
    SourceRow {
        id: r.0,
        name: r.1,
        id_prefix: r.2,
        api_url: r.3,
        data_format: r.4,
        operation_mode: r.5,
    }
}
