pub mod details;
pub mod ingest;
pub mod merge;
pub mod publish;

use vodsync_db::DbError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Stored(#[from] DbError),
}

#[cfg(test)]
pub(crate) mod testutil {
    use sqlx::SqlitePool;
    use vodsync_core::play::PlaySources;
    use vodsync_core::record::StagedRecord;
    use vodsync_db::repo::{sources, taxonomy};

    /// Migrated in-memory catalog with local types 1 and 2 and two sources:
    /// id 1 "W" (`wj_`) and id 2 "M" (`mt_`).
    pub async fn pool() -> SqlitePool {
        let pool = vodsync_db::connect(":memory:").await.unwrap();
        vodsync_db::migrate::run(&pool).await.unwrap();
        taxonomy::insert_type(&pool, 1, "电影", 0).await.unwrap();
        taxonomy::insert_type(&pool, 2, "电视剧", 0).await.unwrap();
        for (name, prefix) in [("W", "wj_"), ("M", "mt_")] {
            sources::create_source(
                &pool,
                &sources::NewSource {
                    name,
                    id_prefix: prefix,
                    api_url: "http://example.invalid/api",
                    data_format: "json",
                    operation_mode: "add_update",
                },
            )
            .await
            .unwrap();
        }
        pool
    }

    pub fn staged(unique_id: &str, name: &str, play_from: &str, play_url: &str) -> StagedRecord {
        let source_id = if unique_id.starts_with("mt_") { 2 } else { 1 };
        StagedRecord {
            unique_id: unique_id.into(),
            source_id,
            name: name.into(),
            name_en: String::new(),
            year: "2004".into(),
            type_id: 1,
            pic: String::new(),
            remarks: String::new(),
            play: PlaySources::parse(play_from, play_url, "").unwrap(),
            actor: String::new(),
            director: String::new(),
            blurb: String::new(),
            area: String::new(),
            lang: String::new(),
            class: String::new(),
            time_ts: 1_700_000_000,
            hits: 0,
        }
    }
}
