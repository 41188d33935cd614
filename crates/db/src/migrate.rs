use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_catalog_schema",
        include_str!("../migrations/001_catalog_schema.sql"),
    ),
    (
        "002_vod_alias",
        include_str!("../migrations/002_vod_alias.sql"),
    ),
];

/// Run forward-only migrations. Tracks applied migrations in a `_migrations` table.
///
/// Snapshots are copied file-to-file, so a staging copy carries the migration
/// state of the serving snapshot it came from.
pub async fn run(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_ts INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<(String,)> =
            sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                .bind(name)
                .fetch_optional(pool)
                .await?;

        if applied.is_some() {
            continue;
        }

        info!(migration = name, "applying migration");
        let mut tx = pool.begin().await?;
        for statement in sql.split(';') {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(&mut *tx).await?;
        }

        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO _migrations (name, applied_ts) VALUES (?, ?)")
            .bind(name)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(migration = name, "migration applied");
    }

    Ok(())
}
