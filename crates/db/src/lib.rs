pub mod migrate;
pub mod repo;
pub mod snapshot;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{ConnectOptions, SqliteConnection, SqlitePool};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Open a read-write pool on a snapshot file.
///
/// Snapshots use a rollback journal rather than WAL: once the pool is closed
/// the file is self-contained and can be renamed into place.
pub async fn connect(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let opts = SqliteConnectOptions::from_str(db_path)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .synchronous(SqliteSynchronous::Full)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await?;

    Ok(pool)
}

fn read_only_options(db_path: &Path) -> SqliteConnectOptions {
    // Published snapshots are never written in place, only replaced by rename.
    SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .immutable(true)
}

/// Open a read-only pool on a published snapshot.
pub async fn connect_read_only(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(read_only_options(db_path))
        .await
}

/// Open a single read-only connection on a published snapshot. The
/// connection keeps reading the file it opened even after a newer snapshot
/// has been renamed over the same path.
pub async fn open_read_only(db_path: &Path) -> Result<SqliteConnection, sqlx::Error> {
    read_only_options(db_path).connect().await
}
