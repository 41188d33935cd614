//! Snapshot files of one catalog.
//!
//! A catalog named `vod` in `data_dir` lives in `vod.db` (serving), is built
//! in `vod.staging.db` and keeps one previous generation in `vod.backup.db`.
//! Serving is only ever replaced by `rename`, so a reader sees either the old
//! file or the new one.

use std::io;
use std::path::{Path, PathBuf};

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("snapshot database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("no backup snapshot at {0}")]
    NoBackup(PathBuf),
}

impl SwapError {
    fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> SwapError + 'a {
        move |source| SwapError::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An open staging snapshot. Only the run that prepared it writes to it.
#[derive(Debug)]
pub struct Staging {
    pool: SqlitePool,
    path: PathBuf,
}

impl Staging {
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SwapResult {
    pub serving: PathBuf,
    /// Where the replaced serving file went, if there was one.
    pub backup: Option<PathBuf>,
    pub swapped_ts: i64,
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    data_dir: PathBuf,
    name: String,
}

impl SnapshotStore {
    pub fn new(data_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            name: name.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn serving_path(&self) -> PathBuf {
        self.file("db")
    }

    pub fn staging_path(&self) -> PathBuf {
        self.file("staging.db")
    }

    pub fn backup_path(&self) -> PathBuf {
        self.file("backup.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.file("lock")
    }

    fn file(&self, suffix: &str) -> PathBuf {
        self.data_dir.join(format!("{}.{suffix}", self.name))
    }

    pub fn has_serving(&self) -> bool {
        self.serving_path().exists()
    }

    pub fn has_backup(&self) -> bool {
        self.backup_path().exists()
    }

    /// Build a fresh staging snapshot from the current serving one.
    ///
    /// A staging file left behind by an aborted run is removed first: its
    /// content was never published and is not resumed.
    pub async fn prepare_staging(&self) -> Result<Staging, SwapError> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(SwapError::io("create", &self.data_dir))?;

        let staging = self.staging_path();
        if remove_snapshot_files(&staging).await? {
            warn!(path = %staging.display(), "discarded leftover staging snapshot");
        }

        let serving = self.serving_path();
        if serving.exists() {
            tokio::fs::copy(&serving, &staging)
                .await
                .map_err(SwapError::io("copy", &serving))?;
        }

        let pool = crate::connect(&staging.to_string_lossy()).await?;
        crate::migrate::run(&pool).await?;

        info!(path = %staging.display(), from_serving = serving.exists(), "staging snapshot prepared");
        Ok(Staging {
            pool,
            path: staging,
        })
    }

    /// Drop a staging snapshot without publishing it.
    pub async fn discard(&self, staging: Staging) -> Result<(), SwapError> {
        staging.pool.close().await;
        remove_snapshot_files(&staging.path).await?;
        info!(path = %staging.path.display(), "staging snapshot discarded");
        Ok(())
    }

    /// Promote `staging` to serving, keeping the replaced serving file as the
    /// backup. If any step fails, serving is still the previous file.
    pub async fn swap(&self, staging: Staging) -> Result<SwapResult, SwapError> {
        let Staging { pool, path } = staging;
        pool.close().await;

        let serving = self.serving_path();
        let backup = if serving.exists() {
            self.retain(&serving, &self.backup_path(), "backup.tmp").await?;
            Some(self.backup_path())
        } else {
            None
        };

        tokio::fs::rename(&path, &serving)
            .await
            .map_err(SwapError::io("rename", &path))?;

        info!(serving = %serving.display(), "snapshot published");
        Ok(SwapResult {
            serving,
            backup,
            swapped_ts: chrono::Utc::now().timestamp(),
        })
    }

    /// Swap the backup back into serving. The replaced serving file becomes
    /// the new backup, so a second restore undoes the first.
    pub async fn restore(&self) -> Result<SwapResult, SwapError> {
        let backup = self.backup_path();
        if !backup.exists() {
            return Err(SwapError::NoBackup(backup));
        }

        let serving = self.serving_path();
        let parked = self.file("restore.tmp");
        let had_serving = serving.exists();
        if had_serving {
            link_or_copy(&serving, &parked).await?;
        }

        tokio::fs::rename(&backup, &serving)
            .await
            .map_err(SwapError::io("rename", &backup))?;

        if had_serving {
            tokio::fs::rename(&parked, &backup)
                .await
                .map_err(SwapError::io("rename", &parked))?;
        }

        info!(serving = %serving.display(), "backup snapshot restored");
        Ok(SwapResult {
            serving,
            backup: had_serving.then_some(backup),
            swapped_ts: chrono::Utc::now().timestamp(),
        })
    }

    /// Read-only pool on the published snapshot.
    pub async fn open_serving(&self) -> Result<SqlitePool, SwapError> {
        Ok(crate::connect_read_only(&self.serving_path()).await?)
    }

    /// Single read-only connection on the published snapshot. It keeps
    /// reading the generation it opened across later swaps.
    pub async fn open_serving_connection(&self) -> Result<SqliteConnection, SwapError> {
        Ok(crate::open_read_only(&self.serving_path()).await?)
    }

    /// Make `dest` refer to the current content of `src` without touching
    /// `src`. `tmp_suffix` names the intermediate file.
    async fn retain(&self, src: &Path, dest: &Path, tmp_suffix: &str) -> Result<(), SwapError> {
        let tmp = self.file(tmp_suffix);
        link_or_copy(src, &tmp).await?;
        tokio::fs::rename(&tmp, dest)
            .await
            .map_err(SwapError::io("rename", &tmp))
    }
}

async fn link_or_copy(src: &Path, dest: &Path) -> Result<(), SwapError> {
    remove_if_exists(dest).await?;
    if let Err(e) = tokio::fs::hard_link(src, dest).await {
        warn!(error = %e, path = %src.display(), "hard link failed, copying instead");
        tokio::fs::copy(src, dest)
            .await
            .map_err(SwapError::io("copy", src))?;
    }
    Ok(())
}

/// Remove a snapshot file and its SQLite side files. Returns whether the
/// main file existed.
async fn remove_snapshot_files(path: &Path) -> Result<bool, SwapError> {
    let existed = remove_if_exists(path).await?;
    for side in ["-journal", "-wal", "-shm"] {
        let mut p = path.as_os_str().to_owned();
        p.push(side);
        remove_if_exists(Path::new(&p)).await?;
    }
    Ok(existed)
}

async fn remove_if_exists(path: &Path) -> Result<bool, SwapError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SwapError::Io {
            op: "remove",
            path: path.to_path_buf(),
            source: e,
        }),
    }
}
