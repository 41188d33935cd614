//! Cross-source deduplication.
//!
//! Records with the same normalized name and year are one logical item. The
//! member with the smallest id survives; every other member's play sources
//! are appended to it in ascending id order and the member is deleted. A
//! label the survivor already has is not appended again and keeps the
//! survivor's block. Each absorbed unique id is kept as an alias of the
//! survivor so later runs update it instead of re-inserting it.
//!
//! Running [`merge`] on an already merged snapshot changes nothing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use vodsync_core::normalize_name;
use vodsync_core::play::PlaySources;
use vodsync_db::repo::merge_log::{self, NewMergeLog};
use vodsync_db::repo::{aliases, sources, vods};
use vodsync_db::snapshot::Staging;
use vodsync_db::{DbError, snapshot::SnapshotStore};

const MAX_LISTED_VIOLATIONS: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Stored(#[from] DbError),
    #[error(transparent)]
    Invariant(#[from] MergeInvariantError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    DuplicateUniqueId { unique_id: String, count: i64 },
    PlayMismatch { vod_id: i64, labels: usize, blocks: usize },
    EmptyPlay { vod_id: i64 },
    UnknownType { vod_id: i64, type_id: i64 },
    DanglingAlias { unique_id: String, vod_id: i64 },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateUniqueId { unique_id, count } => {
                write!(f, "unique id {unique_id} stored {count} times")
            }
            Self::PlayMismatch {
                vod_id,
                labels,
                blocks,
            } => write!(f, "vod {vod_id}: {labels} play labels for {blocks} blocks"),
            Self::EmptyPlay { vod_id } => write!(f, "vod {vod_id}: no play sources"),
            Self::UnknownType { vod_id, type_id } => {
                write!(f, "vod {vod_id}: type {type_id} not in taxonomy")
            }
            Self::DanglingAlias { unique_id, vod_id } => {
                write!(f, "alias {unique_id} points at vod {vod_id}, which is missing or shadowed")
            }
        }
    }
}

/// The consolidated snapshot breaks a catalog invariant and must not be
/// published. At most a fixed number of violations are listed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{total} catalog invariant violation(s), first: {}", first_listed(.violations))]
pub struct MergeInvariantError {
    pub total: usize,
    pub violations: Vec<Violation>,
}

fn first_listed(violations: &[Violation]) -> String {
    violations
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub groups_merged: u64,
    /// Records absorbed into a survivor (and deleted).
    pub records_merged: u64,
    pub merge_log_ids: Vec<i64>,
}

/// Grouping key: normalized name and trimmed year.
pub fn merge_key(name: &str, year: &str) -> (String, String) {
    (normalize_name(name), year.trim().to_string())
}

/// Merge every duplicate group in `pool`. Each group commits on its own.
pub async fn merge(pool: &SqlitePool) -> Result<MergeSummary, MergeError> {
    let mut groups: BTreeMap<(String, String), Vec<i64>> = BTreeMap::new();
    for (vod_id, name, year) in vods::list_group_keys(pool).await? {
        groups.entry(merge_key(&name, &year)).or_default().push(vod_id);
    }

    let source_names: HashMap<i64, String> = sources::list_sources(pool)
        .await?
        .into_iter()
        .map(|s| (s.id, s.name))
        .collect();

    let mut summary = MergeSummary::default();
    for ((name, year), mut ids) in groups {
        if ids.len() < 2 {
            continue;
        }
        ids.sort_unstable();
        let key = format!("{name}|{year}");
        let merge_id = merge_group(pool, &key, &ids, &source_names).await?;
        summary.groups_merged += 1;
        summary.records_merged += (ids.len() - 1) as u64;
        summary.merge_log_ids.push(merge_id);
    }

    info!(
        groups = summary.groups_merged,
        absorbed = summary.records_merged,
        "merge finished"
    );
    Ok(summary)
}

async fn merge_group(
    pool: &SqlitePool,
    key: &str,
    ids: &[i64],
    source_names: &HashMap<i64, String>,
) -> Result<i64, MergeError> {
    let mut tx = pool.begin().await?;
    let rows = vods::get_many(&mut *tx, ids).await?;
    let Some((canonical, members)) = rows.split_first() else {
        return Err(DbError::Corrupt(format!("merge group {key} vanished")).into());
    };

    let default_label = |source_id: i64| {
        source_names
            .get(&source_id)
            .cloned()
            .unwrap_or_else(|| source_id.to_string())
    };

    let mut play = parse_play(canonical, &default_label(canonical.source_id))?;
    let mut contributed = Vec::with_capacity(members.len());
    for member in members {
        let member_play = parse_play(member, &default_label(member.source_id))?;
        contributed.push(play.absorb(&member_play));
    }

    vods::set_play(&mut *tx, canonical.vod_id, &play).await?;
    let absorbed: Vec<i64> = members.iter().map(|m| m.vod_id).collect();
    vods::delete_many(&mut *tx, &absorbed).await?;

    let member_ids: Vec<i64> = rows.iter().map(|r| r.vod_id).collect();
    let member_unique_ids: Vec<String> = rows.iter().map(|r| r.unique_id.clone()).collect();
    let (play_from, _) = play.join();
    let merge_id = merge_log::insert(
        &mut *tx,
        &NewMergeLog {
            merge_key: key,
            canonical_id: canonical.vod_id,
            canonical_unique_id: &canonical.unique_id,
            member_ids: &member_ids,
            member_unique_ids: &member_unique_ids,
            play_from: &play_from,
        },
    )
    .await?;

    for (member, labels) in members.iter().zip(&contributed) {
        // Ids already folded into this member follow it, keeping only the
        // labels that made it onto the survivor.
        for alias in aliases::for_vod(&mut *tx, member.vod_id).await? {
            let kept: Vec<String> = alias
                .labels()?
                .into_iter()
                .filter(|l| labels.contains(l))
                .collect();
            aliases::upsert(&mut *tx, &alias.unique_id, canonical.vod_id, merge_id, &kept).await?;
        }
        aliases::upsert(&mut *tx, &member.unique_id, canonical.vod_id, merge_id, labels).await?;
    }

    tx.commit().await?;
    debug!(key, canonical = canonical.vod_id, absorbed = ?absorbed, play_from = %play_from, "group merged");
    Ok(merge_id)
}

fn parse_play(row: &vods::VodRow, default_label: &str) -> Result<PlaySources, DbError> {
    PlaySources::parse(&row.play_from, &row.play_url, default_label)
        .map_err(|e| DbError::Corrupt(format!("vod {}: {e}", row.vod_id)))
}

/// Check the catalog invariants on `pool`.
pub async fn verify_invariants(pool: &SqlitePool) -> Result<(), MergeError> {
    let mut violations = Vec::new();

    for (unique_id, count) in vods::duplicate_unique_ids(pool).await? {
        violations.push(Violation::DuplicateUniqueId { unique_id, count });
    }
    for (vod_id, play_from, play_url) in vods::list_play_columns(pool).await? {
        match PlaySources::parse(&play_from, &play_url, "") {
            Ok(play) if play.is_empty() => violations.push(Violation::EmptyPlay { vod_id }),
            Ok(_) => {}
            Err(vodsync_core::error::RecordError::PlayMismatch { labels, blocks }) => {
                violations.push(Violation::PlayMismatch {
                    vod_id,
                    labels,
                    blocks,
                })
            }
            Err(_) => violations.push(Violation::EmptyPlay { vod_id }),
        }
    }
    for (vod_id, type_id) in vods::unknown_type_ids(pool).await? {
        violations.push(Violation::UnknownType { vod_id, type_id });
    }
    for (unique_id, vod_id) in aliases::dangling(pool).await? {
        violations.push(Violation::DanglingAlias { unique_id, vod_id });
    }

    if violations.is_empty() {
        return Ok(());
    }

    let total = violations.len();
    violations.truncate(MAX_LISTED_VIOLATIONS);
    warn!(total, "catalog invariants violated");
    Err(MergeInvariantError { total, violations }.into())
}

/// A staging snapshot that has been merged and verified. Only
/// [`consolidate`] creates one, and it is the only thing
/// [`crate::publish::publish`] accepts.
#[derive(Debug)]
pub struct Consolidated {
    pub(crate) staging: Staging,
    summary: MergeSummary,
}

impl Consolidated {
    pub fn summary(&self) -> &MergeSummary {
        &self.summary
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    /// Throw the consolidated snapshot away instead of publishing it.
    pub async fn discard(self, store: &SnapshotStore) -> Result<(), vodsync_db::snapshot::SwapError> {
        store.discard(self.staging).await
    }
}

/// A staging snapshot that failed to consolidate, handed back so the caller
/// can discard it.
#[derive(Debug)]
pub struct NotConsolidated {
    pub staging: Staging,
    pub error: MergeError,
}

/// Merge, then verify. On failure the staging snapshot comes back untouched
/// by any publish.
pub async fn consolidate(staging: Staging) -> Result<Consolidated, NotConsolidated> {
    let merged = async {
        let summary = merge(staging.pool()).await?;
        verify_invariants(staging.pool()).await?;
        Ok::<_, MergeError>(summary)
    }
    .await;

    match merged {
        Ok(summary) => Ok(Consolidated { staging, summary }),
        Err(error) => Err(NotConsolidated { staging, error }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ingest_page;
    use crate::testutil::{pool, staged};
    use vodsync_core::types::OperationMode;

    #[tokio::test]
    async fn duplicates_merge_into_smallest_id() {
        let pool = pool().await;
        ingest_page(
            &pool,
            &[
                staged("wj_1", "功夫", "wj", "正片$http://w/1.m3u8"),
                staged("mt_9", " 功 夫 ", "mt", "正片$http://m/1.m3u8"),
            ],
            OperationMode::AddUpdate,
        )
        .await
        .unwrap();

        let summary = merge(&pool).await.unwrap();
        assert_eq!(summary.groups_merged, 1);
        assert_eq!(summary.records_merged, 1);

        let rows = vods::list_all(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vod_id, 1);
        assert_eq!(rows[0].play_from, "wj$$$mt");
        assert_eq!(rows[0].play_url, "正片$http://w/1.m3u8$$$正片$http://m/1.m3u8");
        assert!(vods::search_text(&pool, 2).await.unwrap().is_none());

        let log = merge_log::for_canonical(&pool, 1).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].members().unwrap(), vec![1, 2]);
        assert_eq!(log[0].merge_key, "功夫|2004");
        assert_eq!(log[0].play_from, "wj$$$mt");
    }

    #[tokio::test]
    async fn merge_is_idempotent() {
        let pool = pool().await;
        ingest_page(
            &pool,
            &[
                staged("wj_1", "Kung Fu", "wj", "a"),
                staged("mt_1", "kung fu", "mt", "b"),
                staged("mt_2", "Other", "mt", "c"),
            ],
            OperationMode::AddUpdate,
        )
        .await
        .unwrap();

        merge(&pool).await.unwrap();
        let before = vods::list_all(&pool).await.unwrap();

        let again = merge(&pool).await.unwrap();
        assert_eq!(again, MergeSummary::default());
        assert_eq!(vods::list_all(&pool).await.unwrap(), before);
        assert_eq!(merge_log::count(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn different_years_stay_apart() {
        let pool = pool().await;
        let mut remake = staged("mt_1", "功夫", "mt", "b");
        remake.year = "2024".into();
        ingest_page(
            &pool,
            &[staged("wj_1", "功夫", "wj", "a"), remake],
            OperationMode::AddUpdate,
        )
        .await
        .unwrap();

        assert_eq!(merge(&pool).await.unwrap().groups_merged, 0);
        assert_eq!(vods::count(&pool).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn shared_label_keeps_survivor_block() {
        let pool = pool().await;
        ingest_page(
            &pool,
            &[
                staged("wj_1", "功夫", "wj$$$hd", "a$$$b"),
                staged("mt_1", "功夫", "hd", "c"),
            ],
            OperationMode::AddUpdate,
        )
        .await
        .unwrap();

        merge(&pool).await.unwrap();
        let rows = vods::list_all(&pool).await.unwrap();
        assert_eq!(rows[0].play_from, "wj$$$hd");
        assert_eq!(rows[0].play_url, "a$$$b");

        let mut conn = pool.acquire().await.unwrap();
        let alias = aliases::get(&mut conn, "mt_1").await.unwrap().unwrap();
        assert_eq!(alias.vod_id, rows[0].vod_id);
        assert!(alias.labels().unwrap().is_empty());
    }

    #[tokio::test]
    async fn absorbed_ids_become_aliases_of_the_survivor() {
        let pool = pool().await;
        ingest_page(
            &pool,
            &[
                staged("wj_1", "功夫", "wj", "a"),
                staged("mt_1", "功夫", "mt", "b"),
            ],
            OperationMode::AddUpdate,
        )
        .await
        .unwrap();
        merge(&pool).await.unwrap();

        let mut conn = pool.acquire().await.unwrap();
        let alias = aliases::get(&mut conn, "mt_1").await.unwrap().unwrap();
        assert_eq!(alias.vod_id, 1);
        assert_eq!(alias.labels().unwrap(), vec!["mt".to_string()]);
        drop(conn);
        verify_invariants(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn invariant_violations_are_listed() {
        let pool = pool().await;
        let mut stray = staged("wj_1", "A", "wj", "a");
        stray.type_id = 42;
        ingest_page(&pool, &[stray], OperationMode::AddUpdate)
            .await
            .unwrap();

        let err = verify_invariants(&pool).await.unwrap_err();
        let MergeError::Invariant(inv) = err else {
            panic!("expected invariant error, got {err:?}");
        };
        assert_eq!(inv.total, 1);
        assert_eq!(
            inv.violations[0],
            Violation::UnknownType {
                vod_id: 1,
                type_id: 42
            }
        );
    }
}
