use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vodsync_collector::Collector;
use vodsync_collector::CollectError;
use vodsync_collector::config::CollectorConfig;
use vodsync_core::types::{RawRecord, ResponseFormat, Source};
use vodsync_db::repo::{aliases, merge_log, sources, taxonomy, vods};
use vodsync_db::snapshot::SnapshotStore;
use vodsync_fetch::FetchError;
use vodsync_fetch::api::{CatalogApi, ListPage};
use vodsync_fetch::catalog::RemoteCategory;

/// Serves scripted listing pages per source name. Unscripted pages come back
/// empty, which ends paging. Detail lookups answer from `details`. Sources
/// in `delays` answer each listing page only after that long.
#[derive(Default)]
struct Scripted {
    pages: HashMap<(String, u32), Result<ListPage, FetchError>>,
    delays: HashMap<String, Duration>,
    details: HashMap<(String, String), RawRecord>,
    listed: Mutex<Vec<(String, u32)>>,
    detail_calls: Mutex<Vec<Vec<String>>>,
}

impl Scripted {
    fn page(mut self, source: &str, page: u32, page_count: u32, items: Vec<RawRecord>) -> Self {
        self.pages.insert(
            (source.to_string(), page),
            Ok(ListPage {
                page,
                page_count: Some(page_count),
                items,
                ..Default::default()
            }),
        );
        self
    }

    fn failing(mut self, source: &str, page: u32, err: FetchError) -> Self {
        self.pages.insert((source.to_string(), page), Err(err));
        self
    }

    fn detail(mut self, source: &str, record: RawRecord) -> Self {
        self.details
            .insert((source.to_string(), record.remote_id.clone()), record);
        self
    }

    fn slow(mut self, source: &str, delay: Duration) -> Self {
        self.delays.insert(source.to_string(), delay);
        self
    }

    fn listed_sources(&self) -> Vec<String> {
        self.listed
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl CatalogApi for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports(&self, format: ResponseFormat) -> bool {
        format == ResponseFormat::Json
    }

    async fn list_page(
        &self,
        source: &Source,
        page: u32,
        _window_hours: Option<u32>,
    ) -> Result<ListPage, FetchError> {
        if let Some(delay) = self.delays.get(&source.name) {
            tokio::time::sleep(*delay).await;
        }
        self.listed.lock().unwrap().push((source.name.clone(), page));
        self.pages
            .get(&(source.name.clone(), page))
            .cloned()
            .unwrap_or_else(|| {
                Ok(ListPage {
                    page,
                    ..Default::default()
                })
            })
    }

    async fn detail(&self, source: &Source, remote_ids: &[String]) -> Result<ListPage, FetchError> {
        self.detail_calls.lock().unwrap().push(remote_ids.to_vec());
        let items = remote_ids
            .iter()
            .filter_map(|id| self.details.get(&(source.name.clone(), id.clone())).cloned())
            .collect();
        Ok(ListPage {
            page: 1,
            page_count: Some(1),
            items,
            ..Default::default()
        })
    }
}

fn record(remote_id: &str, name: &str, remote_type_id: &str, label: &str) -> RawRecord {
    RawRecord {
        remote_id: remote_id.into(),
        name: name.into(),
        remote_type_id: remote_type_id.into(),
        remote_type_name: format!("type {remote_type_id}"),
        play_from: label.into(),
        play_url: format!("正片$https://{label}.example/{remote_id}.m3u8"),
        year: "2004".into(),
        time: Some(chrono::Utc::now().timestamp()),
        ..Default::default()
    }
}

fn config(dir: &Path) -> CollectorConfig {
    CollectorConfig {
        data_dir: dir.to_path_buf(),
        page_delay_ms: 0,
        retry_base_ms: 0,
        max_attempts: 2,
        ..Default::default()
    }
}

struct SeedSource<'a> {
    name: &'a str,
    prefix: &'a str,
    mapping: &'a [(&'a str, i64)],
}

const W: SeedSource<'static> = SeedSource {
    name: "W",
    prefix: "wj_",
    mapping: &[("6", 1), ("20", 2)],
};

const M: SeedSource<'static> = SeedSource {
    name: "M",
    prefix: "mt_",
    mapping: &[("1", 1)],
};

/// Publish a serving snapshot holding the taxonomy and `seeds`.
async fn seed(store: &SnapshotStore, seeds: &[SeedSource<'_>]) {
    let staging = store.prepare_staging().await.unwrap();
    let pool = staging.pool();
    taxonomy::insert_type(pool, 1, "电影", 0).await.unwrap();
    taxonomy::insert_type(pool, 2, "电视剧", 0).await.unwrap();
    for s in seeds {
        let id = sources::create_source(
            pool,
            &sources::NewSource {
                name: s.name,
                id_prefix: s.prefix,
                api_url: "https://cms.example/api.php/provide/vod/",
                data_format: "json",
                operation_mode: "add_update",
            },
        )
        .await
        .unwrap();
        sources::set_mapping(pool, id, s.mapping).await.unwrap();
    }
    store.swap(staging).await.unwrap();
}

fn collector(dir: &Path, api: Scripted) -> (Collector, Arc<Scripted>) {
    let api = Arc::new(api);
    (Collector::with_api(config(dir), api.clone()), api)
}

#[tokio::test]
async fn unmapped_category_is_dropped_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _) = collector(
        dir.path(),
        Scripted::default().page(
            "W",
            1,
            1,
            vec![
                record("1", "功夫", "6", "wj"),
                record("2", "琅琊榜", "20", "wj"),
                record("3", "新闻联播", "13", "wj"),
            ],
        ),
    );
    seed(collector.store(), &[W]).await;

    let summary = collector.run_full_collection().await.unwrap();
    assert_eq!(summary.records_fetched, 3);
    assert_eq!(summary.records_skipped_unmapped, 1);
    assert_eq!(summary.records_ingested, 2);
    assert!(summary.published);

    let serving = collector.store().open_serving().await.unwrap();
    let rows = vods::list_all(&serving).await.unwrap();
    let types: Vec<(String, i64)> = rows.iter().map(|r| (r.unique_id.clone(), r.type_id)).collect();
    assert_eq!(types, vec![("wj_1".to_string(), 1), ("wj_2".to_string(), 2)]);
}

#[tokio::test]
async fn source_without_mapping_ingests_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, api) = collector(
        dir.path(),
        Scripted::default()
            .page("W", 1, 1, vec![record("1", "功夫", "6", "wj")])
            .page("Z", 1, 1, vec![record("9", "功夫", "6", "zz")]),
    );
    let z = SeedSource {
        name: "Z",
        prefix: "zz_",
        mapping: &[],
    };
    seed(collector.store(), &[W, z]).await;

    let summary = collector.run_full_collection().await.unwrap();
    assert_eq!(summary.rejected_sources.len(), 1);
    assert_eq!(summary.rejected_sources[0].source_name, "Z");
    assert_eq!(summary.sources_processed, 1);
    assert!(!api.listed_sources().contains(&"Z".to_string()));

    let serving = collector.store().open_serving().await.unwrap();
    assert_eq!(vods::list_unique_ids_for_source(&serving, 2).await.unwrap().len(), 0);
    assert_eq!(vods::count(&serving).await.unwrap(), 1);
}

#[tokio::test]
async fn failed_source_keeps_its_pages_and_others_continue() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _) = collector(
        dir.path(),
        Scripted::default()
            .page("W", 1, 3, vec![record("1", "功夫", "6", "wj")])
            .failing("W", 2, FetchError::Network("connection reset".into()))
            .page("M", 1, 1, vec![record("5", "英雄", "1", "mt")]),
    );
    seed(collector.store(), &[W, M]).await;

    let summary = collector.run_full_collection().await.unwrap();
    assert_eq!(summary.failed_sources.len(), 1);
    assert_eq!(summary.failed_sources[0].source_name, "W");
    assert!(summary.failed_sources[0].reason.contains("connection reset"));
    assert_eq!(summary.records_ingested, 2);
    assert!(summary.published);

    let serving = collector.store().open_serving().await.unwrap();
    let ids: Vec<String> = vods::list_all(&serving)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.unique_id)
        .collect();
    assert_eq!(ids, vec!["wj_1".to_string(), "mt_5".to_string()]);
}

#[tokio::test]
async fn invariant_failure_leaves_serving_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _) = collector(
        dir.path(),
        Scripted::default().page("W", 1, 1, vec![record("1", "功夫", "6", "wj")]),
    );
    let store = collector.store().clone();

    // A serving row pointing at a category the taxonomy does not have.
    let staging = store.prepare_staging().await.unwrap();
    taxonomy::insert_type(staging.pool(), 1, "电影", 0).await.unwrap();
    taxonomy::insert_type(staging.pool(), 2, "电视剧", 0).await.unwrap();
    let id = sources::create_source(
        staging.pool(),
        &sources::NewSource {
            name: "W",
            id_prefix: "wj_",
            api_url: "https://cms.example/api.php/provide/vod/",
            data_format: "json",
            operation_mode: "add_update",
        },
    )
    .await
    .unwrap();
    sources::set_mapping(staging.pool(), id, W.mapping).await.unwrap();
    sqlx::query(
        "INSERT INTO vod (unique_id, source_id, name, type_id, play_from, play_url, time_ts) \
         VALUES ('wj_old', 1, '旧片', 99, 'wj', '正片$x', 0)",
    )
    .execute(staging.pool())
    .await
    .unwrap();
    store.swap(staging).await.unwrap();
    let before = std::fs::read(store.serving_path()).unwrap();

    let err = collector.run_full_collection().await.unwrap_err();
    assert!(matches!(err, CollectError::Merge(_)));

    assert_eq!(std::fs::read(store.serving_path()).unwrap(), before);
    assert!(!store.staging_path().exists());
    assert!(!store.lock_path().exists());
}

#[tokio::test]
async fn rerun_without_changes_is_not_published() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _) = collector(
        dir.path(),
        Scripted::default().page("W", 1, 1, vec![record("1", "功夫", "6", "wj")]),
    );
    seed(collector.store(), &[W]).await;

    let first = collector.run_full_collection().await.unwrap();
    assert!(first.published);
    let published = std::fs::read(collector.store().serving_path()).unwrap();

    let second = collector.run_full_collection().await.unwrap();
    assert!(!second.published);
    assert_eq!(second.records_ingested, 0);
    assert_eq!(second.sources[0].records_unchanged, 1);
    assert_eq!(std::fs::read(collector.store().serving_path()).unwrap(), published);
    assert!(!collector.store().staging_path().exists());
}

#[tokio::test]
async fn listing_without_play_data_is_completed_from_details() {
    let dir = tempfile::tempdir().unwrap();
    let mut bare = record("1", "功夫", "6", "");
    bare.play_url.clear();
    let mut full = record("1", "功夫", "6", "wj");
    full.blurb = "斧头帮横行上海".into();
    let (collector, api) = collector(
        dir.path(),
        Scripted::default().page("W", 1, 1, vec![bare]).detail("W", full),
    );
    seed(collector.store(), &[W]).await;

    let summary = collector.run_full_collection().await.unwrap();
    assert_eq!(summary.records_ingested, 1);
    assert_eq!(*api.detail_calls.lock().unwrap(), vec![vec!["1".to_string()]]);

    let serving = collector.store().open_serving().await.unwrap();
    let rows = vods::list_all(&serving).await.unwrap();
    assert_eq!(rows[0].play_from, "wj");
    assert_eq!(rows[0].blurb, "斧头帮横行上海");
}

#[tokio::test]
async fn incremental_run_stops_at_stale_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut stale = record("2", "英雄", "6", "wj");
    stale.time = Some(chrono::Utc::now().timestamp() - 72 * 3600);
    let (collector, api) = collector(
        dir.path(),
        Scripted::default()
            .page("W", 1, 5, vec![record("1", "功夫", "6", "wj")])
            .page("W", 2, 5, vec![stale]),
    );
    seed(collector.store(), &[W]).await;

    let summary = collector.run_incremental_collection(24).await.unwrap();
    assert_eq!(summary.records_ingested, 1);
    assert!(summary.sources[0].stopped_by_window);
    assert_eq!(api.listed.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn details_only_refreshes_stored_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut refreshed = record("1", "功夫", "6", "wj");
    refreshed.director = "周星驰".into();
    let (collector, _) = collector(
        dir.path(),
        Scripted::default()
            .page("W", 1, 1, vec![record("1", "功夫", "6", "wj")])
            .detail("W", refreshed),
    );
    seed(collector.store(), &[W]).await;
    collector.run_full_collection().await.unwrap();

    let summary = collector.run_details_only_collection().await.unwrap();
    assert_eq!(summary.details_updated, 1);
    assert!(summary.published);

    let serving = collector.store().open_serving().await.unwrap();
    assert_eq!(vods::list_all(&serving).await.unwrap()[0].director, "周星驰");
}

#[tokio::test]
async fn cross_source_duplicates_merge_then_restore_undoes_publish() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _) = collector(
        dir.path(),
        Scripted::default()
            .page("W", 1, 1, vec![record("1", "功夫", "6", "wj")])
            .page("M", 1, 1, vec![record("7", "功夫 ", "1", "mt")]),
    );
    seed(collector.store(), &[W, M]).await;

    let summary = collector.run_full_collection().await.unwrap();
    assert_eq!(summary.records_ingested, 2);
    assert_eq!(summary.groups_merged, 1);
    assert_eq!(summary.records_merged, 1);
    assert!(summary.published);

    let serving = collector.store().open_serving().await.unwrap();
    let rows = vods::list_all(&serving).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].unique_id, "wj_1");
    assert_eq!(rows[0].play_from, "wj$$$mt");

    let log = merge_log::for_canonical(&serving, rows[0].vod_id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].merge_key, "功夫|2004");
    assert_eq!(log[0].members().unwrap().len(), 2);
    serving.close().await;

    collector.restore().await.unwrap();
    let restored = collector.store().open_serving().await.unwrap();
    assert_eq!(vods::count(&restored).await.unwrap(), 0);
    restored.close().await;

    collector.restore().await.unwrap();
    let again = collector.store().open_serving().await.unwrap();
    assert_eq!(vods::count(&again).await.unwrap(), 1);
}

fn duplicated_across_sources() -> Scripted {
    Scripted::default()
        .page("W", 1, 1, vec![record("1", "功夫", "6", "wj")])
        .page("M", 1, 1, vec![record("7", "功夫 ", "1", "mt")])
}

#[tokio::test]
async fn rerun_after_merge_is_not_published() {
    let dir = tempfile::tempdir().unwrap();
    let (collector, _) = collector(dir.path(), duplicated_across_sources());
    seed(collector.store(), &[W, M]).await;

    let first = collector.run_full_collection().await.unwrap();
    assert!(first.published);
    assert_eq!(first.records_merged, 1);
    let published = std::fs::read(collector.store().serving_path()).unwrap();

    let second = collector.run_full_collection().await.unwrap();
    assert!(!second.published);
    assert_eq!(second.records_ingested, 0);
    assert_eq!(second.groups_merged, 0);
    assert_eq!(second.records_merged, 0);
    assert_eq!(second.sources[1].records_unchanged, 1);
    assert_eq!(std::fs::read(collector.store().serving_path()).unwrap(), published);

    let serving = collector.store().open_serving().await.unwrap();
    assert_eq!(vods::count(&serving).await.unwrap(), 1);
    assert_eq!(merge_log::count(&serving).await.unwrap(), 1);
    assert_eq!(aliases::count(&serving).await.unwrap(), 1);
}

#[tokio::test]
async fn absorbed_record_with_new_episodes_updates_the_survivor() {
    let dir = tempfile::tempdir().unwrap();
    let mut newer = record("7", "功夫 ", "1", "mt");
    newer.play_url = "正片$https://mt.example/7-hd.m3u8".into();
    let (collector, _) = collector(dir.path(), duplicated_across_sources());
    seed(collector.store(), &[W, M]).await;
    collector.run_full_collection().await.unwrap();

    let api = duplicated_across_sources().page("M", 1, 1, vec![newer]);
    let rerun = Collector::with_api(config(dir.path()), Arc::new(api));
    let summary = rerun.run_full_collection().await.unwrap();
    assert!(summary.published);
    assert_eq!(summary.records_ingested, 1);
    assert_eq!(summary.records_merged, 0);

    let serving = rerun.store().open_serving().await.unwrap();
    let rows = vods::list_all(&serving).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].unique_id, "wj_1");
    assert_eq!(rows[0].play_from, "wj$$$mt");
    assert!(rows[0].play_url.ends_with("$$$正片$https://mt.example/7-hd.m3u8"));
    assert_eq!(merge_log::count(&serving).await.unwrap(), 1);
}

#[tokio::test]
async fn survivor_does_not_depend_on_fetch_timing() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(duplicated_across_sources().slow("W", Duration::from_millis(50)));
    let collector = Collector::with_api(
        CollectorConfig {
            fetch_concurrency: 2,
            ..config(dir.path())
        },
        api.clone(),
    );
    seed(collector.store(), &[W, M]).await;

    let summary = collector.run_full_collection().await.unwrap();
    assert_eq!(summary.records_merged, 1);
    // M answered first, yet W's record was written first.
    assert_eq!(api.listed_sources().first().map(String::as_str), Some("M"));

    let serving = collector.store().open_serving().await.unwrap();
    let rows = vods::list_all(&serving).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].unique_id, "wj_1");
    assert_eq!(rows[0].vod_id, 1);
    assert_eq!(rows[0].play_from, "wj$$$mt");
}

#[tokio::test]
async fn suggestions_cover_unmapped_remote_categories() {
    let dir = tempfile::tempdir().unwrap();
    let mut api = Scripted::default();
    api.pages.insert(
        ("W".to_string(), 1),
        Ok(ListPage {
            page: 1,
            page_count: Some(1),
            items: vec![record("1", "功夫", "6", "wj")],
            classes: vec![
                RemoteCategory {
                    remote_type_id: "6".into(),
                    name: "动作片".into(),
                },
                RemoteCategory {
                    remote_type_id: "13".into(),
                    name: "国产电视剧".into(),
                },
                RemoteCategory {
                    remote_type_id: "40".into(),
                    name: "体育".into(),
                },
            ],
            rejected: 0,
        }),
    );
    let (collector, _) = collector(dir.path(), api);
    seed(collector.store(), &[W]).await;

    let suggestions = collector.suggest_categories("wj_").await.unwrap();
    assert_eq!(suggestions.len(), 3);
    assert_eq!(suggestions[0].mapped_to, Some(1));
    assert_eq!(suggestions[1].mapped_to, None);
    assert_eq!(
        suggestions[1].suggestion.as_ref().map(|s| s.local_type_id),
        Some(2)
    );
    assert!(suggestions[2].suggestion.is_none());

    let err = collector.suggest_categories("nope_").await.unwrap_err();
    assert!(matches!(err, CollectError::UnknownSource(_)));
}
