//! One collection run: prepare staging, fetch and ingest every source,
//! consolidate, publish.
//!
//! Fetching runs in one task per source, bounded by a semaphore. Tasks hand
//! their batches to the writer loop over a bounded channel; the writer loop
//! is the only code that writes staging. It writes sources in source id
//! order whatever order their batches arrive in, holding back batches of a
//! source until every source before it has finished. Record ids are then
//! assigned the same way on every run, and so is the merge survivor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use sqlx::SqlitePool;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vodsync_core::error::ConfigError;
use vodsync_core::record::StagedRecord;
use vodsync_core::report::{RunSummary, SourceReport};
use vodsync_core::types::{CollectionMode, RawRecord, Source};
use vodsync_db::repo::{sources, taxonomy, vods};
use vodsync_db::snapshot::{SnapshotStore, Staging};
use vodsync_fetch::api::CatalogApi;
use vodsync_fetch::detail::fetch_details;
use vodsync_fetch::pager::{PageOutcome, PageWindow, Pager};
use vodsync_ingest::details::{DetailTally, apply_details};
use vodsync_ingest::ingest::{IngestTally, ingest_page};
use vodsync_ingest::merge::consolidate;
use vodsync_ingest::publish::publish;

use crate::CollectError;
use crate::config::CollectorConfig;

/// Work handed from a fetch task to the writer.
#[derive(Debug)]
pub enum Batch {
    Listing {
        source_id: i64,
        page: u32,
        records: Vec<StagedRecord>,
    },
    Details {
        source_id: i64,
        records: Vec<RawRecord>,
    },
    /// The source's task sends nothing after this.
    Finished { source_id: i64 },
}

impl Batch {
    fn source_id(&self) -> i64 {
        match self {
            Batch::Listing { source_id, .. }
            | Batch::Details { source_id, .. }
            | Batch::Finished { source_id } => *source_id,
        }
    }
}

/// Releases batches one source at a time, in the order sources were started.
#[derive(Debug, Default)]
struct InOrder {
    pending: VecDeque<i64>,
    held: HashMap<i64, Vec<Batch>>,
    finished: HashSet<i64>,
}

impl InOrder {
    fn new(order: impl IntoIterator<Item = i64>) -> Self {
        Self {
            pending: order.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Batches that may be written now, in write order.
    fn accept(&mut self, batch: Batch) -> Vec<Batch> {
        let mut ready = Vec::new();
        match batch {
            Batch::Finished { source_id } => {
                self.finished.insert(source_id);
            }
            batch if self.pending.front() == Some(&batch.source_id()) => ready.push(batch),
            batch => self.held.entry(batch.source_id()).or_default().push(batch),
        }

        while let Some(current) = self.pending.front().copied() {
            if !self.finished.remove(&current) {
                break;
            }
            self.pending.pop_front();
            if let Some(next) = self.pending.front() {
                ready.extend(self.held.remove(next).unwrap_or_default());
            }
        }
        ready
    }

    /// Everything still held, once no more batches can arrive. A task that
    /// died before `Finished` leaves its batches here.
    fn drain(&mut self) -> Vec<Batch> {
        let mut ready = Vec::new();
        for source_id in self.pending.drain(..) {
            ready.extend(self.held.remove(&source_id).unwrap_or_default());
        }
        self.finished.clear();
        ready
    }
}

/// What the writer did for one source.
#[derive(Debug, Default)]
struct Written {
    ingested: IngestTally,
    details: DetailTally,
}

pub async fn run(
    config: &CollectorConfig,
    store: &SnapshotStore,
    api: Arc<dyn CatalogApi>,
    mode: CollectionMode,
) -> Result<RunSummary, CollectError> {
    let started = Instant::now();
    let run_id = uuid::Uuid::new_v4().to_string();
    let mut summary = RunSummary::new(run_id.clone(), mode);
    info!(run_id = %run_id, mode = %mode, "collection run starting");

    let staging = store.prepare_staging().await?;
    match collect_into(config, &staging, api, mode, &mut summary).await {
        Ok(()) => {}
        Err(e) => {
            error!(run_id = %run_id, error = %e, "run aborted before publish");
            discard_quietly(store, staging).await;
            return Err(e);
        }
    }

    let consolidated = match consolidate(staging).await {
        Ok(c) => c,
        Err(failed) => {
            error!(run_id = %run_id, error = %failed.error, "consolidation failed, serving left untouched");
            discard_quietly(store, failed.staging).await;
            return Err(failed.error.into());
        }
    };
    summary.groups_merged = consolidated.summary().groups_merged;
    summary.records_merged = consolidated.summary().records_merged;

    if summary.changed_catalog() {
        publish(store, consolidated).await?;
        summary.published = true;
    } else {
        info!(run_id = %run_id, "nothing changed, staging discarded");
        consolidated.discard(store).await?;
    }

    summary.duration_ms = started.elapsed().as_millis() as u64;
    info!(
        run_id = %run_id,
        sources = summary.sources_processed,
        fetched = summary.records_fetched,
        ingested = summary.records_ingested,
        skipped_unmapped = summary.records_skipped_unmapped,
        merged = summary.records_merged,
        failed = summary.failed_sources.len(),
        published = summary.published,
        duration_ms = summary.duration_ms,
        "collection run finished"
    );
    Ok(summary)
}

async fn discard_quietly(store: &SnapshotStore, staging: Staging) {
    if let Err(e) = store.discard(staging).await {
        warn!(error = %e, "could not discard staging snapshot");
    }
}

/// Resolve every configured source against the taxonomy. Sources that cannot
/// run are recorded in `summary` and left out.
pub async fn load_sources(
    pool: &SqlitePool,
    api: &dyn CatalogApi,
    summary: &mut RunSummary,
) -> Result<Vec<Source>, CollectError> {
    let taxonomy = taxonomy::load(pool).await?;
    let mut runnable = Vec::new();

    for row in sources::list_sources(pool).await? {
        let pairs = sources::get_mapping(pool, row.id).await?;
        let resolved = sources::resolve(&row, pairs, &taxonomy).and_then(|source| {
            if api.supports(source.format) {
                Ok(source)
            } else {
                Err(ConfigError::UnsupportedFormat(source.format.to_string()))
            }
        });

        match resolved {
            Ok(source) => runnable.push(source),
            Err(e) => {
                error!(source = %row.name, error = %e, "source rejected by configuration");
                summary.reject(row.id, &row.name, e.to_string());
            }
        }
    }

    Ok(runnable)
}

async fn collect_into(
    config: &CollectorConfig,
    staging: &Staging,
    api: Arc<dyn CatalogApi>,
    mode: CollectionMode,
    summary: &mut RunSummary,
) -> Result<(), CollectError> {
    let pool = staging.pool();
    let runnable = load_sources(pool, api.as_ref(), summary).await?;

    // Details-only runs target what staging already holds; read it before
    // the writer starts.
    let mut targets: HashMap<i64, Vec<String>> = HashMap::new();
    if mode == CollectionMode::DetailsOnly {
        for source in &runnable {
            let remote_ids = vods::list_unique_ids_for_source(pool, source.id)
                .await?
                .iter()
                .filter_map(|uid| source.remote_id(uid).map(str::to_string))
                .collect();
            targets.insert(source.id, remote_ids);
        }
    }

    let (tx, mut rx) = mpsc::channel::<Batch>(config.channel_capacity.max(1));
    let permits = Arc::new(Semaphore::new(config.fetch_concurrency.max(1)));
    let by_id: HashMap<i64, Source> = runnable.iter().map(|s| (s.id, s.clone())).collect();

    let mut handles: Vec<(i64, JoinHandle<SourceReport>)> = Vec::new();
    for source in runnable {
        let ctx = TaskContext {
            api: api.clone(),
            config: config.clone(),
            tx: tx.clone(),
        };
        let permits = permits.clone();
        let remote_ids = targets.remove(&source.id).unwrap_or_default();
        let source_id = source.id;
        let done = tx.clone();
        let handle = tokio::spawn(async move {
            let _permit = permits.acquire_owned().await;
            let report = match mode {
                CollectionMode::Full => ctx.collect_listing(source, PageWindow::Full).await,
                CollectionMode::Incremental { window_hours } => {
                    let window = PageWindow::recent(window_hours, chrono::Utc::now().timestamp());
                    ctx.collect_listing(source, window).await
                }
                CollectionMode::DetailsOnly => ctx.collect_details(source, remote_ids).await,
            };
            let _ = done.send(Batch::Finished { source_id }).await;
            report
        });
        handles.push((source_id, handle));
    }
    drop(tx);

    let mut written: HashMap<i64, Written> = HashMap::new();
    let mut order = InOrder::new(handles.iter().map(|(id, _)| *id));
    while let Some(batch) = rx.recv().await {
        if let Err(e) = write_all(pool, &by_id, &mut written, order.accept(batch)).await {
            for (_, handle) in &handles {
                handle.abort();
            }
            return Err(e);
        }
    }
    write_all(pool, &by_id, &mut written, order.drain()).await?;

    for (source_id, handle) in handles {
        let mut report = match handle.await {
            Ok(report) => report,
            Err(e) => {
                let name = by_id.get(&source_id).map(|s| s.name.as_str()).unwrap_or("?");
                error!(source = %name, error = %e, "fetch task did not finish");
                return Err(CollectError::Task(e.to_string()));
            }
        };
        if let Some(w) = written.remove(&source_id) {
            w.ingested.apply_to(&mut report);
            w.details.apply_to(&mut report);
        }
        report.flush_unmapped();
        if let Some(reason) = &report.failure {
            warn!(source = %report.source_name, reason = %reason, "source failed, partial data kept");
        }
        summary.absorb(report);
    }

    Ok(())
}

async fn write_all(
    pool: &SqlitePool,
    by_id: &HashMap<i64, Source>,
    written: &mut HashMap<i64, Written>,
    batches: Vec<Batch>,
) -> Result<(), CollectError> {
    for batch in batches {
        write_batch(pool, by_id, written, batch).await?;
    }
    Ok(())
}

async fn write_batch(
    pool: &SqlitePool,
    by_id: &HashMap<i64, Source>,
    written: &mut HashMap<i64, Written>,
    batch: Batch,
) -> Result<(), CollectError> {
    match batch {
        Batch::Listing {
            source_id,
            page,
            records,
        } => {
            let Some(source) = by_id.get(&source_id) else {
                return Ok(());
            };
            let tally = ingest_page(pool, &records, source.mode).await?;
            debug!(source = %source.name, page, inserted = tally.inserted, updated = tally.updated, "listing page written");
            let entry = &mut written.entry(source_id).or_default().ingested;
            entry.inserted += tally.inserted;
            entry.updated += tally.updated;
            entry.unchanged += tally.unchanged;
            entry.skipped += tally.skipped;
        }
        Batch::Details { source_id, records } => {
            let Some(source) = by_id.get(&source_id) else {
                return Ok(());
            };
            let tally = apply_details(pool, source, &records).await?;
            let entry = &mut written.entry(source_id).or_default().details;
            entry.updated += tally.updated;
            entry.unchanged += tally.unchanged;
            entry.skipped += tally.skipped;
            entry.rejected += tally.rejected;
        }
        Batch::Finished { .. } => {}
    }
    Ok(())
}

/// What a fetch task needs, owned so the task can be spawned.
struct TaskContext {
    api: Arc<dyn CatalogApi>,
    config: CollectorConfig,
    tx: mpsc::Sender<Batch>,
}

impl TaskContext {
    async fn collect_listing(self, source: Source, window: PageWindow) -> SourceReport {
        let mut report = SourceReport::new(&source, self.config.skip_report_limit);
        let mut pager = Pager::new(self.api.as_ref(), &source, window, self.config.pager_config());
        info!(source = %source.name, window = ?window, "collecting listing");

        while let Some(outcome) = pager.next_page().await {
            let page = match outcome {
                Ok(PageOutcome::Page(page)) => page,
                Ok(PageOutcome::Skipped { .. }) => {
                    report.pages_skipped += 1;
                    continue;
                }
                Err(e) => {
                    report.mark_failed(e.to_string());
                    break;
                }
            };

            report.pages_fetched += 1;
            report.records_fetched += page.items.len() as u64;
            report.records_rejected += page.rejected;

            let page_no = page.page;
            let records = match self.stage_page(&source, page.items, &mut report).await {
                Ok(records) => records,
                Err(staged) => {
                    // The detail supplement failed; what was staged still goes in.
                    self.send_listing(&source, page_no, staged).await;
                    break;
                }
            };
            if !self.send_listing(&source, page_no, records).await {
                break;
            }
        }

        report.stopped_by_window = pager.stopped_by_window();
        info!(
            source = %source.name,
            pages = report.pages_fetched,
            fetched = report.records_fetched,
            skipped_unmapped = report.records_skipped_unmapped,
            "listing collected"
        );
        report
    }

    /// Classify and stage one page. Mapped records that came without play
    /// data are completed from the detail endpoint first. `Err` carries the
    /// records staged before the detail fetch failed; the report is marked.
    async fn stage_page(
        &self,
        source: &Source,
        items: Vec<RawRecord>,
        report: &mut SourceReport,
    ) -> Result<Vec<StagedRecord>, Vec<StagedRecord>> {
        let now = chrono::Utc::now().timestamp();
        let mut staged = Vec::new();
        let mut incomplete: Vec<(RawRecord, i64)> = Vec::new();

        for raw in items {
            let Some(type_id) = source.mapping.classify(&raw.remote_type_id) else {
                report.record_unmapped(&raw);
                continue;
            };
            if !raw.has_play_data() {
                incomplete.push((raw, type_id));
                continue;
            }
            stage_one(raw, type_id, source, now, &mut staged, report);
        }

        if incomplete.is_empty() {
            return Ok(staged);
        }

        let ids: Vec<String> = incomplete
            .iter()
            .map(|(raw, _)| raw.remote_id.trim().to_string())
            .collect();
        let (batch, failure) = fetch_details(
            self.api.as_ref(),
            source,
            &ids,
            self.config.detail_batch_size,
            self.config.retry_policy(),
        )
        .await;
        report.records_rejected += batch.rejected;

        let mut details: HashMap<String, RawRecord> = batch
            .records
            .into_iter()
            .map(|r| (r.remote_id.trim().to_string(), r))
            .collect();

        for (raw, type_id) in incomplete {
            match details.remove(raw.remote_id.trim()) {
                Some(detail) if detail.has_play_data() => {
                    stage_one(complete(raw, detail), type_id, source, now, &mut staged, report);
                }
                _ => {
                    debug!(source = %source.name, remote_id = %raw.remote_id, "no play data after detail fetch");
                    report.records_rejected += 1;
                }
            }
        }

        match failure {
            None => Ok(staged),
            Some(e) => {
                report.mark_failed(e.to_string());
                Err(staged)
            }
        }
    }

    async fn collect_details(self, source: Source, remote_ids: Vec<String>) -> SourceReport {
        let mut report = SourceReport::new(&source, self.config.skip_report_limit);
        info!(source = %source.name, records = remote_ids.len(), "collecting details");

        let batch_size = self.config.detail_batch_size.max(1);
        for chunk in remote_ids.chunks(batch_size) {
            let (batch, failure) = fetch_details(
                self.api.as_ref(),
                &source,
                chunk,
                batch_size,
                self.config.retry_policy(),
            )
            .await;
            report.records_fetched += batch.records.len() as u64;
            report.records_rejected += batch.rejected;

            if !batch.records.is_empty() {
                let sent = self
                    .tx
                    .send(Batch::Details {
                        source_id: source.id,
                        records: batch.records,
                    })
                    .await;
                if sent.is_err() {
                    break;
                }
            }
            if let Some(e) = failure {
                report.mark_failed(e.to_string());
                break;
            }
        }

        report
    }

    /// Returns false once the writer has gone away.
    async fn send_listing(&self, source: &Source, page: u32, records: Vec<StagedRecord>) -> bool {
        if records.is_empty() {
            return true;
        }
        self.tx
            .send(Batch::Listing {
                source_id: source.id,
                page,
                records,
            })
            .await
            .is_ok()
    }
}

fn stage_one(
    raw: RawRecord,
    type_id: i64,
    source: &Source,
    now: i64,
    staged: &mut Vec<StagedRecord>,
    report: &mut SourceReport,
) {
    let remote_id = raw.remote_id.clone();
    match StagedRecord::stage(raw, type_id, source, now) {
        Ok(record) => staged.push(record),
        Err(e) => {
            debug!(source = %source.name, remote_id = %remote_id, error = %e, "record rejected");
            report.records_rejected += 1;
        }
    }
}

/// Fill a listing record's gaps from its detail record. The listing's
/// category is kept; it is what was classified.
fn complete(mut raw: RawRecord, detail: RawRecord) -> RawRecord {
    raw.play_from = detail.play_from;
    raw.play_url = detail.play_url;
    for (field, value) in [
        (&mut raw.name_en, detail.name_en),
        (&mut raw.pic, detail.pic),
        (&mut raw.actor, detail.actor),
        (&mut raw.director, detail.director),
        (&mut raw.blurb, detail.blurb),
        (&mut raw.area, detail.area),
        (&mut raw.lang, detail.lang),
        (&mut raw.class, detail.class),
        (&mut raw.year, detail.year),
        (&mut raw.remarks, detail.remarks),
    ] {
        if field.is_empty() {
            *field = value;
        }
    }
    if raw.time.is_none() {
        raw.time = detail.time;
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(source_id: i64, remote_id: &str) -> Batch {
        Batch::Details {
            source_id,
            records: vec![RawRecord {
                remote_id: remote_id.into(),
                ..Default::default()
            }],
        }
    }

    fn written(batches: &[Batch]) -> Vec<(i64, String)> {
        batches
            .iter()
            .filter_map(|b| match b {
                Batch::Details { source_id, records } => Some((*source_id, records[0].remote_id.clone())),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn later_sources_wait_for_earlier_ones() {
        let mut order = InOrder::new([1, 2, 3]);

        assert!(order.accept(details(2, "b1")).is_empty());
        assert!(order.accept(details(3, "c1")).is_empty());
        assert!(order.accept(Batch::Finished { source_id: 3 }).is_empty());
        assert_eq!(written(&order.accept(details(1, "a1"))), vec![(1, "a1".to_string())]);

        let ready = order.accept(Batch::Finished { source_id: 1 });
        assert_eq!(written(&ready), vec![(2, "b1".to_string())]);
        assert_eq!(written(&order.accept(details(2, "b2"))), vec![(2, "b2".to_string())]);

        let ready = order.accept(Batch::Finished { source_id: 2 });
        assert_eq!(written(&ready), vec![(3, "c1".to_string())]);
        assert!(order.drain().is_empty());
    }

    #[test]
    fn drain_releases_sources_that_never_finished() {
        let mut order = InOrder::new([1, 2]);
        assert_eq!(order.accept(details(1, "a1")).len(), 1);
        assert!(order.accept(details(2, "b1")).is_empty());

        assert_eq!(written(&order.drain()), vec![(2, "b1".to_string())]);
    }

    #[test]
    fn complete_keeps_listing_category_and_fills_gaps() {
        let listing = RawRecord {
            remote_id: "1".into(),
            name: "功夫".into(),
            remote_type_id: "6".into(),
            actor: "周星驰".into(),
            ..Default::default()
        };
        let detail = RawRecord {
            remote_id: "1".into(),
            name: "功夫".into(),
            remote_type_id: "99".into(),
            actor: "someone else".into(),
            blurb: "斧头帮".into(),
            play_from: "wj".into(),
            play_url: "正片$a".into(),
            ..Default::default()
        };
        let merged = complete(listing, detail);
        assert_eq!(merged.remote_type_id, "6");
        assert_eq!(merged.actor, "周星驰");
        assert_eq!(merged.blurb, "斧头帮");
        assert!(merged.has_play_data());
    }
}
