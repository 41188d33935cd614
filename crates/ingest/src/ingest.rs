//! Writing staged records into the staging snapshot.
//!
//! | mode       | record exists        | record absent |
//! |------------|----------------------|---------------|
//! | add_update | overwrite all fields | insert        |
//! | add        | leave alone          | insert        |
//! | update     | overwrite all fields | leave alone   |
//!
//! A unique id that a merge folded into another record counts as existing.
//! Its play sources are applied to that record; the record's other fields
//! belong to the survivor and are not touched.

use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};
use vodsync_core::play::PlaySources;
use vodsync_core::record::StagedRecord;
use vodsync_core::report::SourceReport;
use vodsync_core::types::OperationMode;
use vodsync_db::repo::aliases;
use vodsync_db::repo::vods::{self, VodRow};

use crate::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Updated,
    /// Overwrite allowed, but nothing differed.
    Unchanged,
    /// The operation mode forbids touching this record.
    Skipped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestTally {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub skipped: u64,
}

impl IngestTally {
    fn count(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Inserted => self.inserted += 1,
            IngestOutcome::Updated => self.updated += 1,
            IngestOutcome::Unchanged => self.unchanged += 1,
            IngestOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn apply_to(&self, report: &mut SourceReport) {
        report.records_inserted += self.inserted;
        report.records_updated += self.updated;
        report.records_unchanged += self.unchanged;
        report.records_skipped_by_mode += self.skipped;
    }
}

/// Apply one record under `mode`.
///
/// An overwrite keeps the numeric id and overlays the incoming play sources
/// on the stored ones, so labels a previous merge folded into this record
/// survive.
pub async fn ingest_record(
    conn: &mut SqliteConnection,
    record: &StagedRecord,
    mode: OperationMode,
) -> Result<IngestOutcome, IngestError> {
    let existing = vods::get_by_unique_id(&mut *conn, &record.unique_id).await?;
    if existing.is_none() {
        if let Some(outcome) = ingest_absorbed(&mut *conn, record, mode).await? {
            return Ok(outcome);
        }
    }

    match existing {
        None if mode.inserts_missing() => {
            vods::insert(conn, record).await?;
            Ok(IngestOutcome::Inserted)
        }
        None => Ok(IngestOutcome::Skipped),
        Some(row) if mode.overwrites_existing() => {
            let mut play = row.play_sources()?;
            play.overlay(&record.play);
            if !differs(&row, record, &play) {
                return Ok(IngestOutcome::Unchanged);
            }
            vods::overwrite(conn, row.vod_id, record, &play).await?;
            Ok(IngestOutcome::Updated)
        }
        Some(_) => Ok(IngestOutcome::Skipped),
    }
}

/// Route a record that was merged away to the record that absorbed it.
/// `None` when `record` is not an alias.
async fn ingest_absorbed(
    conn: &mut SqliteConnection,
    record: &StagedRecord,
    mode: OperationMode,
) -> Result<Option<IngestOutcome>, IngestError> {
    let Some(alias) = aliases::get(&mut *conn, &record.unique_id).await? else {
        return Ok(None);
    };
    if !mode.overwrites_existing() {
        return Ok(Some(IngestOutcome::Skipped));
    }
    let Some(survivor) = vods::get_by_id(&mut *conn, alias.vod_id).await? else {
        warn!(unique_id = %record.unique_id, vod_id = alias.vod_id, "alias target is gone, ingesting as new");
        return Ok(None);
    };

    let mut play = survivor.play_sources()?;
    let mut owned = alias.labels()?;
    if !play.overlay_owned(&record.play, &mut owned) {
        return Ok(Some(IngestOutcome::Unchanged));
    }
    vods::set_play(&mut *conn, survivor.vod_id, &play).await?;
    aliases::set_labels(conn, &record.unique_id, &owned).await?;
    debug!(unique_id = %record.unique_id, survivor = survivor.vod_id, "absorbed record updated its survivor");
    Ok(Some(IngestOutcome::Updated))
}

/// Apply one page of records in a single transaction.
pub async fn ingest_page(
    pool: &SqlitePool,
    records: &[StagedRecord],
    mode: OperationMode,
) -> Result<IngestTally, IngestError> {
    let mut tally = IngestTally::default();
    let mut tx = pool.begin().await?;

    for record in records {
        let outcome = ingest_record(&mut *tx, record, mode).await?;
        tally.count(outcome);
    }

    tx.commit().await?;
    debug!(
        records = records.len(),
        inserted = tally.inserted,
        updated = tally.updated,
        mode = %mode,
        "page ingested"
    );
    Ok(tally)
}

fn differs(row: &VodRow, rec: &StagedRecord, play: &PlaySources) -> bool {
    let (play_from, play_url) = play.join();
    row.source_id != rec.source_id
        || row.name != rec.name
        || row.name_en != rec.name_en
        || row.year != rec.year
        || row.type_id != rec.type_id
        || row.pic != rec.pic
        || row.remarks != rec.remarks
        || row.play_from != play_from
        || row.play_url != play_url
        || row.actor != rec.actor
        || row.director != rec.director
        || row.blurb != rec.blurb
        || row.area != rec.area
        || row.lang != rec.lang
        || row.class != rec.class
        || row.time_ts != rec.time_ts
        || row.hits != rec.hits
}
