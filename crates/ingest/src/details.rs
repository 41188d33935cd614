//! Refreshing existing records from detail responses.
//!
//! Only play sources, actor, director, blurb, poster, English name, area and
//! language are touched. Missing records are never created, and sources in
//! `add` mode leave existing records alone.

use sqlx::SqlitePool;
use tracing::debug;
use vodsync_core::play::PlaySources;
use vodsync_core::report::SourceReport;
use vodsync_core::types::{RawRecord, Source};
use vodsync_db::repo::vods::{self, DetailFields, VodRow};

use crate::IngestError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailTally {
    pub updated: u64,
    pub unchanged: u64,
    /// Missing records, or the source's mode forbids overwrites.
    pub skipped: u64,
    /// Detail records whose play columns do not line up.
    pub rejected: u64,
}

impl DetailTally {
    pub fn apply_to(&self, report: &mut SourceReport) {
        report.details_updated += self.updated;
        report.records_unchanged += self.unchanged;
        report.records_skipped_by_mode += self.skipped;
        report.records_rejected += self.rejected;
    }
}

/// Apply one batch of detail records for `source` in a single transaction.
pub async fn apply_details(
    pool: &SqlitePool,
    source: &Source,
    details: &[RawRecord],
) -> Result<DetailTally, IngestError> {
    let mut tally = DetailTally::default();
    if !source.mode.overwrites_existing() {
        tally.skipped = details.len() as u64;
        return Ok(tally);
    }

    let mut tx = pool.begin().await?;
    for raw in details {
        let unique_id = source.unique_id(raw.remote_id.trim());
        let Some(row) = vods::get_by_unique_id(&mut *tx, &unique_id).await? else {
            tally.skipped += 1;
            continue;
        };

        let incoming = match PlaySources::parse(&raw.play_from, &raw.play_url, &source.name) {
            Ok(play) => play,
            Err(e) => {
                debug!(source = %source.name, unique_id = %unique_id, error = %e, "detail rejected");
                tally.rejected += 1;
                continue;
            }
        };

        let mut play = row.play_sources()?;
        play.overlay(&incoming);
        let fields = DetailFields {
            name_en: raw.name_en.clone(),
            pic: raw.pic.clone(),
            actor: raw.actor.clone(),
            director: raw.director.clone(),
            blurb: raw.blurb.clone(),
            area: raw.area.clone(),
            lang: raw.lang.clone(),
        };

        if !differs(&row, &fields, &play) {
            tally.unchanged += 1;
            continue;
        }

        let search_text = format!("{} {}", row.name, fields.actor).trim().to_string();
        vods::update_details(&mut *tx, row.vod_id, &fields, &play, &search_text).await?;
        tally.updated += 1;
    }
    tx.commit().await?;

    debug!(
        source = %source.name,
        updated = tally.updated,
        skipped = tally.skipped,
        "detail batch applied"
    );
    Ok(tally)
}

fn differs(row: &VodRow, fields: &DetailFields, play: &PlaySources) -> bool {
    let (play_from, play_url) = play.join();
    row.name_en != fields.name_en
        || row.pic != fields.pic
        || row.actor != fields.actor
        || row.director != fields.director
        || row.blurb != fields.blurb
        || row.area != fields.area
        || row.lang != fields.lang
        || row.play_from != play_from
        || row.play_url != play_url
}
