use crate::error::RecordError;
use crate::play::PlaySources;
use crate::types::{RawRecord, Source};

/// A fetched record that passed classification and play-source validation,
/// ready to be written to staging.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    pub unique_id: String,
    pub source_id: i64,
    pub name: String,
    pub name_en: String,
    pub year: String,
    pub type_id: i64,
    pub pic: String,
    pub remarks: String,
    pub play: PlaySources,
    pub actor: String,
    pub director: String,
    pub blurb: String,
    pub area: String,
    pub lang: String,
    pub class: String,
    pub time_ts: i64,
    pub hits: i64,
}

impl StagedRecord {
    /// Stage `raw` under `type_id`, which the caller resolved through the
    /// source's mapping. `now` stands in for a missing or unparseable time.
    pub fn stage(
        raw: RawRecord,
        type_id: i64,
        source: &Source,
        now: i64,
    ) -> Result<Self, RecordError> {
        let remote_id = raw.remote_id.trim();
        if remote_id.is_empty() {
            return Err(RecordError::MissingId);
        }
        let name = raw.name.trim();
        if name.is_empty() {
            return Err(RecordError::MissingName);
        }

        let play = PlaySources::parse(&raw.play_from, &raw.play_url, &source.name)?;
        if play.is_empty() {
            return Err(RecordError::NoPlaySources);
        }

        Ok(Self {
            unique_id: source.unique_id(remote_id),
            source_id: source.id,
            name: name.to_string(),
            name_en: raw.name_en,
            year: raw.year.trim().to_string(),
            type_id,
            pic: raw.pic,
            remarks: raw.remarks,
            play,
            actor: raw.actor,
            director: raw.director,
            blurb: raw.blurb,
            area: raw.area,
            lang: raw.lang,
            class: raw.class,
            time_ts: raw.time.unwrap_or(now),
            hits: raw.hits,
        })
    }

    pub fn search_text(&self) -> String {
        format!("{} {}", self.name, self.actor).trim().to_string()
    }
}
