//! Per-run bookkeeping.
//!
//! Counters live in a [`SourceReport`] owned by whoever processes that source
//! during one run. Reports are folded into a [`RunSummary`] at the end;
//! nothing here is process-global.

use serde::Serialize;
use tracing::warn;

use crate::types::{CollectionMode, RawRecord, Source};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source_id: i64,
    pub source_name: String,
    pub pages_fetched: u64,
    pub pages_skipped: u64,
    pub records_fetched: u64,
    pub records_skipped_unmapped: u64,
    pub records_rejected: u64,
    pub records_inserted: u64,
    pub records_updated: u64,
    pub records_unchanged: u64,
    /// Records the source's operation mode told us to leave alone.
    pub records_skipped_by_mode: u64,
    pub details_updated: u64,
    pub stopped_by_window: bool,
    pub failure: Option<String>,
    #[serde(skip)]
    skip_report_limit: u64,
}

impl SourceReport {
    /// `skip_report_limit` is how many unmapped drops get their own log line.
    pub fn new(source: &Source, skip_report_limit: u64) -> Self {
        Self {
            source_id: source.id,
            source_name: source.name.clone(),
            skip_report_limit,
            ..Default::default()
        }
    }

    /// Count a record dropped because its remote category is unmapped.
    pub fn record_unmapped(&mut self, record: &RawRecord) {
        self.records_skipped_unmapped += 1;
        if self.records_skipped_unmapped <= self.skip_report_limit {
            warn!(
                source = %self.source_name,
                name = %record.name,
                remote_type_id = %record.remote_type_id,
                remote_type_name = %record.remote_type_name,
                "dropping record with unmapped category"
            );
        }
    }

    /// Log the tail of unmapped drops that were not reported one by one.
    pub fn flush_unmapped(&self) {
        if self.records_skipped_unmapped > self.skip_report_limit {
            warn!(
                source = %self.source_name,
                skipped = self.records_skipped_unmapped,
                unreported = self.records_skipped_unmapped - self.skip_report_limit,
                "records dropped for unmapped categories"
            );
        }
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.failure = Some(reason.into());
    }

    pub fn failed(&self) -> bool {
        self.failure.is_some()
    }

    pub fn records_ingested(&self) -> u64 {
        self.records_inserted + self.records_updated
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSource {
    pub source_id: i64,
    pub source_name: String,
    pub reason: String,
}

/// Returned by every collection entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub mode: CollectionMode,
    pub sources_processed: u64,
    pub records_fetched: u64,
    pub records_skipped_unmapped: u64,
    pub records_rejected: u64,
    pub records_ingested: u64,
    pub details_updated: u64,
    pub records_merged: u64,
    pub groups_merged: u64,
    pub failed_sources: Vec<FailedSource>,
    pub rejected_sources: Vec<FailedSource>,
    pub published: bool,
    pub duration_ms: u64,
    pub sources: Vec<SourceReport>,
}

impl RunSummary {
    pub fn new(run_id: impl Into<String>, mode: CollectionMode) -> Self {
        Self {
            run_id: run_id.into(),
            mode,
            sources_processed: 0,
            records_fetched: 0,
            records_skipped_unmapped: 0,
            records_rejected: 0,
            records_ingested: 0,
            details_updated: 0,
            records_merged: 0,
            groups_merged: 0,
            failed_sources: Vec::new(),
            rejected_sources: Vec::new(),
            published: false,
            duration_ms: 0,
            sources: Vec::new(),
        }
    }

    /// Fold one processed source into the totals.
    pub fn absorb(&mut self, report: SourceReport) {
        self.sources_processed += 1;
        self.records_fetched += report.records_fetched;
        self.records_skipped_unmapped += report.records_skipped_unmapped;
        self.records_rejected += report.records_rejected;
        self.records_ingested += report.records_ingested();
        self.details_updated += report.details_updated;
        if let Some(reason) = &report.failure {
            self.failed_sources.push(FailedSource {
                source_id: report.source_id,
                source_name: report.source_name.clone(),
                reason: reason.clone(),
            });
        }
        self.sources.push(report);
    }

    /// Record a source rejected for configuration before any fetch.
    pub fn reject(&mut self, source_id: i64, source_name: &str, reason: impl Into<String>) {
        self.rejected_sources.push(FailedSource {
            source_id,
            source_name: source_name.to_string(),
            reason: reason.into(),
        });
    }

    /// Whether staging differs from the serving snapshot it was copied from.
    pub fn changed_catalog(&self) -> bool {
        self.records_ingested > 0 || self.details_updated > 0 || self.records_merged > 0
    }
}
