use tracing::debug;
use vodsync_core::types::{RawRecord, Source};

use crate::FetchError;
use crate::api::CatalogApi;
use crate::retry::RetryPolicy;

#[derive(Debug, Default)]
pub struct DetailBatch {
    pub records: Vec<RawRecord>,
    pub rejected: u64,
    pub requests: u64,
}

/// Fetch detail records for `remote_ids` in batches of `batch_size`.
///
/// Stops at the first batch that fails after retries; the error is returned
/// with everything fetched so far.
pub async fn fetch_details(
    api: &dyn CatalogApi,
    source: &Source,
    remote_ids: &[String],
    batch_size: usize,
    retry: RetryPolicy,
) -> (DetailBatch, Option<FetchError>) {
    let mut out = DetailBatch::default();

    for chunk in remote_ids.chunks(batch_size.max(1)) {
        let what = format!("{} detail x{}", source.name, chunk.len());
        match retry.run(&what, || api.detail(source, chunk)).await {
            Ok(page) => {
                debug!(source = %source.name, requested = chunk.len(), returned = page.items.len(), "detail batch");
                out.requests += 1;
                out.rejected += page.rejected;
                out.records.extend(page.items);
            }
            Err(FetchError::Parse(reason)) => {
                debug!(source = %source.name, reason = %reason, "unreadable detail batch skipped");
                out.requests += 1;
            }
            Err(e) => return (out, Some(e)),
        }
    }

    (out, None)
}
