use vodsync_core::types::{RawRecord, ResponseFormat, Source};

use crate::FetchError;
use crate::catalog::RemoteCategory;

/// A remote catalog that can be listed page by page and queried by id.
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this client can read responses in `format`.
    fn supports(&self, format: ResponseFormat) -> bool;

    /// Fetch listing page `page` (1-based). With `window_hours`, the source
    /// is asked for items updated within that many hours.
    async fn list_page(
        &self,
        source: &Source,
        page: u32,
        window_hours: Option<u32>,
    ) -> Result<ListPage, FetchError>;

    /// Fetch full records for `remote_ids`.
    async fn detail(&self, source: &Source, remote_ids: &[String])
    -> Result<ListPage, FetchError>;
}

/// One decoded response page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListPage {
    pub page: u32,
    /// Last page number reported by the source.
    pub page_count: Option<u32>,
    pub items: Vec<RawRecord>,
    /// Top-level class list, when the source sends one.
    pub classes: Vec<RemoteCategory>,
    /// Items dropped while decoding (no id or no name).
    pub rejected: u64,
}
