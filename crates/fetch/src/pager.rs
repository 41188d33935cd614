//! Sequential listing pages with termination rules.

use std::time::Duration;

use tracing::{info, warn};
use vodsync_core::types::{RawRecord, Source};

use crate::FetchError;
use crate::api::{CatalogApi, ListPage};
use crate::catalog::{RemoteCategory, extract_category_catalog};
use crate::retry::RetryPolicy;

/// Which part of a source's listing to walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageWindow {
    Full,
    /// Items updated in the last `hours`. Paging stops at the first page
    /// whose items are all older than `cutoff_ts`.
    Recent { hours: u32, cutoff_ts: i64 },
}

impl PageWindow {
    pub fn recent(hours: u32, now_ts: i64) -> Self {
        Self::Recent {
            hours,
            cutoff_ts: now_ts - i64::from(hours) * 3600,
        }
    }

    fn hours(self) -> Option<u32> {
        match self {
            Self::Full => None,
            Self::Recent { hours, .. } => Some(hours),
        }
    }

    /// True when every item carries a time older than the cutoff. Items
    /// without a time count as recent.
    fn all_expired(self, items: &[RawRecord]) -> bool {
        match self {
            Self::Full => false,
            Self::Recent { cutoff_ts, .. } => {
                !items.is_empty() && items.iter().all(|r| r.time.is_some_and(|t| t < cutoff_ts))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PagerConfig {
    pub retry: RetryPolicy,
    /// Safety cap on pages per source.
    pub max_pages: u32,
    /// Pause between page requests.
    pub page_delay: Duration,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_pages: 10_000,
            page_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub enum PageOutcome {
    Page(ListPage),
    /// The page arrived but could not be decoded.
    Skipped { page: u32, reason: String },
}

/// Walks pages 1, 2, … of one source.
///
/// Stops after the last page the source reports, on an empty page, at
/// `max_pages`, or (for [`PageWindow::Recent`]) on the first page that is
/// entirely older than the window. The window rule assumes the source lists
/// items newest first; nothing checks that.
pub struct Pager<'a> {
    api: &'a dyn CatalogApi,
    source: &'a Source,
    window: PageWindow,
    config: PagerConfig,
    next: u32,
    page_count: Option<u32>,
    done: bool,
    stopped_by_window: bool,
}

impl<'a> Pager<'a> {
    pub fn new(
        api: &'a dyn CatalogApi,
        source: &'a Source,
        window: PageWindow,
        config: PagerConfig,
    ) -> Self {
        Self {
            api,
            source,
            window,
            config,
            next: 1,
            page_count: None,
            done: false,
            stopped_by_window: false,
        }
    }

    pub fn stopped_by_window(&self) -> bool {
        self.stopped_by_window
    }

    /// The next page, `None` once paging is over. An `Err` means retries
    /// were exhausted; the pager is finished after returning it.
    pub async fn next_page(&mut self) -> Option<Result<PageOutcome, FetchError>> {
        if self.done {
            return None;
        }
        let page = self.next;
        if page > self.config.max_pages {
            info!(source = %self.source.name, max_pages = self.config.max_pages, "page cap reached");
            self.done = true;
            return None;
        }
        if self.page_count.is_some_and(|count| page > count) {
            self.done = true;
            return None;
        }

        if page > 1 && !self.config.page_delay.is_zero() {
            tokio::time::sleep(self.config.page_delay).await;
        }

        let what = format!("{} page {page}", self.source.name);
        let (api, source, hours) = (self.api, self.source, self.window.hours());
        let result = self
            .config
            .retry
            .run(&what, || api.list_page(source, page, hours))
            .await;
        self.next = page + 1;

        match result {
            Ok(list) => {
                if list.page_count.is_some() {
                    self.page_count = list.page_count;
                }
                if list.items.is_empty() {
                    self.done = true;
                    return None;
                }
                if self.window.all_expired(&list.items) {
                    info!(source = %self.source.name, page, "page is older than the window, stopping");
                    self.stopped_by_window = true;
                    self.done = true;
                    return None;
                }
                Some(Ok(PageOutcome::Page(list)))
            }
            Err(FetchError::Parse(reason)) => {
                warn!(source = %self.source.name, page, reason = %reason, "skipping unreadable page");
                // Without a page count there is no way to tell where the
                // listing ends.
                if self.page_count.is_none() {
                    self.done = true;
                }
                Some(Ok(PageOutcome::Skipped { page, reason }))
            }
            Err(e) => {
                warn!(source = %self.source.name, page, error = %e, "page failed after retries");
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Everything [`fetch_listing`] collected from one source.
#[derive(Debug, Default)]
pub struct Listing {
    pub records: Vec<RawRecord>,
    pub catalog: Vec<RemoteCategory>,
    pub pages_fetched: u64,
    pub pages_skipped: u64,
    pub rejected: u64,
    pub stopped_by_window: bool,
    /// Set when the source failed part way; `records` keeps what arrived.
    pub failure: Option<FetchError>,
}

/// Walk a source's whole listing into memory.
pub async fn fetch_listing(
    api: &dyn CatalogApi,
    source: &Source,
    window: PageWindow,
    config: PagerConfig,
) -> Listing {
    let mut pager = Pager::new(api, source, window, config);
    let mut listing = Listing::default();
    let mut explicit: Vec<RemoteCategory> = Vec::new();

    while let Some(outcome) = pager.next_page().await {
        match outcome {
            Ok(PageOutcome::Page(page)) => {
                listing.pages_fetched += 1;
                listing.rejected += page.rejected;
                if explicit.is_empty() {
                    explicit = page.classes;
                }
                listing.records.extend(page.items);
            }
            Ok(PageOutcome::Skipped { .. }) => listing.pages_skipped += 1,
            Err(e) => listing.failure = Some(e),
        }
    }

    listing.stopped_by_window = pager.stopped_by_window();
    listing.catalog = extract_category_catalog(&explicit, &listing.records);
    listing
}
