//! Mapping suggestions for one source's remote categories.
//!
//! Reads serving and the remote listing only; nothing is written.

use serde::Serialize;
use tracing::info;
use vodsync_core::mapping::CategoryMapping;
use vodsync_core::suggest::{Suggester, Suggestion};
use vodsync_core::types::Source;
use vodsync_db::repo::{sources, taxonomy};
use vodsync_db::snapshot::SnapshotStore;
use vodsync_fetch::api::CatalogApi;
use vodsync_fetch::catalog::extract_category_catalog;
use vodsync_fetch::retry::RetryPolicy;

use crate::CollectError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySuggestion {
    pub remote_type_id: String,
    pub remote_name: String,
    /// Local category the stored mapping already sends this id to.
    pub mapped_to: Option<i64>,
    pub suggestion: Option<Suggestion>,
}

pub async fn suggest_categories(
    store: &SnapshotStore,
    api: &dyn CatalogApi,
    retry: RetryPolicy,
    source_prefix: &str,
) -> Result<Vec<CategorySuggestion>, CollectError> {
    let pool = store.open_serving().await?;
    let row = sources::find_by_prefix(&pool, source_prefix)
        .await?
        .ok_or_else(|| CollectError::UnknownSource(source_prefix.to_string()))?;
    let pairs = sources::get_mapping(&pool, row.id).await?;
    let taxonomy = taxonomy::load(&pool).await?;
    pool.close().await;

    // The stored mapping may be empty or invalid; that is what suggestions
    // are for, so the source is built without one.
    let source = Source {
        id: row.id,
        name: row.name.clone(),
        id_prefix: row.id_prefix.clone(),
        api_url: row.api_url.clone(),
        format: row.data_format.parse()?,
        mode: row.operation_mode.parse()?,
        mapping: CategoryMapping::default(),
    };

    let what = format!("{} page 1", source.name);
    let page = retry.run(&what, || api.list_page(&source, 1, None)).await?;
    let catalog = extract_category_catalog(&page.classes, &page.items);
    info!(source = %source.name, categories = catalog.len(), "remote categories listed");

    let suggester = Suggester::new(&taxonomy);
    Ok(catalog
        .into_iter()
        .map(|category| {
            let mapped_to = pairs
                .iter()
                .find(|(remote, _)| remote.trim() == category.remote_type_id.trim())
                .map(|(_, local)| *local);
            CategorySuggestion {
                suggestion: suggester.suggest(&category.name),
                mapped_to,
                remote_type_id: category.remote_type_id,
                remote_name: category.name,
            }
        })
        .collect())
}
