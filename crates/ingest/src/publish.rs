use tracing::info;
use vodsync_db::snapshot::{SnapshotStore, SwapError, SwapResult};

use crate::merge::Consolidated;

/// Promote a consolidated staging snapshot to serving.
///
/// Taking [`Consolidated`] by value means an unmerged or unverified
/// snapshot cannot reach this point, and a published one cannot be reused.
pub async fn publish(
    store: &SnapshotStore,
    consolidated: Consolidated,
) -> Result<SwapResult, SwapError> {
    let merged = consolidated.summary().clone();
    let result = store.swap(consolidated.staging).await?;
    info!(
        serving = %result.serving.display(),
        groups_merged = merged.groups_merged,
        records_merged = merged.records_merged,
        "catalog published"
    );
    Ok(result)
}
