use std::collections::HashSet;

use serde::Serialize;
use vodsync_core::types::RawRecord;

/// A category as the remote source names it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCategory {
    pub remote_type_id: String,
    pub name: String,
}

/// The remote categories seen in a response. An explicit class list wins;
/// otherwise categories are derived from the items, keeping the first name
/// seen for each remote type id.
pub fn extract_category_catalog(
    explicit: &[RemoteCategory],
    items: &[RawRecord],
) -> Vec<RemoteCategory> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }

    let mut seen = HashSet::new();
    items
        .iter()
        .filter(|r| !r.remote_type_id.is_empty())
        .filter(|r| seen.insert(r.remote_type_id.as_str()))
        .map(|r| RemoteCategory {
            remote_type_id: r.remote_type_id.clone(),
            name: r.remote_type_name.clone(),
        })
        .collect()
}
