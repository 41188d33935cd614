//! Remote → local category mapping under strict mode.
//!
//! A mapping is an ordered list of `(remote_type_id, local_type_id)` pairs,
//! validated once against the local taxonomy when a run starts. There is no
//! default category: a remote id without an entry is unmapped, and a record
//! carrying it is dropped.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::ConfigError;
use crate::types::Taxonomy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MappingEntry {
    pub remote_type_id: String,
    pub local_type_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryMapping {
    entries: Vec<MappingEntry>,
}

impl CategoryMapping {
    /// Build a mapping, rejecting duplicate remote ids and local ids that do
    /// not exist in `taxonomy`. Remote ids are compared after trimming.
    pub fn new<I, S>(pairs: I, taxonomy: &Taxonomy) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for (remote, local) in pairs {
            let remote_type_id = remote.into().trim().to_string();
            if !seen.insert(remote_type_id.clone()) {
                return Err(ConfigError::DuplicateRemoteType { remote_type_id });
            }
            if !taxonomy.contains(local) {
                return Err(ConfigError::UnknownLocalType {
                    remote_type_id,
                    local_type_id: local,
                });
            }
            entries.push(MappingEntry {
                remote_type_id,
                local_type_id: local,
            });
        }

        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Resolve a remote category. `None` means unmapped; the caller drops the
    /// record and counts it.
    pub fn classify(&self, remote_type_id: &str) -> Option<i64> {
        let remote_type_id = remote_type_id.trim();
        self.entries
            .iter()
            .find(|e| e.remote_type_id == remote_type_id)
            .map(|e| e.local_type_id)
    }
}
