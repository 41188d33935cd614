//! Mapping suggestions for configuration tooling.
//!
//! Ingestion never calls into this module. Suggestions are only offered when a
//! name matches; there is no numeric fallback. A synonym matches a name that
//! is the synonym or ends with it, so `大陆综艺` is variety while `喜剧片`
//! (a film genre) matches nothing.

use serde::Serialize;

use crate::types::{LocalType, Taxonomy};

/// An ordered set of equivalent category words. Earlier groups win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynonymGroup {
    pub key: &'static str,
    pub synonyms: &'static [&'static str],
}

pub const DEFAULT_SYNONYM_GROUPS: &[SynonymGroup] = &[
    SynonymGroup {
        key: "movie",
        synonyms: &["movie", "movies", "film", "films", "电影"],
    },
    SynonymGroup {
        key: "tv",
        synonyms: &["drama", "dramas", "series", "电视剧", "连续剧"],
    },
    SynonymGroup {
        key: "variety",
        synonyms: &["variety", "综艺"],
    },
    SynonymGroup {
        key: "anime",
        synonyms: &["anime", "animation", "动漫", "动画"],
    },
    SynonymGroup {
        key: "documentary",
        synonyms: &["documentary", "documentaries", "纪录片"],
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "by")]
pub enum SuggestionReason {
    ExactName,
    Synonym { group: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub local_type_id: i64,
    pub local_name: String,
    pub reason: SuggestionReason,
}

/// Case-fold and drop all whitespace.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub struct Suggester<'a> {
    taxonomy: &'a Taxonomy,
    groups: &'a [SynonymGroup],
}

impl<'a> Suggester<'a> {
    pub fn new(taxonomy: &'a Taxonomy) -> Self {
        Self::with_groups(taxonomy, DEFAULT_SYNONYM_GROUPS)
    }

    pub fn with_groups(taxonomy: &'a Taxonomy, groups: &'a [SynonymGroup]) -> Self {
        Self { taxonomy, groups }
    }

    pub fn suggest(&self, remote_name: &str) -> Option<Suggestion> {
        let remote = normalize_name(remote_name);
        if remote.is_empty() {
            return None;
        }

        if let Some(local) = self
            .taxonomy
            .types()
            .iter()
            .find(|t| normalize_name(&t.name) == remote)
        {
            return Some(suggestion(local, SuggestionReason::ExactName));
        }

        let group = self
            .groups
            .iter()
            .find(|g| g.synonyms.iter().any(|s| names_kind(&remote, s)))?;

        // Within the group, the earliest synonym decides; taxonomy order breaks
        // the remaining ties.
        group.synonyms.iter().find_map(|syn| {
            self.taxonomy
                .types()
                .iter()
                .find(|t| names_kind(&normalize_name(&t.name), syn))
                .map(|local| {
                    suggestion(
                        local,
                        SuggestionReason::Synonym { group: group.key },
                    )
                })
        })
    }
}

/// `name` is normalized; synonyms are stored normalized.
fn names_kind(name: &str, synonym: &str) -> bool {
    name.ends_with(synonym)
}

fn suggestion(local: &LocalType, reason: SuggestionReason) -> Suggestion {
    Suggestion {
        local_type_id: local.type_id,
        local_name: local.name.clone(),
        reason,
    }
}
