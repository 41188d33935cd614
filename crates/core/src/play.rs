//! Play-source sequences.
//!
//! A record's `play_from` and `play_url` columns are two index-parallel
//! sequences joined with [`PLAY_DELIMITER`]: entry `i` of `play_from` labels
//! the episode block at entry `i` of `play_url`.

use crate::error::RecordError;

/// Separator between entries of `play_from` and `play_url`.
pub const PLAY_DELIMITER: &str = "$$$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySource {
    pub label: String,
    pub episodes: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaySources(Vec<PlaySource>);

impl PlaySources {
    /// Parse the two delimited columns. Empty labels take `default_label`.
    ///
    /// An empty `play_url` yields an empty sequence regardless of `play_from`:
    /// list endpoints often announce players without sending episode blocks.
    pub fn parse(
        play_from: &str,
        play_url: &str,
        default_label: &str,
    ) -> Result<Self, RecordError> {
        if play_url.trim().is_empty() {
            return Ok(Self::default());
        }

        let blocks: Vec<&str> = play_url.split(PLAY_DELIMITER).collect();
        let labels: Vec<&str> = if play_from.trim().is_empty() {
            vec![""; blocks.len()]
        } else {
            play_from.split(PLAY_DELIMITER).collect()
        };

        if labels.len() != blocks.len() {
            return Err(RecordError::PlayMismatch {
                labels: labels.len(),
                blocks: blocks.len(),
            });
        }

        Ok(Self(
            labels
                .into_iter()
                .zip(blocks)
                .map(|(label, episodes)| {
                    let label = label.trim();
                    PlaySource {
                        label: if label.is_empty() {
                            default_label.to_string()
                        } else {
                            label.to_string()
                        },
                        episodes: episodes.trim().to_string(),
                    }
                })
                .collect(),
        ))
    }

    pub fn from_entries(entries: Vec<PlaySource>) -> Self {
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn entries(&self) -> &[PlaySource] {
        &self.0
    }

    pub fn contains_label(&self, label: &str) -> bool {
        self.0.iter().any(|p| p.label == label)
    }

    /// Join back into `(play_from, play_url)`.
    pub fn join(&self) -> (String, String) {
        let from = self
            .0
            .iter()
            .map(|p| p.label.as_str())
            .collect::<Vec<_>>()
            .join(PLAY_DELIMITER);
        let url = self
            .0
            .iter()
            .map(|p| p.episodes.as_str())
            .collect::<Vec<_>>()
            .join(PLAY_DELIMITER);
        (from, url)
    }

    /// Fold `other` into `self`: a label already present gets its block
    /// replaced in place, a new label is appended. Returns whether anything
    /// changed.
    pub fn overlay(&mut self, other: &PlaySources) -> bool {
        let mut changed = false;
        for incoming in &other.0 {
            match self.0.iter_mut().find(|p| p.label == incoming.label) {
                Some(existing) => {
                    if existing.episodes != incoming.episodes {
                        existing.episodes = incoming.episodes.clone();
                        changed = true;
                    }
                }
                None => {
                    self.0.push(incoming.clone());
                    changed = true;
                }
            }
        }
        changed
    }

    /// Append the entries of `other` whose label is not present yet. A label
    /// already present keeps its block. Returns the appended labels.
    pub fn absorb(&mut self, other: &PlaySources) -> Vec<String> {
        let mut appended = Vec::new();
        for incoming in &other.0 {
            if !self.contains_label(&incoming.label) {
                self.0.push(incoming.clone());
                appended.push(incoming.label.clone());
            }
        }
        appended
    }

    /// Fold in sources of a record that was merged into this one. `owned`
    /// holds the labels that record contributed: their blocks are replaced,
    /// new labels are appended and become owned, labels owned by anyone else
    /// are left alone. Returns whether anything changed.
    pub fn overlay_owned(&mut self, other: &PlaySources, owned: &mut Vec<String>) -> bool {
        let mut changed = false;
        for incoming in &other.0 {
            match self.0.iter_mut().find(|p| p.label == incoming.label) {
                Some(existing) if owned.contains(&incoming.label) => {
                    if existing.episodes != incoming.episodes {
                        existing.episodes = incoming.episodes.clone();
                        changed = true;
                    }
                }
                Some(_) => {}
                None => {
                    self.0.push(incoming.clone());
                    owned.push(incoming.label.clone());
                    changed = true;
                }
            }
        }
        changed
    }
}
