use thiserror::Error;

/// A source whose configuration cannot be used. The source is skipped for the
/// whole run; other sources are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("source '{source_name}' has no category mapping configured")]
    EmptyMapping { source_name: String },

    #[error("remote category '{remote_type_id}' is mapped more than once")]
    DuplicateRemoteType { remote_type_id: String },

    #[error("remote category '{remote_type_id}' maps to unknown local category {local_type_id}")]
    UnknownLocalType {
        remote_type_id: String,
        local_type_id: i64,
    },

    #[error("invalid operation mode: {0}")]
    InvalidOperationMode(String),

    #[error("invalid response format: {0}")]
    InvalidFormat(String),

    #[error("unsupported response format: {0}")]
    UnsupportedFormat(String),
}

/// A single fetched record that cannot be staged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record has no remote id")]
    MissingId,

    #[error("record has no name")]
    MissingName,

    #[error("record has no play sources")]
    NoPlaySources,

    #[error("play_from has {labels} entries but play_url has {blocks}")]
    PlayMismatch { labels: usize, blocks: usize },
}
