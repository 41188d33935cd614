use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mapping::CategoryMapping;

/// Per-source write policy stored in the `source.operation_mode` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    AddUpdate,
    Add,
    Update,
}

impl OperationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddUpdate => "add_update",
            Self::Add => "add",
            Self::Update => "update",
        }
    }

    /// Whether a record that already exists in staging gets overwritten.
    pub fn overwrites_existing(self) -> bool {
        matches!(self, Self::AddUpdate | Self::Update)
    }

    /// Whether a record that is absent from staging gets inserted.
    pub fn inserts_missing(self) -> bool {
        matches!(self, Self::AddUpdate | Self::Add)
    }
}

impl std::fmt::Display for OperationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "add_update" | "" => Ok(Self::AddUpdate),
            "add" => Ok(Self::Add),
            "update" => Ok(Self::Update),
            other => Err(ConfigError::InvalidOperationMode(other.to_string())),
        }
    }
}

/// Wire format of a source's API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    Xml,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }
}

impl std::fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResponseFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Err(ConfigError::InvalidFormat(other.to_string())),
        }
    }
}

/// Which batch job a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionMode {
    Full,
    Incremental { window_hours: u32 },
    DetailsOnly,
}

impl CollectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental { .. } => "incremental",
            Self::DetailsOnly => "details_only",
        }
    }
}

impl std::fmt::Display for CollectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Incremental { window_hours } => write!(f, "incremental ({window_hours}h)"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One local category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalType {
    pub type_id: i64,
    pub name: String,
    pub parent_id: i64,
}

/// The local category tree, read once per run and never mutated by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    types: Vec<LocalType>,
}

impl Taxonomy {
    pub fn new(types: Vec<LocalType>) -> Self {
        Self { types }
    }

    pub fn contains(&self, type_id: i64) -> bool {
        self.types.iter().any(|t| t.type_id == type_id)
    }

    pub fn get(&self, type_id: i64) -> Option<&LocalType> {
        self.types.iter().find(|t| t.type_id == type_id)
    }

    pub fn types(&self) -> &[LocalType] {
        &self.types
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// A configured remote catalog, with its mapping already validated.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub id_prefix: String,
    pub api_url: String,
    pub format: ResponseFormat,
    pub mode: OperationMode,
    pub mapping: CategoryMapping,
}

impl Source {
    /// Source-prefixed unique id for a remote record id.
    pub fn unique_id(&self, remote_id: &str) -> String {
        format!("{}{}", self.id_prefix, remote_id)
    }

    /// Strip this source's prefix from a unique id.
    pub fn remote_id<'a>(&self, unique_id: &'a str) -> Option<&'a str> {
        unique_id.strip_prefix(self.id_prefix.as_str())
    }
}

/// One item as returned by a remote listing or detail endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub remote_id: String,
    pub name: String,
    pub name_en: String,
    pub remote_type_id: String,
    pub remote_type_name: String,
    pub play_from: String,
    pub play_url: String,
    pub year: String,
    pub pic: String,
    pub remarks: String,
    pub actor: String,
    pub director: String,
    pub blurb: String,
    pub area: String,
    pub lang: String,
    pub class: String,
    /// Last update time in unix seconds, when the source sent a parseable one.
    pub time: Option<i64>,
    pub hits: i64,
}

impl RawRecord {
    pub fn has_play_data(&self) -> bool {
        !self.play_url.trim().is_empty()
    }
}
