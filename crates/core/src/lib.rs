pub mod error;
pub mod mapping;
pub mod play;
pub mod record;
pub mod report;
pub mod suggest;
pub mod types;

pub use suggest::normalize_name;
