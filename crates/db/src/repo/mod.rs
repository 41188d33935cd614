pub mod aliases;
pub mod merge_log;
pub mod sources;
pub mod taxonomy;
pub mod vods;
