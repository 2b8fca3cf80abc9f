pub mod bucket;
pub mod record;

pub use bucket::{group_by_hour, HourKey};
pub use record::AisRecord;
