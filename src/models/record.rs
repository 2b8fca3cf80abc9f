use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// One decoded AIS position report. Immutable once produced by the decoder;
/// ownership moves through bucketing into the partition merge.
///
/// Text identifiers are kept verbatim (MMSI and IMO routinely carry leading
/// zeros); every nullable column is `None` when the source field was empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AisRecord {
    pub mmsi: String,
    pub base_date_time: NaiveDateTime,

    #[validate(range(min = -90.0, max = 90.0))]
    pub lat: f64,

    #[validate(range(min = -180.0, max = 180.0))]
    pub lon: f64,

    pub sog: Option<f32>,
    pub cog: Option<f32>,
    pub heading: Option<f32>,
    pub vessel_name: Option<String>,
    pub imo: Option<String>,
    pub call_sign: Option<String>,
    pub vessel_type: Option<i32>,
    pub status: Option<i32>,
    pub length: Option<f32>,
    pub width: Option<f32>,
    pub draft: Option<f32>,
    pub cargo: Option<String>,
    pub transceiver_class: Option<String>,
}
