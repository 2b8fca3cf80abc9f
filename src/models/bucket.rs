use crate::models::AisRecord;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The (year, month, day, hour) partition key derived from a record's
/// `BaseDateTime`, interpreted in UTC. A pure function of the timestamp,
/// stable across chunks and runs, so the same record always lands in the
/// same partition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HourKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl HourKey {
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
        }
    }

    pub fn from_record(record: &AisRecord) -> Self {
        Self::from_datetime(&record.base_date_time)
    }

    /// Partition file name, e.g. `AIS_2017_02_01_processed_hour20.parquet`.
    pub fn file_name(&self) -> String {
        format!(
            "AIS_{:04}_{:02}_{:02}_processed_hour{:02}.parquet",
            self.year, self.month, self.day, self.hour
        )
    }

    /// Hive-style partition directory below the output root:
    /// `year=YYYY/month=MM/day=DD/hour=HH`.
    pub fn partition_dir(&self, root: &Path) -> PathBuf {
        root.join(format!("year={:04}", self.year))
            .join(format!("month={:02}", self.month))
            .join(format!("day={:02}", self.day))
            .join(format!("hour={:02}", self.hour))
    }

    pub fn partition_path(&self, root: &Path) -> PathBuf {
        self.partition_dir(root).join(self.file_name())
    }
}

impl std::fmt::Display for HourKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} hour {:02}",
            self.year, self.month, self.day, self.hour
        )
    }
}

/// Group a chunk of records by hour, preserving intra-bucket arrival order.
/// The `BTreeMap` gives a deterministic cross-bucket iteration order.
pub fn group_by_hour(records: Vec<AisRecord>) -> BTreeMap<HourKey, Vec<AisRecord>> {
    let mut groups: BTreeMap<HourKey, Vec<AisRecord>> = BTreeMap::new();
    for record in records {
        let key = HourKey::from_record(&record);
        groups.entry(key).or_default().push(record);
    }
    groups
}
