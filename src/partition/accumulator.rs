use crate::error::{ProcessingError, Result};
use crate::models::{AisRecord, HourKey};
use crate::writers::AisParquetWriter;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Merges record batches into on-disk hour partitions.
///
/// Concurrency discipline: one mutex per HourKey, taken for the whole
/// read-modify-write of that key's file. Merges for distinct keys run fully
/// in parallel; merges for the same key are strictly serialized. There is no
/// global lock around the file I/O itself.
///
/// Durability discipline: the combined content is written to a temporary
/// file in the destination directory and atomically renamed over the target,
/// so a reader never observes a partially-written partition and a failed
/// merge leaves the previous version intact.
pub struct PartitionAccumulator {
    output_root: PathBuf,
    writer: AisParquetWriter,
    locks: Mutex<HashMap<HourKey, Arc<Mutex<()>>>>,
}

impl PartitionAccumulator {
    pub fn new(output_root: PathBuf, writer: AisParquetWriter) -> Self {
        Self {
            output_root,
            writer,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn output_root(&self) -> &PathBuf {
        &self.output_root
    }

    /// Append `batch` to the partition for `key`, creating the file if this
    /// is the key's first batch. Returns the total row count of the
    /// partition after the merge.
    pub fn merge(&self, key: &HourKey, batch: &[AisRecord]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }

        let key_lock = self.lock_for(key);
        let _guard = key_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let dir = key.partition_dir(&self.output_root);
        std::fs::create_dir_all(&dir)?;
        let dest = key.partition_path(&self.output_root);

        let schema = AisParquetWriter::create_schema();
        let mut batches = Vec::new();

        if dest.exists() {
            let (existing_schema, existing) = self.writer.read_batches(&dest)?;
            if existing_schema.fields() != schema.fields() {
                return Err(ProcessingError::Merge(format!(
                    "existing partition {} has an incompatible schema",
                    dest.display()
                )));
            }
            batches.extend(existing);
        }

        batches.push(AisParquetWriter::records_to_batch(batch, schema.clone())?);
        let total_rows: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();

        // Stage the combined content next to the destination so the final
        // rename stays on one filesystem.
        let tmp = tempfile::Builder::new()
            .prefix(".merge-")
            .suffix(".parquet")
            .tempfile_in(&dir)?;

        let handle = tmp.as_file().try_clone()?;
        self.writer.write_batches(handle, schema, &batches)?;

        tmp.persist(&dest)
            .map_err(|e| ProcessingError::Merge(format!("failed to replace {}: {}", dest.display(), e.error)))?;

        tracing::debug!(key = %key, rows = total_rows, "merged batch into partition");
        Ok(total_rows)
    }

    fn lock_for(&self, key: &HourKey) -> Arc<Mutex<()>> {
        let mut registry = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        registry.entry(*key).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn record(mmsi: &str, second: u32) -> AisRecord {
        AisRecord {
            mmsi: mmsi.to_string(),
            base_date_time: NaiveDate::from_ymd_opt(2017, 2, 1)
                .unwrap()
                .and_hms_opt(20, 5, second)
                .unwrap(),
            lat: 42.351,
            lon: -71.041,
            sog: Some(5.9),
            cog: None,
            heading: None,
            vessel_name: None,
            imo: None,
            call_sign: None,
            vessel_type: None,
            status: None,
            length: None,
            width: None,
            draft: None,
            cargo: None,
            transceiver_class: None,
        }
    }

    fn key() -> HourKey {
        HourKey {
            year: 2017,
            month: 2,
            day: 1,
            hour: 20,
        }
    }

    #[test]
    fn test_first_merge_creates_partition() {
        let dir = TempDir::new().unwrap();
        let acc = PartitionAccumulator::new(dir.path().to_path_buf(), AisParquetWriter::new());

        let rows = acc.merge(&key(), &[record("111", 0), record("222", 1)]).unwrap();
        assert_eq!(rows, 2);
        assert!(key().partition_path(dir.path()).exists());
    }

    #[test]
    fn test_second_merge_appends_in_order() {
        let dir = TempDir::new().unwrap();
        let acc = PartitionAccumulator::new(dir.path().to_path_buf(), AisParquetWriter::new());

        acc.merge(&key(), &[record("111", 0)]).unwrap();
        let rows = acc.merge(&key(), &[record("222", 1)]).unwrap();
        assert_eq!(rows, 2);

        let writer = AisParquetWriter::new();
        let records = writer
            .read_sample_records(&key().partition_path(dir.path()), 10)
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].mmsi, "111");
        assert_eq!(records[1].mmsi, "222");
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = TempDir::new().unwrap();
        let acc = PartitionAccumulator::new(dir.path().to_path_buf(), AisParquetWriter::new());

        assert_eq!(acc.merge(&key(), &[]).unwrap(), 0);
        assert!(!key().partition_path(dir.path()).exists());
    }

    #[test]
    fn test_concurrent_merges_into_one_key_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let acc = Arc::new(PartitionAccumulator::new(
            dir.path().to_path_buf(),
            AisParquetWriter::new(),
        ));

        let threads = 8;
        let rows_per_thread = 50;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let acc = acc.clone();
                std::thread::spawn(move || {
                    let batch: Vec<AisRecord> = (0..rows_per_thread)
                        .map(|i| record(&format!("{}{:03}", t, i), i as u32 % 60))
                        .collect();
                    acc.merge(&key(), &batch).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let writer = AisParquetWriter::new();
        let info = writer.get_file_info(&key().partition_path(dir.path())).unwrap();
        assert_eq!(info.total_rows, (threads * rows_per_thread) as i64);
    }

    #[test]
    fn test_distinct_keys_write_distinct_files() {
        let dir = TempDir::new().unwrap();
        let acc = PartitionAccumulator::new(dir.path().to_path_buf(), AisParquetWriter::new());

        let hour21 = HourKey { hour: 21, ..key() };
        acc.merge(&key(), &[record("111", 0)]).unwrap();
        acc.merge(&hour21, &[record("222", 1)]).unwrap();

        assert!(key().partition_path(dir.path()).exists());
        assert!(hour21.partition_path(dir.path()).exists());
    }
}
