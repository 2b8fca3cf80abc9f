use crate::config::ConverterConfig;
use crate::error::{ProcessingError, Result};
use crate::models::{group_by_hour, AisRecord, HourKey};
use crate::partition::PartitionAccumulator;
use crate::readers::CsvChunkReader;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Terminal state of one source file's conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskState {
    Completed,
    Failed,
}

/// What one task reports upward once it is terminal. The set of touched
/// keys is the handoff to any downstream consumer of the partitions.
#[derive(Debug, Clone, Serialize)]
pub struct TaskOutcome {
    pub source: PathBuf,
    pub state: TaskState,
    pub error: Option<String>,
    pub rows_read: u64,
    pub rows_rejected: u64,
    pub keys_touched: BTreeSet<HourKey>,
}

impl TaskOutcome {
    pub fn failed(source: PathBuf, error: String) -> Self {
        Self {
            source,
            state: TaskState::Failed,
            error: Some(error),
            rows_read: 0,
            rows_rejected: 0,
            keys_touched: BTreeSet::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }
}

/// Drives one source file end-to-end: read a chunk, bucket it by hour,
/// merge every (key, sub-batch) pair, then read the next chunk. At most one
/// chunk's records are held in memory at a time, so memory use is bounded
/// by the configured chunk size regardless of source size.
///
/// Owned exclusively by one worker; never shared.
pub struct ConversionTask {
    source: PathBuf,
    config: Arc<ConverterConfig>,
    accumulator: Arc<PartitionAccumulator>,
    cancel: Arc<AtomicBool>,
}

impl ConversionTask {
    pub fn new(
        source: PathBuf,
        config: Arc<ConverterConfig>,
        accumulator: Arc<PartitionAccumulator>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            config,
            accumulator,
            cancel,
        }
    }

    /// Run to a terminal state. Row-level decode failures follow the
    /// configured policy; source I/O and merge failures fail the task with
    /// the row offset reached. Errors never escape as panics.
    pub fn run(&self) -> TaskOutcome {
        let mut rows_read = 0u64;
        let mut rows_rejected = 0u64;
        let mut keys_touched = BTreeSet::new();

        match self.convert(&mut rows_read, &mut rows_rejected, &mut keys_touched) {
            Ok(()) => {
                tracing::info!(
                    source = %self.source.display(),
                    rows_read,
                    rows_rejected,
                    partitions = keys_touched.len(),
                    "conversion completed"
                );
                TaskOutcome {
                    source: self.source.clone(),
                    state: TaskState::Completed,
                    error: None,
                    rows_read,
                    rows_rejected,
                    keys_touched,
                }
            }
            Err(e) => {
                tracing::error!(
                    source = %self.source.display(),
                    rows_read,
                    error = %e,
                    "conversion failed"
                );
                TaskOutcome {
                    source: self.source.clone(),
                    state: TaskState::Failed,
                    error: Some(e.to_string()),
                    rows_read,
                    rows_rejected,
                    keys_touched,
                }
            }
        }
    }

    fn convert(
        &self,
        rows_read: &mut u64,
        rows_rejected: &mut u64,
        keys_touched: &mut BTreeSet<HourKey>,
    ) -> Result<()> {
        let mut reader = CsvChunkReader::open(&self.source, &self.config)?;

        loop {
            // Cancellation is honored between chunks only; an in-progress
            // merge always commits or fails cleanly first.
            if self.cancel.load(Ordering::Relaxed) {
                return Err(ProcessingError::Cancelled);
            }

            let chunk = match reader.read_chunk()? {
                Some(chunk) => chunk,
                None => break,
            };

            *rows_read += chunk.records.len() as u64 + chunk.rejected;
            *rows_rejected += chunk.rejected;

            if chunk.records.is_empty() {
                continue;
            }

            for key in self.merge_chunk(chunk.records)? {
                keys_touched.insert(key);
            }
        }

        Ok(())
    }

    /// Bucket one chunk and merge every sub-batch. Keys within a chunk are
    /// distinct, so the merges can run in parallel on the rayon pool; the
    /// accumulator's per-key locks cover contention with other tasks.
    fn merge_chunk(&self, records: Vec<AisRecord>) -> Result<Vec<HourKey>> {
        let groups: Vec<(HourKey, Vec<AisRecord>)> = group_by_hour(records).into_iter().collect();

        groups
            .into_par_iter()
            .map(|(key, batch)| self.accumulator.merge(&key, &batch).map(|_| key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writers::AisParquetWriter;
    use std::io::Write;
    use tempfile::TempDir;

    const HEADER: &str = "MMSI,BaseDateTime,LAT,LON,SOG,COG,Heading,VesselName,IMO,CallSign,VesselType,Status,Length,Width,Draft,Cargo,TransceiverClass";

    fn write_source(dir: &TempDir, name: &str, rows: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", HEADER).unwrap();
        for row in rows {
            writeln!(file, "{}", row).unwrap();
        }
        path
    }

    fn setup(dir: &TempDir) -> (Arc<ConverterConfig>, Arc<PartitionAccumulator>) {
        let output_root = dir.path().join("out");
        let config = Arc::new(ConverterConfig::new(output_root.clone()).with_chunk_size(2));
        let accumulator = Arc::new(PartitionAccumulator::new(
            output_root,
            AisParquetWriter::new(),
        ));
        (config, accumulator)
    }

    #[test]
    fn test_task_splits_hours_into_partitions() {
        let dir = TempDir::new().unwrap();
        let source = write_source(
            &dir,
            "ais.csv",
            &[
                "477220100,2017-02-01T20:05:07,42.351,-71.041,5.9,,,,,,,,,,,,",
                "477220100,2017-02-01T21:10:00,42.352,-71.042,6.1,,,,,,,,,,,,",
            ],
        );
        let (config, accumulator) = setup(&dir);

        let task = ConversionTask::new(
            source.clone(),
            config,
            accumulator,
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = task.run();

        assert_eq!(outcome.state, TaskState::Completed);
        assert_eq!(outcome.rows_read, 2);
        assert_eq!(outcome.rows_rejected, 0);
        assert_eq!(outcome.keys_touched.len(), 2);

        for key in &outcome.keys_touched {
            assert!(key.partition_path(&dir.path().join("out")).exists());
        }
    }

    #[test]
    fn test_schema_mismatch_fails_before_any_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(&path, "MMSI,Time\n111,2017-02-01T20:05:07\n").unwrap();
        let (config, accumulator) = setup(&dir);

        let task = ConversionTask::new(path, config, accumulator, Arc::new(AtomicBool::new(false)));
        let outcome = task.run();

        assert_eq!(outcome.state, TaskState::Failed);
        assert!(outcome.keys_touched.is_empty());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_cancelled_task_reports_failure() {
        let dir = TempDir::new().unwrap();
        let source = write_source(
            &dir,
            "ais.csv",
            &["477220100,2017-02-01T20:05:07,42.351,-71.041,,,,,,,,,,,,,"],
        );
        let (config, accumulator) = setup(&dir);

        let cancel = Arc::new(AtomicBool::new(true));
        let task = ConversionTask::new(source, config, accumulator, cancel);
        let outcome = task.run();

        assert_eq!(outcome.state, TaskState::Failed);
        assert_eq!(outcome.error.as_deref(), Some("Processing cancelled"));
        assert_eq!(outcome.rows_read, 0);
    }

    #[test]
    fn test_malformed_rows_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        let source = write_source(
            &dir,
            "ais.csv",
            &[
                "111,2017-02-01T20:05:07,42.0,-71.0,,,,,,,,,,,,,",
                "222,bad-timestamp,42.0,-71.0,,,,,,,,,,,,,",
                "333,2017-02-01T20:06:00,42.0,-71.0,,,,,,,,,,,,,",
            ],
        );
        let (config, accumulator) = setup(&dir);

        let task = ConversionTask::new(
            source,
            config,
            accumulator,
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = task.run();

        assert_eq!(outcome.state, TaskState::Completed);
        assert_eq!(outcome.rows_read, 3);
        assert_eq!(outcome.rows_rejected, 1);
        assert_eq!(outcome.keys_touched.len(), 1);
    }
}
