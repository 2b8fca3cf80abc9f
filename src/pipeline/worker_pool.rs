use crate::config::ConverterConfig;
use crate::error::Result;
use crate::models::HourKey;
use crate::partition::PartitionAccumulator;
use crate::pipeline::{ConversionTask, TaskOutcome};
use crate::utils::progress::ProgressReporter;
use crate::writers::AisParquetWriter;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Aggregated per-task outcomes for one run. This ledger is the sole
/// completion signal handed to downstream steps.
#[derive(Debug, Serialize)]
pub struct RunLedger {
    pub outcomes: Vec<TaskOutcome>,
}

impl RunLedger {
    pub fn completed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_completed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.completed_count()
    }

    pub fn total_rows_read(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows_read).sum()
    }

    pub fn total_rows_rejected(&self) -> u64 {
        self.outcomes.iter().map(|o| o.rows_rejected).sum()
    }

    /// Union of every partition key any task touched, in key order.
    pub fn touched_keys(&self) -> BTreeSet<HourKey> {
        self.outcomes
            .iter()
            .flat_map(|o| o.keys_touched.iter().copied())
            .collect()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Run Summary:\n\
            - Sources: {} ({} completed, {} failed)\n\
            - Rows read: {}\n\
            - Rows rejected: {}\n\
            - Partitions touched: {}\n",
            self.outcomes.len(),
            self.completed_count(),
            self.failed_count(),
            self.total_rows_read(),
            self.total_rows_rejected(),
            self.touched_keys().len(),
        );

        for outcome in &self.outcomes {
            match &outcome.error {
                None => summary.push_str(&format!(
                    "  • {}: ok ({} rows, {} rejected)\n",
                    outcome.source.display(),
                    outcome.rows_read,
                    outcome.rows_rejected
                )),
                Some(error) => summary.push_str(&format!(
                    "  • {}: FAILED at row {} ({})\n",
                    outcome.source.display(),
                    outcome.rows_read,
                    error
                )),
            }
        }

        summary
    }
}

/// Runs up to `max_workers` conversion tasks at a time over a queue of
/// source files. A finished task frees its slot for the next queued source.
/// One task's failure is recorded in the ledger and never cancels the
/// others; a worker panic is converted into a failed outcome the same way.
pub struct WorkerPool {
    config: Arc<ConverterConfig>,
    accumulator: Arc<PartitionAccumulator>,
    cancel: Arc<AtomicBool>,
    max_workers: usize,
}

impl WorkerPool {
    pub fn new(config: Arc<ConverterConfig>, max_workers: usize) -> Result<Self> {
        config.validate()?;

        let writer = AisParquetWriter::new()
            .with_compression(&config.compression)?
            .with_row_group_size(config.row_group_size);
        let accumulator = Arc::new(PartitionAccumulator::new(
            config.output_root.clone(),
            writer,
        ));

        Ok(Self {
            config,
            accumulator,
            cancel: Arc::new(AtomicBool::new(false)),
            max_workers: max_workers.max(1),
        })
    }

    /// Flag checked by every task between chunks. Setting it drains the
    /// pool without starting new chunks.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub async fn run(
        &self,
        sources: Vec<PathBuf>,
        progress: Option<&ProgressReporter>,
    ) -> Result<RunLedger> {
        let mut join_set: JoinSet<TaskOutcome> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, PathBuf> = HashMap::new();
        let mut outcomes = Vec::with_capacity(sources.len());

        for source in sources {
            while join_set.len() >= self.max_workers {
                Self::collect_next(&mut join_set, &mut in_flight, &mut outcomes, progress).await;
            }

            if self.cancel.load(Ordering::Relaxed) {
                tracing::warn!(source = %source.display(), "run cancelled, source not started");
                outcomes.push(TaskOutcome::failed(
                    source,
                    "Processing cancelled".to_string(),
                ));
                continue;
            }

            let task = ConversionTask::new(
                source.clone(),
                self.config.clone(),
                self.accumulator.clone(),
                self.cancel.clone(),
            );
            let handle = join_set.spawn_blocking(move || task.run());
            in_flight.insert(handle.id(), source);
        }

        while !join_set.is_empty() {
            Self::collect_next(&mut join_set, &mut in_flight, &mut outcomes, progress).await;
        }

        Ok(RunLedger { outcomes })
    }

    async fn collect_next(
        join_set: &mut JoinSet<TaskOutcome>,
        in_flight: &mut HashMap<tokio::task::Id, PathBuf>,
        outcomes: &mut Vec<TaskOutcome>,
        progress: Option<&ProgressReporter>,
    ) {
        if let Some(result) = join_set.join_next_with_id().await {
            let outcome = match result {
                Ok((id, outcome)) => {
                    in_flight.remove(&id);
                    outcome
                }
                Err(join_error) => {
                    // A panicked worker must still leave a ledger entry.
                    let source = in_flight.remove(&join_error.id()).unwrap_or_default();
                    tracing::error!(source = %source.display(), %join_error, "worker terminated abnormally");
                    TaskOutcome::failed(source, format!("worker terminated: {}", join_error))
                }
            };

            if let Some(p) = progress {
                p.increment(1);
            }
            outcomes.push(outcome);
        }
    }
}
