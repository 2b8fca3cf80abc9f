pub mod conversion_task;
pub mod worker_pool;

pub use conversion_task::{ConversionTask, TaskOutcome, TaskState};
pub use worker_pool::{RunLedger, WorkerPool};
