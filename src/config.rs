use crate::error::{ProcessingError, Result};
use crate::utils::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_ROW_GROUP_SIZE};
use std::path::PathBuf;
use std::str::FromStr;

/// What to do with a row whose required fields cannot be parsed.
///
/// Upstream AIS feeds are known to contain sparse malformed rows, so
/// `Drop` (count and skip) is the default; `Abort` fails the whole file
/// on the first bad row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedRowPolicy {
    Drop,
    Abort,
}

impl FromStr for MalformedRowPolicy {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(MalformedRowPolicy::Drop),
            "abort" => Ok(MalformedRowPolicy::Abort),
            other => Err(ProcessingError::Config(format!(
                "Unknown malformed-row policy: {}",
                other
            ))),
        }
    }
}

/// Run-wide conversion settings, constructed once from CLI arguments and
/// passed into every component. No component reads ambient configuration.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    pub output_root: PathBuf,
    pub chunk_size: usize,
    pub compression: String,
    pub row_group_size: usize,
    pub malformed_rows: MalformedRowPolicy,
    pub use_mmap: bool,
}

impl ConverterConfig {
    pub fn new(output_root: PathBuf) -> Self {
        Self {
            output_root,
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: "snappy".to_string(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            malformed_rows: MalformedRowPolicy::Drop,
            use_mmap: false,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_compression(mut self, compression: &str) -> Self {
        self.compression = compression.to_string();
        self
    }

    pub fn with_row_group_size(mut self, row_group_size: usize) -> Self {
        self.row_group_size = row_group_size;
        self
    }

    pub fn with_malformed_rows(mut self, policy: MalformedRowPolicy) -> Self {
        self.malformed_rows = policy;
        self
    }

    pub fn with_mmap(mut self, use_mmap: bool) -> Self {
        self.use_mmap = use_mmap;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ProcessingError::Config(
                "Chunk size must be greater than zero".to_string(),
            ));
        }
        if self.row_group_size == 0 {
            return Err(ProcessingError::Config(
                "Row group size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
