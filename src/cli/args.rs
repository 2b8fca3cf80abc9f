use crate::utils::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_ROW_GROUP_SIZE};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ais-processor")]
#[command(about = "High-performance AIS vessel-tracking data to hour-partitioned Parquet converter")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert AIS CSV files into hour-partitioned Parquet
    Convert {
        #[arg(
            short,
            long,
            num_args = 1..,
            help = "Input CSV files, or a directory containing them"
        )]
        input: Vec<PathBuf>,

        #[arg(short, long, default_value = "output", help = "Partition output root")]
        output_root: PathBuf,

        #[arg(short, long, default_value = "snappy")]
        compression: String,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        #[arg(long, default_value_t = DEFAULT_ROW_GROUP_SIZE)]
        row_group_size: usize,

        #[arg(long, default_value_t = num_cpus::get())]
        max_workers: usize,

        #[arg(
            long,
            default_value = "drop",
            help = "Malformed-row policy: drop (count and skip) or abort"
        )]
        on_malformed: String,

        #[arg(long, default_value = "false", help = "Memory-map input files")]
        mmap: bool,

        #[arg(long, help = "Write the run ledger to this path as JSON")]
        ledger: Option<PathBuf>,
    },

    /// Extract CSVs from ZIP archives in a directory and convert them
    ConvertArchives {
        #[arg(short, long, help = "Directory containing AIS ZIP archives")]
        input_dir: PathBuf,

        #[arg(
            long,
            help = "Filter to archive names containing this pattern (e.g. 'AIS_2024')",
            default_value = ""
        )]
        file_pattern: String,

        #[arg(short, long, default_value = "output", help = "Partition output root")]
        output_root: PathBuf,

        #[arg(short, long, default_value = "snappy")]
        compression: String,

        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        #[arg(long, default_value_t = DEFAULT_ROW_GROUP_SIZE)]
        row_group_size: usize,

        #[arg(long, default_value_t = num_cpus::get())]
        max_workers: usize,

        #[arg(long, default_value = "drop")]
        on_malformed: String,

        #[arg(long, default_value = "false", help = "Memory-map input files")]
        mmap: bool,

        #[arg(long, help = "Write the run ledger to this path as JSON")]
        ledger: Option<PathBuf>,
    },

    /// Display information about a partition Parquet file
    Info {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "10")]
        sample: usize,
    },
}
