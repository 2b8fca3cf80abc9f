use crate::archive::{discover_archives, ArchiveExtractor};
use crate::cli::args::{Cli, Commands};
use crate::config::{ConverterConfig, MalformedRowPolicy};
use crate::error::{ProcessingError, Result};
use crate::pipeline::{RunLedger, WorkerPool};
use crate::utils::progress::ProgressReporter;
use crate::writers::AisParquetWriter;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub async fn run(cli: Cli) -> Result<()> {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Convert {
            input,
            output_root,
            compression,
            chunk_size,
            row_group_size,
            max_workers,
            on_malformed,
            mmap,
            ledger,
        } => {
            let sources = collect_csv_sources(&input)?;
            println!("Converting {} source file(s)...", sources.len());

            let config = build_config(
                output_root,
                &compression,
                chunk_size,
                row_group_size,
                &on_malformed,
                mmap,
            )?;

            let run_ledger = convert_sources(sources, config, max_workers).await?;
            report(&run_ledger, ledger.as_deref())?;
        }

        Commands::ConvertArchives {
            input_dir,
            file_pattern,
            output_root,
            compression,
            chunk_size,
            row_group_size,
            max_workers,
            on_malformed,
            mmap,
            ledger,
        } => {
            let pattern = if file_pattern.is_empty() {
                None
            } else {
                Some(file_pattern.as_str())
            };
            let archives = discover_archives(&input_dir, pattern)?;
            if archives.is_empty() {
                return Err(ProcessingError::InvalidArchive(format!(
                    "No ZIP archives found in {}",
                    input_dir.display()
                )));
            }
            println!("Found {} archive(s) to process", archives.len());

            // The extractor must outlive the run; dropping it removes the
            // extracted CSVs.
            let extractor = ArchiveExtractor::new()?;
            let mut sources = Vec::new();
            let mut extraction_failures = 0usize;

            for archive in &archives {
                match extractor.extract_csv_files(archive) {
                    Ok(mut files) => sources.append(&mut files),
                    Err(e) => {
                        tracing::warn!(archive = %archive.display(), error = %e, "skipping archive");
                        extraction_failures += 1;
                    }
                }
            }

            if sources.is_empty() {
                return Err(ProcessingError::InvalidArchive(
                    "No CSV files could be extracted from any archive".to_string(),
                ));
            }

            let config = build_config(
                output_root,
                &compression,
                chunk_size,
                row_group_size,
                &on_malformed,
                mmap,
            )?;

            let run_ledger = convert_sources(sources, config, max_workers).await?;
            if extraction_failures > 0 {
                println!("Warning: {} archive(s) could not be extracted", extraction_failures);
            }
            report(&run_ledger, ledger.as_deref())?;
        }

        Commands::Info { file, sample } => {
            println!("Analyzing partition file: {}", file.display());

            let writer = AisParquetWriter::new();
            let file_info = writer.get_file_info(&file)?;
            println!("\n{}", file_info.summary());

            if sample > 0 {
                println!("\nSample Records (showing up to {}):", sample);
                let records = writer.read_sample_records(&file, sample)?;
                for (i, record) in records.iter().enumerate() {
                    println!(
                        "{}. MMSI {} at {}: lat={:.4}, lon={:.4}, sog={}",
                        i + 1,
                        record.mmsi,
                        record.base_date_time,
                        record.lat,
                        record.lon,
                        record
                            .sog
                            .map(|v| format!("{:.1}", v))
                            .unwrap_or_else(|| "n/a".to_string()),
                    );
                }
            }
        }
    }

    Ok(())
}

fn build_config(
    output_root: PathBuf,
    compression: &str,
    chunk_size: usize,
    row_group_size: usize,
    on_malformed: &str,
    mmap: bool,
) -> Result<Arc<ConverterConfig>> {
    let policy: MalformedRowPolicy = on_malformed.parse()?;
    let config = ConverterConfig::new(output_root)
        .with_compression(compression)
        .with_chunk_size(chunk_size)
        .with_row_group_size(row_group_size)
        .with_malformed_rows(policy)
        .with_mmap(mmap);
    config.validate()?;
    Ok(Arc::new(config))
}

async fn convert_sources(
    sources: Vec<PathBuf>,
    config: Arc<ConverterConfig>,
    max_workers: usize,
) -> Result<RunLedger> {
    let pool = WorkerPool::new(config, max_workers)?;

    // Ctrl-C drains the pool at the next chunk boundary instead of killing
    // a merge halfway.
    let cancel = pool.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after current chunks");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let progress = ProgressReporter::new(sources.len() as u64, "Converting sources...", false);
    let ledger = pool.run(sources, Some(&progress)).await?;
    progress.finish_with_message(&format!(
        "Converted {} of {} source(s)",
        ledger.completed_count(),
        ledger.outcomes.len()
    ));

    Ok(ledger)
}

fn report(ledger: &RunLedger, ledger_path: Option<&std::path::Path>) -> Result<()> {
    println!("\n{}", ledger.summary());

    if let Some(path) = ledger_path {
        let json = serde_json::to_string_pretty(ledger)
            .map_err(|e| ProcessingError::Config(format!("failed to serialize ledger: {}", e)))?;
        std::fs::write(path, json)?;
        println!("Ledger written to {}", path.display());
    }

    Ok(())
}

/// Expand the input list: a directory contributes every `.csv` directly
/// inside it, sorted by name; files are taken as-is.
fn collect_csv_sources(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut sources = Vec::new();

    for input in inputs {
        if input.is_dir() {
            let mut found = Vec::new();
            for entry in std::fs::read_dir(input)? {
                let path = entry?.path();
                if path.is_file() && path.extension().map_or(false, |ext| ext == "csv") {
                    found.push(path);
                }
            }
            found.sort();
            sources.extend(found);
        } else {
            sources.push(input.clone());
        }
    }

    if sources.is_empty() {
        return Err(ProcessingError::Config(
            "No CSV source files to convert".to_string(),
        ));
    }

    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_sources_expands_directories() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.csv"), "x").unwrap();
        std::fs::write(dir.path().join("a.csv"), "x").unwrap();
        std::fs::write(dir.path().join("skip.txt"), "x").unwrap();

        let sources = collect_csv_sources(&[dir.path().to_path_buf()]).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_collect_sources_rejects_empty() {
        let dir = TempDir::new().unwrap();
        assert!(collect_csv_sources(&[dir.path().to_path_buf()]).is_err());
    }
}
