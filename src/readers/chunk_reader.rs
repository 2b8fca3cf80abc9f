use crate::config::{ConverterConfig, MalformedRowPolicy};
use crate::error::{ProcessingError, Result};
use crate::models::AisRecord;
use crate::utils::constants::{DEFAULT_BUFFER_SIZE, EXPECTED_COLUMNS, TIMESTAMP_FORMAT};
use chrono::NaiveDateTime;
use memmap2::Mmap;
use std::fs::File;
use std::io::{BufReader, Cursor, Read};
use std::path::Path;
use validator::Validate;

/// One bounded batch of decoded records plus the count of rows that were
/// rejected while producing it.
#[derive(Debug)]
pub struct Chunk {
    pub records: Vec<AisRecord>,
    pub rejected: u64,
}

/// Streaming typed decoder for one AIS CSV source.
///
/// Validates the header against the fixed 17-column schema before any data
/// row is read, then yields chunks of at most `chunk_size` records. The
/// sequence is lazy, finite and non-restartable. Malformed rows are either
/// dropped with a count or escalate, per [`MalformedRowPolicy`].
pub struct CsvChunkReader {
    reader: csv::Reader<Box<dyn Read + Send>>,
    source: String,
    chunk_size: usize,
    policy: MalformedRowPolicy,
    rows_read: u64,
}

impl CsvChunkReader {
    /// Open a CSV file, using buffered or memory-mapped I/O per the config.
    pub fn open(path: &Path, config: &ConverterConfig) -> Result<Self> {
        let file = File::open(path)?;
        let input: Box<dyn Read + Send> = if config.use_mmap {
            let mmap = unsafe { Mmap::map(&file)? };
            Box::new(Cursor::new(mmap))
        } else {
            Box::new(BufReader::with_capacity(DEFAULT_BUFFER_SIZE, file))
        };

        Self::from_reader(
            input,
            &path.display().to_string(),
            config.chunk_size,
            config.malformed_rows,
        )
    }

    /// Build a reader over any byte source. Used directly by tests and
    /// benchmarks; `open` is the file-backed entry point.
    pub fn from_reader(
        input: Box<dyn Read + Send>,
        source: &str,
        chunk_size: usize,
        policy: MalformedRowPolicy,
    ) -> Result<Self> {
        // Flexible so a row with the wrong field count reaches the
        // row-level policy instead of failing the whole read.
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(input);

        Self::validate_header(&mut reader, source)?;

        Ok(Self {
            reader,
            source: source.to_string(),
            chunk_size,
            policy,
            rows_read: 0,
        })
    }

    /// Data rows consumed so far, rejected rows included.
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Read the next chunk. `Ok(None)` means the source is exhausted.
    pub fn read_chunk(&mut self) -> Result<Option<Chunk>> {
        let mut records = Vec::with_capacity(self.chunk_size.min(65_536));
        let mut rejected = 0u64;
        let mut raw = csv::StringRecord::new();

        while records.len() < self.chunk_size {
            if !self.reader.read_record(&mut raw)? {
                break;
            }
            self.rows_read += 1;

            match self.parse_row(&raw) {
                Ok(record) => records.push(record),
                Err(reason) => match self.policy {
                    MalformedRowPolicy::Drop => {
                        rejected += 1;
                        tracing::debug!(
                            source = %self.source,
                            row = self.rows_read,
                            %reason,
                            "dropping malformed row"
                        );
                    }
                    MalformedRowPolicy::Abort => {
                        return Err(ProcessingError::MalformedRow {
                            row: self.rows_read,
                            reason,
                        });
                    }
                },
            }
        }

        if records.is_empty() && rejected == 0 {
            Ok(None)
        } else {
            Ok(Some(Chunk { records, rejected }))
        }
    }

    fn validate_header(reader: &mut csv::Reader<Box<dyn Read + Send>>, source: &str) -> Result<()> {
        let headers = reader.headers()?;

        if headers.len() != EXPECTED_COLUMNS.len() {
            return Err(ProcessingError::SchemaMismatch {
                path: source.to_string(),
                detail: format!(
                    "expected {} columns, found {}",
                    EXPECTED_COLUMNS.len(),
                    headers.len()
                ),
            });
        }

        for (i, expected) in EXPECTED_COLUMNS.iter().enumerate() {
            let found = headers.get(i).unwrap_or("").trim();
            if found != *expected {
                return Err(ProcessingError::SchemaMismatch {
                    path: source.to_string(),
                    detail: format!("column {}: expected '{}', found '{}'", i, expected, found),
                });
            }
        }

        Ok(())
    }

    /// Decode one raw row into a typed record, or return the reason it is
    /// malformed. Identifier text is kept verbatim (leading zeros matter);
    /// empty string maps to null for every nullable column.
    fn parse_row(&self, raw: &csv::StringRecord) -> std::result::Result<AisRecord, String> {
        if raw.len() != EXPECTED_COLUMNS.len() {
            return Err(format!(
                "expected {} fields, found {}",
                EXPECTED_COLUMNS.len(),
                raw.len()
            ));
        }

        let field = |i: usize| raw.get(i).unwrap_or("").trim();

        let mmsi = field(0);
        if mmsi.is_empty() {
            return Err("empty MMSI".to_string());
        }

        let base_date_time = NaiveDateTime::parse_from_str(field(1), TIMESTAMP_FORMAT)
            .map_err(|e| format!("invalid BaseDateTime '{}': {}", field(1), e))?;

        let lat = parse_required_f64(field(2), "LAT")?;
        let lon = parse_required_f64(field(3), "LON")?;

        let record = AisRecord {
            mmsi: mmsi.to_string(),
            base_date_time,
            lat,
            lon,
            sog: parse_opt_f32(field(4), "SOG")?,
            cog: parse_opt_f32(field(5), "COG")?,
            heading: parse_opt_f32(field(6), "Heading")?,
            vessel_name: parse_opt_text(field(7)),
            imo: parse_opt_text(field(8)),
            call_sign: parse_opt_text(field(9)),
            vessel_type: parse_opt_i32(field(10), "VesselType")?,
            status: parse_opt_i32(field(11), "Status")?,
            length: parse_opt_f32(field(12), "Length")?,
            width: parse_opt_f32(field(13), "Width")?,
            draft: parse_opt_f32(field(14), "Draft")?,
            cargo: parse_opt_text(field(15)),
            transceiver_class: parse_opt_text(field(16)),
        };

        record
            .validate()
            .map_err(|e| format!("coordinate out of range: {}", e))?;

        Ok(record)
    }
}

fn parse_required_f64(value: &str, column: &str) -> std::result::Result<f64, String> {
    value
        .parse::<f64>()
        .map_err(|_| format!("invalid {} '{}'", column, value))
}

fn parse_opt_f32(value: &str, column: &str) -> std::result::Result<Option<f32>, String> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f32>()
        .map(Some)
        .map_err(|_| format!("invalid {} '{}'", column, value))
}

fn parse_opt_i32(value: &str, column: &str) -> std::result::Result<Option<i32>, String> {
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<i32>()
        .map(Some)
        .map_err(|_| format!("invalid {} '{}'", column, value))
}

fn parse_opt_text(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "MMSI,BaseDateTime,LAT,LON,SOG,COG,Heading,VesselName,IMO,CallSign,VesselType,Status,Length,Width,Draft,Cargo,TransceiverClass";

    fn reader_over(
        csv_text: &str,
        chunk_size: usize,
        policy: MalformedRowPolicy,
    ) -> Result<CsvChunkReader> {
        CsvChunkReader::from_reader(
            Box::new(Cursor::new(csv_text.as_bytes().to_vec())),
            "test.csv",
            chunk_size,
            policy,
        )
    }

    #[test]
    fn test_decode_full_row() {
        let csv_text = format!(
            "{}\n003669970,2017-02-01T20:05:07,42.351,-71.041,5.9,177.3,511.0,SOME VESSEL,IMO1234567,WDE1234,70,0,24.0,7.0,3.1,70,A\n",
            HEADER
        );
        let mut reader = reader_over(&csv_text, 100, MalformedRowPolicy::Drop).unwrap();

        let chunk = reader.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.records.len(), 1);
        assert_eq!(chunk.rejected, 0);

        let record = &chunk.records[0];
        // Leading zero must survive decoding.
        assert_eq!(record.mmsi, "003669970");
        assert_eq!(record.lat, 42.351);
        assert_eq!(record.lon, -71.041);
        assert_eq!(record.sog, Some(5.9));
        assert_eq!(record.vessel_type, Some(70));
        assert_eq!(record.vessel_name.as_deref(), Some("SOME VESSEL"));
        assert_eq!(record.transceiver_class.as_deref(), Some("A"));

        assert!(reader.read_chunk().unwrap().is_none());
    }

    #[test]
    fn test_empty_fields_become_null() {
        let csv_text = format!(
            "{}\n477220100,2017-02-01T20:05:07,42.351,-71.041,,,,,,,,,,,,,\n",
            HEADER
        );
        let mut reader = reader_over(&csv_text, 100, MalformedRowPolicy::Drop).unwrap();

        let chunk = reader.read_chunk().unwrap().unwrap();
        let record = &chunk.records[0];

        assert_eq!(record.sog, None);
        assert_eq!(record.heading, None);
        assert_eq!(record.vessel_name, None);
        assert_eq!(record.vessel_type, None);
        assert_eq!(record.status, None);
        assert_eq!(record.cargo, None);
    }

    #[test]
    fn test_malformed_timestamp_dropped_and_counted() {
        let csv_text = format!(
            "{}\n111,2017-02-01 20:05:07,42.0,-71.0,,,,,,,,,,,,,\n222,2017-02-01T21:00:00,42.0,-71.0,,,,,,,,,,,,,\n",
            HEADER
        );
        let mut reader = reader_over(&csv_text, 100, MalformedRowPolicy::Drop).unwrap();

        let chunk = reader.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.records.len(), 1);
        assert_eq!(chunk.rejected, 1);
        assert_eq!(chunk.records[0].mmsi, "222");
        assert_eq!(reader.rows_read(), 2);
    }

    #[test]
    fn test_malformed_row_aborts_under_abort_policy() {
        let csv_text = format!(
            "{}\n111,not-a-timestamp,42.0,-71.0,,,,,,,,,,,,,\n",
            HEADER
        );
        let mut reader = reader_over(&csv_text, 100, MalformedRowPolicy::Abort).unwrap();

        match reader.read_chunk() {
            Err(ProcessingError::MalformedRow { row, .. }) => assert_eq!(row, 1),
            other => panic!("expected MalformedRow error, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_row_dropped_and_counted() {
        let csv_text = format!(
            "{}\n111,2017-02-01T20:05:07,42.0\n222,2017-02-01T21:00:00,42.0,-71.0,,,,,,,,,,,,,\n",
            HEADER
        );
        let mut reader = reader_over(&csv_text, 100, MalformedRowPolicy::Drop).unwrap();

        let chunk = reader.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.records.len(), 1);
        assert_eq!(chunk.rejected, 1);
    }

    #[test]
    fn test_out_of_range_coordinate_rejected() {
        let csv_text = format!(
            "{}\n111,2017-02-01T20:05:07,95.0,-71.0,,,,,,,,,,,,,\n",
            HEADER
        );
        let mut reader = reader_over(&csv_text, 100, MalformedRowPolicy::Drop).unwrap();

        let chunk = reader.read_chunk().unwrap().unwrap();
        assert_eq!(chunk.records.len(), 0);
        assert_eq!(chunk.rejected, 1);
    }

    #[test]
    fn test_chunking_bounds_batch_size() {
        let mut csv_text = format!("{}\n", HEADER);
        for i in 0..5 {
            csv_text.push_str(&format!(
                "{},2017-02-01T20:05:{:02},42.0,-71.0,,,,,,,,,,,,,\n",
                100 + i,
                i
            ));
        }
        let mut reader = reader_over(&csv_text, 2, MalformedRowPolicy::Drop).unwrap();

        let sizes: Vec<usize> = std::iter::from_fn(|| reader.read_chunk().unwrap())
            .map(|c| c.records.len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_wrong_header_is_schema_mismatch() {
        let csv_text = "MMSI,Timestamp,LAT,LON\n111,2017-02-01T20:05:07,42.0,-71.0\n";
        match reader_over(csv_text, 100, MalformedRowPolicy::Drop) {
            Err(ProcessingError::SchemaMismatch { .. }) => {}
            other => panic!("expected SchemaMismatch, got {:?}", other.err()),
        }
    }
}
