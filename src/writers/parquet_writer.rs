use crate::error::{ProcessingError, Result};
use crate::models::AisRecord;
use crate::utils::constants::DEFAULT_ROW_GROUP_SIZE;
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::DateTime;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Writes and reads AIS record batches in Parquet form. One instance is
/// shared across the whole run; it is stateless apart from its settings.
pub struct AisParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl AisParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            "snappy" => Compression::SNAPPY,
            "gzip" => Compression::GZIP(GzipLevel::default()),
            "lz4" => Compression::LZ4,
            "zstd" => Compression::ZSTD(parquet::basic::ZstdLevel::default()),
            "none" => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size;
        self
    }

    /// Arrow schema for the fixed 17-column AIS layout. Timestamps are
    /// stored with second precision, matching the source format.
    pub fn create_schema() -> Arc<Schema> {
        let fields = vec![
            Field::new("MMSI", DataType::Utf8, false),
            Field::new(
                "BaseDateTime",
                DataType::Timestamp(TimeUnit::Second, None),
                false,
            ),
            Field::new("LAT", DataType::Float64, false),
            Field::new("LON", DataType::Float64, false),
            Field::new("SOG", DataType::Float32, true),
            Field::new("COG", DataType::Float32, true),
            Field::new("Heading", DataType::Float32, true),
            Field::new("VesselName", DataType::Utf8, true),
            Field::new("IMO", DataType::Utf8, true),
            Field::new("CallSign", DataType::Utf8, true),
            Field::new("VesselType", DataType::Int32, true),
            Field::new("Status", DataType::Int32, true),
            Field::new("Length", DataType::Float32, true),
            Field::new("Width", DataType::Float32, true),
            Field::new("Draft", DataType::Float32, true),
            Field::new("Cargo", DataType::Utf8, true),
            Field::new("TransceiverClass", DataType::Utf8, true),
        ];

        Arc::new(Schema::new(fields))
    }

    /// Convert records to an Arrow RecordBatch.
    pub fn records_to_batch(records: &[AisRecord], schema: Arc<Schema>) -> Result<RecordBatch> {
        let mmsi: Vec<&str> = records.iter().map(|r| r.mmsi.as_str()).collect();
        let timestamps: Vec<i64> = records
            .iter()
            .map(|r| r.base_date_time.and_utc().timestamp())
            .collect();
        let lats: Vec<f64> = records.iter().map(|r| r.lat).collect();
        let lons: Vec<f64> = records.iter().map(|r| r.lon).collect();
        let sogs: Vec<Option<f32>> = records.iter().map(|r| r.sog).collect();
        let cogs: Vec<Option<f32>> = records.iter().map(|r| r.cog).collect();
        let headings: Vec<Option<f32>> = records.iter().map(|r| r.heading).collect();
        let vessel_names: Vec<Option<&str>> =
            records.iter().map(|r| r.vessel_name.as_deref()).collect();
        let imos: Vec<Option<&str>> = records.iter().map(|r| r.imo.as_deref()).collect();
        let call_signs: Vec<Option<&str>> =
            records.iter().map(|r| r.call_sign.as_deref()).collect();
        let vessel_types: Vec<Option<i32>> = records.iter().map(|r| r.vessel_type).collect();
        let statuses: Vec<Option<i32>> = records.iter().map(|r| r.status).collect();
        let lengths: Vec<Option<f32>> = records.iter().map(|r| r.length).collect();
        let widths: Vec<Option<f32>> = records.iter().map(|r| r.width).collect();
        let drafts: Vec<Option<f32>> = records.iter().map(|r| r.draft).collect();
        let cargos: Vec<Option<&str>> = records.iter().map(|r| r.cargo.as_deref()).collect();
        let transceivers: Vec<Option<&str>> = records
            .iter()
            .map(|r| r.transceiver_class.as_deref())
            .collect();

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(mmsi)),
                Arc::new(TimestampSecondArray::from(timestamps)),
                Arc::new(Float64Array::from(lats)),
                Arc::new(Float64Array::from(lons)),
                Arc::new(Float32Array::from(sogs)),
                Arc::new(Float32Array::from(cogs)),
                Arc::new(Float32Array::from(headings)),
                Arc::new(StringArray::from(vessel_names)),
                Arc::new(StringArray::from(imos)),
                Arc::new(StringArray::from(call_signs)),
                Arc::new(Int32Array::from(vessel_types)),
                Arc::new(Int32Array::from(statuses)),
                Arc::new(Float32Array::from(lengths)),
                Arc::new(Float32Array::from(widths)),
                Arc::new(Float32Array::from(drafts)),
                Arc::new(StringArray::from(cargos)),
                Arc::new(StringArray::from(transceivers)),
            ],
        )?;

        Ok(batch)
    }

    /// Write a sequence of batches to any sink, in order, in row groups of
    /// the configured size.
    pub fn write_batches<W: Write + Send>(
        &self,
        sink: W,
        schema: Arc<Schema>,
        batches: &[RecordBatch],
    ) -> Result<()> {
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut writer = ArrowWriter::try_new(sink, schema, Some(props))?;
        for batch in batches {
            writer.write(batch)?;
        }
        writer.close()?;
        Ok(())
    }

    /// Write records to a new Parquet file.
    pub fn write_records(&self, records: &[AisRecord], path: &Path) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let schema = Self::create_schema();
        let batch = Self::records_to_batch(records, schema.clone())?;
        let file = File::create(path)?;
        self.write_batches(file, schema, &[batch])
    }

    /// Read every record batch in a Parquet file, preserving row order.
    pub fn read_batches(&self, path: &Path) -> Result<(Arc<Schema>, Vec<RecordBatch>)> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?
            .with_batch_size(self.row_group_size.min(8192));
        let schema = builder.schema().clone();
        let reader = builder.build()?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch?);
        }
        Ok((schema, batches))
    }

    /// Read up to `limit` records back into typed form.
    pub fn read_sample_records(&self, path: &Path, limit: usize) -> Result<Vec<AisRecord>> {
        let (_, batches) = self.read_batches(path)?;
        let mut records = Vec::new();

        for batch in batches {
            for i in 0..batch.num_rows() {
                if records.len() >= limit {
                    return Ok(records);
                }
                records.push(record_from_batch(&batch, i)?);
            }
        }

        Ok(records)
    }

    /// Get file statistics.
    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let file_metadata = metadata.file_metadata();
        let row_groups = metadata.num_row_groups();
        let total_rows = file_metadata.num_rows();
        let file_size = std::fs::metadata(path)?.len();

        let mut row_group_sizes = Vec::new();
        for i in 0..row_groups {
            row_group_sizes.push(metadata.row_group(i).num_rows());
        }

        Ok(ParquetFileInfo {
            total_rows,
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size,
            compression: self.compression,
        })
    }
}

impl Default for AisParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, index: usize, name: &str) -> Result<&'a T> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| ProcessingError::Config(format!("Invalid {} column type", name)))
}

fn record_from_batch(batch: &RecordBatch, i: usize) -> Result<AisRecord> {
    let mmsi = column::<StringArray>(batch, 0, "MMSI")?;
    let timestamps = column::<TimestampSecondArray>(batch, 1, "BaseDateTime")?;
    let lats = column::<Float64Array>(batch, 2, "LAT")?;
    let lons = column::<Float64Array>(batch, 3, "LON")?;
    let sogs = column::<Float32Array>(batch, 4, "SOG")?;
    let cogs = column::<Float32Array>(batch, 5, "COG")?;
    let headings = column::<Float32Array>(batch, 6, "Heading")?;
    let vessel_names = column::<StringArray>(batch, 7, "VesselName")?;
    let imos = column::<StringArray>(batch, 8, "IMO")?;
    let call_signs = column::<StringArray>(batch, 9, "CallSign")?;
    let vessel_types = column::<Int32Array>(batch, 10, "VesselType")?;
    let statuses = column::<Int32Array>(batch, 11, "Status")?;
    let lengths = column::<Float32Array>(batch, 12, "Length")?;
    let widths = column::<Float32Array>(batch, 13, "Width")?;
    let drafts = column::<Float32Array>(batch, 14, "Draft")?;
    let cargos = column::<StringArray>(batch, 15, "Cargo")?;
    let transceivers = column::<StringArray>(batch, 16, "TransceiverClass")?;

    let base_date_time = DateTime::from_timestamp(timestamps.value(i), 0)
        .ok_or_else(|| ProcessingError::Config("Invalid timestamp in Parquet file".to_string()))?
        .naive_utc();

    let opt_f32 = |arr: &Float32Array| if arr.is_null(i) { None } else { Some(arr.value(i)) };
    let opt_i32 = |arr: &Int32Array| if arr.is_null(i) { None } else { Some(arr.value(i)) };
    let opt_str = |arr: &StringArray| {
        if arr.is_null(i) {
            None
        } else {
            Some(arr.value(i).to_string())
        }
    };

    Ok(AisRecord {
        mmsi: mmsi.value(i).to_string(),
        base_date_time,
        lat: lats.value(i),
        lon: lons.value(i),
        sog: opt_f32(sogs),
        cog: opt_f32(cogs),
        heading: opt_f32(headings),
        vessel_name: opt_str(vessel_names),
        imo: opt_str(imos),
        call_sign: opt_str(call_signs),
        vessel_type: opt_i32(vessel_types),
        status: opt_i32(statuses),
        length: opt_f32(lengths),
        width: opt_f32(widths),
        draft: opt_f32(drafts),
        cargo: opt_str(cargos),
        transceiver_class: opt_str(transceivers),
    })
}

pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0, // Convert to MB
            self.compression,
        )
    }
}
