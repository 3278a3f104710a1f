//! Columnar shard writer
//!
//! Buffers decoded rows and flushes every `batch_size` rows into a
//! snappy-compressed parquet shard named `{table}_{index:03}.parquet`, so
//! shard files sort lexicographically in write order. String tokens are
//! coerced to the declared logical type; numeric coercion failures become
//! nulls, string columns pass through untouched. The final partial shard is
//! flushed on `finish`.

use super::schema::{LogicalType, TableSchema};
use arrow_array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use biograph_common::errors::{AppError, Result};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

pub struct ShardWriter {
    table_schema: TableSchema,
    arrow_schema: Arc<Schema>,
    out_dir: PathBuf,
    batch_size: usize,
    buffer: Vec<Vec<Option<String>>>,
    shard_index: usize,
    total_rows: u64,
}

impl ShardWriter {
    pub fn new(table_schema: TableSchema, out_dir: &Path, batch_size: usize) -> Self {
        let fields: Vec<Field> = table_schema
            .columns
            .iter()
            .zip(&table_schema.types)
            .map(|(name, logical)| {
                let data_type = match logical {
                    LogicalType::Int64 => DataType::Int64,
                    LogicalType::Float64 => DataType::Float64,
                    LogicalType::Utf8 => DataType::Utf8,
                };
                Field::new(name, data_type, true)
            })
            .collect();

        Self {
            arrow_schema: Arc::new(Schema::new(fields)),
            table_schema,
            out_dir: out_dir.to_path_buf(),
            batch_size,
            buffer: Vec::new(),
            shard_index: 0,
            total_rows: 0,
        }
    }

    pub fn push(&mut self, row: Vec<Option<String>>) -> Result<()> {
        self.buffer.push(row);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the trailing partial shard and return `(rows, shards)`.
    pub fn finish(mut self) -> Result<(u64, usize)> {
        if !self.buffer.is_empty() {
            self.flush()?;
        }
        Ok((self.total_rows, self.shard_index))
    }

    fn flush(&mut self) -> Result<()> {
        let rows = std::mem::take(&mut self.buffer);
        if rows.is_empty() {
            return Ok(());
        }

        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.table_schema.num_cols());
        for (col_idx, logical) in self.table_schema.types.iter().enumerate() {
            let column = rows.iter().map(|row| row[col_idx].as_deref());
            let array: ArrayRef = match logical {
                LogicalType::Int64 => Arc::new(Int64Array::from_iter(
                    column.map(|v| v.and_then(|s| s.trim().parse::<i64>().ok())),
                )),
                LogicalType::Float64 => Arc::new(Float64Array::from_iter(
                    column.map(|v| v.and_then(|s| s.trim().parse::<f64>().ok())),
                )),
                LogicalType::Utf8 => Arc::new(StringArray::from_iter(column)),
            };
            arrays.push(array);
        }

        let batch = RecordBatch::try_new(self.arrow_schema.clone(), arrays)
            .map_err(|e| AppError::Internal { message: format!("shard batch: {}", e) })?;

        let path = self.out_dir.join(format!(
            "{}_{:03}.parquet",
            self.table_schema.table, self.shard_index
        ));
        let file = File::create(&path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, self.arrow_schema.clone(), Some(props))
            .map_err(|e| AppError::Internal { message: format!("shard writer: {}", e) })?;
        writer
            .write(&batch)
            .map_err(|e| AppError::Internal { message: format!("shard write: {}", e) })?;
        writer
            .close()
            .map_err(|e| AppError::Internal { message: format!("shard close: {}", e) })?;

        self.total_rows += rows.len() as u64;
        self.shard_index += 1;
        biograph_common::metrics::record_ingest_rows(&self.table_schema.table, rows.len() as u64);
        info!(
            table = %self.table_schema.table,
            shard = self.shard_index,
            rows = self.total_rows,
            "Shard flushed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    fn schema() -> TableSchema {
        TableSchema {
            table: "demo".to_string(),
            columns: vec!["id".to_string(), "name".to_string(), "score".to_string()],
            types: vec![LogicalType::Int64, LogicalType::Utf8, LogicalType::Float64],
        }
    }

    fn row(id: &str, name: Option<&str>, score: &str) -> Vec<Option<String>> {
        vec![
            Some(id.to_string()),
            name.map(|s| s.to_string()),
            Some(score.to_string()),
        ]
    }

    #[test]
    fn test_shards_respect_batch_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(schema(), dir.path(), 2);
        for i in 0..5 {
            writer.push(row(&i.to_string(), Some("x"), "1.5")).unwrap();
        }
        let (rows, shards) = writer.finish().unwrap();
        assert_eq!(rows, 5);
        assert_eq!(shards, 3);

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["demo_000.parquet", "demo_001.parquet", "demo_002.parquet"]);
    }

    #[test]
    fn test_numeric_coercion_errors_become_null() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ShardWriter::new(schema(), dir.path(), 10);
        writer.push(row("not-a-number", Some("ok"), "abc")).unwrap();
        writer.push(row("7", None, "-3.14e-2")).unwrap();
        let (rows, shards) = writer.finish().unwrap();
        assert_eq!((rows, shards), (2, 1));

        let file = File::open(dir.path().join("demo_000.parquet")).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];

        let ids = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert!(ids.is_null(0));
        assert_eq!(ids.value(1), 7);

        let names = batch
            .column(1)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(names.value(0), "ok");
        assert!(names.is_null(1));

        let scores = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert!(scores.is_null(0));
        assert!((scores.value(1) + 0.0314).abs() < 1e-9);
    }
}
