//! MySQL dump conversion
//!
//! Streams `.sql.gz` extended-INSERT dumps into typed, snappy-compressed
//! parquet shards:
//! - `schema`: header scan (CREATE TABLE -> column names and logical types)
//! - `scanner`: per-INSERT-line value tokenizer
//! - `shard`: bounded-buffer parquet shard writer
//! - `convert`: per-table orchestration and the 4-worker pool

pub mod convert;
pub mod scanner;
pub mod schema;
pub mod shard;

pub use convert::{convert_all, convert_table, ConvertOutcome, TableReport};
pub use schema::{LogicalType, TableSchema};
