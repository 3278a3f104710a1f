//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

/// Metrics prefix for all BioGraph metrics
pub const METRICS_PREFIX: &str = "biograph";

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of graph queries"
    );

    describe_histogram!(
        format!("{}_query_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Graph query latency in seconds"
    );

    describe_counter!(
        format!("{}_paths_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of shortest-path searches"
    );

    describe_counter!(
        format!("{}_streams_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of SSE explanation streams"
    );

    describe_counter!(
        format!("{}_ingest_rows_total", METRICS_PREFIX),
        Unit::Count,
        "Rows written to columnar shards"
    );
}

/// Record a graph query
pub fn record_query(duration_secs: f64, kind: &str, result_count: usize) {
    counter!(format!("{}_queries_total", METRICS_PREFIX), "kind" => kind.to_string())
        .increment(1);
    histogram!(format!("{}_query_duration_seconds", METRICS_PREFIX), "kind" => kind.to_string())
        .record(duration_secs);
    histogram!(format!("{}_query_results", METRICS_PREFIX), "kind" => kind.to_string())
        .record(result_count as f64);
}

/// Record a shortest-path search
pub fn record_path(found: bool, hops: usize) {
    let outcome = if found { "found" } else { "none" };
    counter!(format!("{}_paths_total", METRICS_PREFIX), "outcome" => outcome).increment(1);
    if found {
        histogram!(format!("{}_path_hops", METRICS_PREFIX)).record(hops as f64);
    }
}

/// Record an SSE stream outcome
pub fn record_stream(endpoint: &str, outcome: &str) {
    counter!(
        format!("{}_streams_total", METRICS_PREFIX),
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record rows flushed into a shard
pub fn record_ingest_rows(table: &str, rows: u64) {
    counter!(format!("{}_ingest_rows_total", METRICS_PREFIX), "table" => table.to_string())
        .increment(rows);
}
