use serde::{Deserialize, Serialize};

/// Session lifecycle and ingestion-size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Session Store TTL, refreshed on every read/write. Spec default: 300s.
    #[serde(default = "d_ttl_seconds")]
    pub ttl_seconds: u64,
    /// `query` validation bound (1..=max_query_chars).
    #[serde(default = "d_max_query_chars")]
    pub max_query_chars: usize,
    /// Maximum number of tables accepted in a start request's schema.
    #[serde(default = "d_max_tables")]
    pub max_tables: usize,
    /// Maximum columns accepted per table.
    #[serde(default = "d_max_columns")]
    pub max_columns: usize,
    /// Sample rows beyond this count are silently truncated.
    #[serde(default = "d_max_sample_rows")]
    pub max_sample_rows: usize,
    /// A completed step's serialised result larger than this is truncated.
    #[serde(default = "d_max_result_bytes")]
    pub max_result_bytes: usize,
    /// Row cap applied when a step result is truncated.
    #[serde(default = "d_max_result_rows")]
    pub max_result_rows: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: d_ttl_seconds(),
            max_query_chars: d_max_query_chars(),
            max_tables: d_max_tables(),
            max_columns: d_max_columns(),
            max_sample_rows: d_max_sample_rows(),
            max_result_bytes: d_max_result_bytes(),
            max_result_rows: d_max_result_rows(),
        }
    }
}

fn d_ttl_seconds() -> u64 {
    300
}
fn d_max_query_chars() -> usize {
    1000
}
fn d_max_tables() -> usize {
    10
}
fn d_max_columns() -> usize {
    100
}
fn d_max_sample_rows() -> usize {
    20
}
fn d_max_result_bytes() -> usize {
    64 * 1024
}
fn d_max_result_rows() -> usize {
    500
}
