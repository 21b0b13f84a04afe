//! Runner options.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata table that records views.
pub const DEFAULT_METADATA_TABLE: &str = "typeorm_metadata";

/// Options shared by every runner created from one data source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerOptions {
    /// Queries slower than this (milliseconds) are logged as slow.
    pub max_query_execution_time: Option<u64>,

    /// Delay before retrying a statement that hit a busy database (milliseconds).
    /// Busy errors are not retried when unset.
    pub busy_retry_delay: Option<u64>,

    /// Retries per statement after a busy error.
    pub busy_max_retries: u32,

    /// Prepared statements kept per runner; `0` disables the cache.
    pub statement_cache_size: usize,

    /// Replays of a transaction after serialization failures.
    pub max_transaction_retries: u32,

    /// Table that records views.
    pub metadata_table_name: String,

    /// Default schema for unqualified table names.
    pub schema: Option<String>,

    /// Default database for unqualified table names.
    pub database: Option<String>,

    /// Permit column changes that drop and re-add the column.
    pub allow_lossy_column_changes: bool,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            max_query_execution_time: None,
            busy_retry_delay: None,
            busy_max_retries: 5,
            statement_cache_size: 100,
            max_transaction_retries: 5,
            metadata_table_name: DEFAULT_METADATA_TABLE.to_string(),
            schema: None,
            database: None,
            allow_lossy_column_changes: false,
        }
    }
}

impl RunnerOptions {
    /// Parses options from JSON; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_max_query_execution_time(mut self, millis: u64) -> Self {
        self.max_query_execution_time = Some(millis);
        self
    }

    pub fn with_busy_retry(mut self, delay_millis: u64, max_retries: u32) -> Self {
        self.busy_retry_delay = Some(delay_millis);
        self.busy_max_retries = max_retries;
        self
    }

    pub fn with_statement_cache_size(mut self, size: usize) -> Self {
        self.statement_cache_size = size;
        self
    }

    pub fn with_max_transaction_retries(mut self, retries: u32) -> Self {
        self.max_transaction_retries = retries;
        self
    }

    pub fn with_lossy_column_changes(mut self) -> Self {
        self.allow_lossy_column_changes = true;
        self
    }

    pub(crate) fn slow_query_threshold(&self) -> Option<Duration> {
        self.max_query_execution_time.map(Duration::from_millis)
    }

    pub(crate) fn busy_delay(&self) -> Option<Duration> {
        self.busy_retry_delay.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_keeps_defaults() {
        let options = RunnerOptions::from_json(
            r#"{"max_query_execution_time": 250, "schema": "app", "allow_lossy_column_changes": true}"#,
        )
        .unwrap();
        assert_eq!(options.slow_query_threshold(), Some(Duration::from_millis(250)));
        assert_eq!(options.schema.as_deref(), Some("app"));
        assert!(options.allow_lossy_column_changes);
        assert_eq!(options.metadata_table_name, DEFAULT_METADATA_TABLE);
        assert_eq!(options.statement_cache_size, 100);
        assert_eq!(options.busy_delay(), None);
    }

    #[test]
    fn test_from_json_rejects_bad_types() {
        assert!(matches!(
            RunnerOptions::from_json(r#"{"busy_max_retries": "many"}"#),
            Err(crate::RunnerError::Options(_))
        ));
    }

    #[test]
    fn test_builders() {
        let options = RunnerOptions::default().with_busy_retry(20, 3).with_statement_cache_size(2);
        assert_eq!(options.busy_delay(), Some(Duration::from_millis(20)));
        assert_eq!(options.busy_max_retries, 3);
        assert_eq!(options.statement_cache_size, 2);
    }
}
