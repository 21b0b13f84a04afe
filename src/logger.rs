//! Query logging hooks.

use std::time::Duration;

use crate::error::DriverError;
use crate::statement::Value;

/// Receives every statement a runner executes.
///
/// All methods default to doing nothing so implementors pick what they need.
pub trait QueryLogger: Send + Sync {
    fn log_query(&self, _sql: &str, _params: &[Value]) {}

    /// Called after a statement took longer than `max_query_execution_time`.
    fn log_query_slow(&self, _elapsed: Duration, _sql: &str, _params: &[Value]) {}

    fn log_query_error(&self, _error: &DriverError, _sql: &str, _params: &[Value]) {}

    /// Progress messages from schema operations.
    fn log_schema_build(&self, _message: &str) {}
}

/// Default logger, forwarding to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl QueryLogger for TracingLogger {
    fn log_query(&self, sql: &str, params: &[Value]) {
        tracing::debug!(target: "sqlx_schema_runner::query", sql = %sql, params = ?params, "query");
    }

    fn log_query_slow(&self, elapsed: Duration, sql: &str, params: &[Value]) {
        tracing::warn!(
            target: "sqlx_schema_runner::query",
            elapsed_ms = elapsed.as_millis() as u64,
            sql = %sql,
            params = ?params,
            "query is slow"
        );
    }

    fn log_query_error(&self, error: &DriverError, sql: &str, params: &[Value]) {
        tracing::error!(
            target: "sqlx_schema_runner::query",
            error = %error,
            code = ?error.code,
            sql = %sql,
            params = ?params,
            "query failed"
        );
    }

    fn log_schema_build(&self, message: &str) {
        tracing::info!(target: "sqlx_schema_runner::schema", "{}", message);
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl QueryLogger for NoopLogger {}
