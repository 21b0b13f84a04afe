//! Driver boundary.
//!
//! A [`Driver`] hands out [`Connection`]s; the runner never talks to an
//! engine any other way. sqlx-backed drivers live in the feature-gated
//! submodules.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::dialect::DialectStrategy;
use crate::error::DriverError;
use crate::statement::Value;

#[cfg(any(feature = "sqlite", feature = "postgres", feature = "mysql"))]
mod bind;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "mysql")]
pub use mysql::MySqlDriver;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

/// Which server a connection should be taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicationMode {
    #[default]
    Master,
    Replica,
}

/// One result row, columns in select order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: IndexMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// Text value of a column, `None` for NULL or a missing column.
    pub fn get_string(&self, column: &str) -> Option<String> {
        self.get(column).and_then(Value::to_text)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::to_i64)
    }

    pub fn get_bool(&self, column: &str) -> bool {
        self.get(column).map(Value::to_bool).unwrap_or(false)
    }

    /// Value at a column position.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get_index(index).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Rows returned by a statement plus the number of rows it changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub affected: u64,
}

impl QueryResult {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self { rows, affected: 0 }
    }

    pub fn affected(affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            affected,
        }
    }
}

/// A statement prepared by a connection.
///
/// `inner` is the driver's own handle; only the connection that produced it
/// knows how to downcast it.
#[derive(Clone)]
pub struct PreparedStatement {
    pub sql: String,
    pub inner: Arc<dyn Any + Send + Sync>,
}

impl PreparedStatement {
    pub fn new<T: Any + Send + Sync>(sql: impl Into<String>, inner: T) -> Self {
        Self {
            sql: sql.into(),
            inner: Arc::new(inner),
        }
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedStatement").field("sql", &self.sql).finish()
    }
}

/// A live session with the engine.
#[async_trait]
pub trait Connection: Send {
    /// Runs one statement with positional parameters.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, DriverError>;

    /// Prepares `sql` for repeated execution.
    async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, DriverError> {
        Ok(PreparedStatement::new(sql, ()))
    }

    async fn execute_prepared(
        &mut self,
        statement: &PreparedStatement,
        params: &[Value],
    ) -> Result<QueryResult, DriverError> {
        self.execute(&statement.sql, params).await
    }
}

/// Source of connections for one engine.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Dialect spoken by the connections this driver hands out.
    fn dialect(&self) -> Arc<dyn DialectStrategy>;

    async fn connect(&self, mode: ReplicationMode) -> Result<Box<dyn Connection>, DriverError>;

    /// Returns a connection obtained from [`connect`](Self::connect).
    async fn release(&self, connection: Box<dyn Connection>) -> Result<(), DriverError>;
}

#[cfg(any(feature = "sqlite", feature = "postgres", feature = "mysql"))]
impl From<sqlx::Error> for DriverError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => DriverError {
                message: db.message().to_string(),
                code: db.code().map(|c| c.into_owned()),
            },
            _ => DriverError::new(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_accessors() {
        let row = Row::new()
            .with("name", "users")
            .with("notnull", 1i64)
            .with("dflt_value", Value::Null);
        assert_eq!(row.get_string("name").as_deref(), Some("users"));
        assert!(row.get_bool("notnull"));
        assert_eq!(row.get_string("dflt_value"), None);
        assert_eq!(row.get_string("missing"), None);
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["name", "notnull", "dflt_value"]);
    }

    #[test]
    fn test_prepared_statement_downcast() {
        let stmt = PreparedStatement::new("SELECT 1", 42u32);
        assert_eq!(stmt.downcast::<u32>(), Some(&42));
        assert!(stmt.downcast::<String>().is_none());
    }
}
