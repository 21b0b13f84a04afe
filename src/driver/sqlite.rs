use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteRow, SqliteStatement};
use sqlx::{Column, ConnectOptions, Either, Executor, Row as _, SqliteConnection, Statement, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use crate::dialect::sqlite::SqliteDialect;
use crate::dialect::DialectStrategy;
use crate::error::DriverError;
use crate::statement::Value;

use super::bind::bind_values;
use super::{Connection, Driver, PreparedStatement, QueryResult, ReplicationMode, Row};

/// SQLite driver over a single shared connection.
///
/// Every runner created from this driver talks to the same connection, which
/// keeps `sqlite::memory:` databases alive and visible to all of them.
#[derive(Clone)]
pub struct SqliteDriver {
    connection: Arc<Mutex<SqliteConnection>>,
    dialect: Arc<SqliteDialect>,
}

impl SqliteDriver {
    /// Opens (or creates) the database at `url`, e.g. `sqlite://app.db` or `sqlite::memory:`.
    pub async fn open(url: &str) -> Result<Self, DriverError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let connection = options.connect().await?;
        Ok(Self::from_connection(connection))
    }

    /// Private in-memory database.
    pub async fn open_in_memory() -> Result<Self, DriverError> {
        Self::open("sqlite::memory:").await
    }

    pub fn from_connection(connection: SqliteConnection) -> Self {
        Self {
            connection: Arc::new(Mutex::new(connection)),
            dialect: Arc::new(SqliteDialect::new()),
        }
    }
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Arc<dyn DialectStrategy> {
        self.dialect.clone()
    }

    async fn connect(&self, _mode: ReplicationMode) -> Result<Box<dyn Connection>, DriverError> {
        Ok(Box::new(SqliteSession {
            connection: self.connection.clone(),
        }))
    }

    async fn release(&self, _connection: Box<dyn Connection>) -> Result<(), DriverError> {
        // The shared connection stays open for the next runner.
        Ok(())
    }
}

struct SqliteSession {
    connection: Arc<Mutex<SqliteConnection>>,
}

#[async_trait]
impl Connection for SqliteSession {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, DriverError> {
        let mut conn = self.connection.lock().await;
        let query = bind_values(sqlx::query(sql), params);
        collect(query.fetch_many(&mut *conn)).await
    }

    async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement, DriverError> {
        let mut conn = self.connection.lock().await;
        let statement = (&mut *conn).prepare(sql).await?;
        Ok(PreparedStatement::new(sql, Statement::to_owned(&statement)))
    }

    async fn execute_prepared(
        &mut self,
        statement: &PreparedStatement,
        params: &[Value],
    ) -> Result<QueryResult, DriverError> {
        let prepared = match statement.downcast::<SqliteStatement<'static>>() {
            Some(prepared) => prepared,
            None => return self.execute(&statement.sql, params).await,
        };
        let mut conn = self.connection.lock().await;
        let query = bind_values(prepared.query(), params);
        collect(query.fetch_many(&mut *conn)).await
    }
}

async fn collect<S>(mut stream: S) -> Result<QueryResult, DriverError>
where
    S: futures::Stream<Item = Result<Either<sqlx::sqlite::SqliteQueryResult, SqliteRow>, sqlx::Error>>
        + Unpin,
{
    let mut result = QueryResult::default();
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => result.affected += done.rows_affected(),
            Either::Right(row) => result.rows.push(decode_row(&row)?),
        }
    }
    Ok(result)
}

/// Decodes by the storage class of each value, not the declared column type.
fn decode_row(row: &SqliteRow) -> Result<Row, DriverError> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => Value::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        out.insert(column.name(), value);
    }
    Ok(out)
}
