use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Either, MySql, Row as _, TypeInfo, ValueRef};

use crate::dialect::mysql::MySqlDialect;
use crate::dialect::DialectStrategy;
use crate::error::DriverError;
use crate::statement::Value;

use super::bind::bind_values;
use super::{Connection, Driver, QueryResult, ReplicationMode, Row};

/// Pooled MySQL / MariaDB driver with optional read replicas.
pub struct MySqlDriver {
    master: MySqlPool,
    replicas: Vec<MySqlPool>,
    next_replica: AtomicUsize,
    dialect: Arc<MySqlDialect>,
}

impl MySqlDriver {
    pub async fn open(url: &str) -> Result<Self, DriverError> {
        let pool = MySqlPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: MySqlPool) -> Self {
        Self {
            master: pool,
            replicas: Vec::new(),
            next_replica: AtomicUsize::new(0),
            dialect: Arc::new(MySqlDialect::new()),
        }
    }

    pub fn with_replica(mut self, pool: MySqlPool) -> Self {
        self.replicas.push(pool);
        self
    }

    fn pick(&self, mode: ReplicationMode) -> &MySqlPool {
        match mode {
            ReplicationMode::Replica if !self.replicas.is_empty() => {
                let i = self.next_replica.fetch_add(1, Ordering::Relaxed) % self.replicas.len();
                &self.replicas[i]
            }
            _ => &self.master,
        }
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn dialect(&self) -> Arc<dyn DialectStrategy> {
        self.dialect.clone()
    }

    async fn connect(&self, mode: ReplicationMode) -> Result<Box<dyn Connection>, DriverError> {
        let connection = self.pick(mode).acquire().await?;
        Ok(Box::new(MySqlSession { connection }))
    }

    async fn release(&self, connection: Box<dyn Connection>) -> Result<(), DriverError> {
        drop(connection);
        Ok(())
    }
}

struct MySqlSession {
    connection: PoolConnection<MySql>,
}

#[async_trait]
impl Connection for MySqlSession {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, DriverError> {
        let query = bind_values(sqlx::query(sql), params);
        let mut stream = query.fetch_many(&mut *self.connection);
        let mut result = QueryResult::default();
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => result.affected += done.rows_affected(),
                Either::Right(row) => result.rows.push(decode_row(&row)?),
            }
        }
        Ok(result)
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row, DriverError> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            if type_name.ends_with("UNSIGNED") {
                Value::Int(row.try_get_unchecked::<u64, _>(i)? as i64)
            } else {
                match type_name.as_str() {
                    "BOOLEAN" => Value::Bool(row.try_get_unchecked::<bool, _>(i)?),
                    "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
                        Value::Int(row.try_get_unchecked::<i64, _>(i)?)
                    }
                    "FLOAT" | "DOUBLE" => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                    "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
                        Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?)
                    }
                    _ => row
                        .try_get_unchecked::<String, _>(i)
                        .map(Value::Text)
                        .unwrap_or(Value::Null),
                }
            }
        };
        out.insert(column.name(), value);
    }
    Ok(out)
}
