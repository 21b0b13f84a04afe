use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Either, Postgres, Row as _, TypeInfo, ValueRef};

use crate::dialect::postgres::PostgresDialect;
use crate::dialect::DialectStrategy;
use crate::error::DriverError;
use crate::statement::Value;

use super::bind::bind_values;
use super::{Connection, Driver, QueryResult, ReplicationMode, Row};

/// Pooled PostgreSQL (or CockroachDB) driver with optional read replicas.
pub struct PostgresDriver {
    master: PgPool,
    replicas: Vec<PgPool>,
    next_replica: AtomicUsize,
    dialect: Arc<PostgresDialect>,
}

impl PostgresDriver {
    pub async fn open(url: &str) -> Result<Self, DriverError> {
        let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            master: pool,
            replicas: Vec::new(),
            next_replica: AtomicUsize::new(0),
            dialect: Arc::new(PostgresDialect::postgres()),
        }
    }

    /// Speak the CockroachDB flavor over the same wire protocol.
    pub fn cockroach(mut self) -> Self {
        self.dialect = Arc::new(PostgresDialect::cockroach());
        self
    }

    pub fn with_replica(mut self, pool: PgPool) -> Self {
        self.replicas.push(pool);
        self
    }

    fn pick(&self, mode: ReplicationMode) -> &PgPool {
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
impl Driver for PostgresDriver {
    fn dialect(&self) -> Arc<dyn DialectStrategy> {
        self.dialect.clone()
    }

    async fn connect(&self, mode: ReplicationMode) -> Result<Box<dyn Connection>, DriverError> {
        let connection = self.pick(mode).acquire().await?;
        Ok(Box::new(PgSession { connection }))
    }

    async fn release(&self, connection: Box<dyn Connection>) -> Result<(), DriverError> {
        // Dropping a pooled connection hands it back to its pool.
        drop(connection);
        Ok(())
    }
}

struct PgSession {
    connection: PoolConnection<Postgres>,
}

#[async_trait]
impl Connection for PgSession {
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

fn decode_row(row: &PgRow) -> Result<Row, DriverError> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let type_name = raw.type_info().name().to_ascii_uppercase();
            match type_name.as_str() {
                "BOOL" => Value::Bool(row.try_get_unchecked::<bool, _>(i)?),
                "INT2" => Value::Int(i64::from(row.try_get_unchecked::<i16, _>(i)?)),
                "INT4" => Value::Int(i64::from(row.try_get_unchecked::<i32, _>(i)?)),
                "INT8" => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                "OID" => Value::Int(i64::from(row.try_get_unchecked::<sqlx::postgres::types::Oid, _>(i)?.0)),
                "FLOAT4" => Value::Float(f64::from(row.try_get_unchecked::<f32, _>(i)?)),
                "FLOAT8" => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BYTEA" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => row
                    .try_get_unchecked::<String, _>(i)
                    .map(Value::Text)
                    .unwrap_or(Value::Null),
            }
        };
        out.insert(column.name(), value);
    }
    Ok(out)
}
