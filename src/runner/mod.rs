//! The query runner: one logical session with the engine.
//!
//! A runner owns at most one connection, tracks the transaction state of that
//! connection and is the only path SQL takes to the driver. Schema operations
//! are implemented on top of it in [`crate::orchestrator`].

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::Instrument;

use crate::broadcast::{Broadcaster, TransactionListener};
use crate::config::RunnerOptions;
use crate::dialect::{CatalogReader, DialectContext, DialectStrategy};
use crate::driver::{Connection, Driver, QueryResult, ReplicationMode, Row};
use crate::error::{DriverError, Result, RunnerError};
use crate::logger::{QueryLogger, TracingLogger};
use crate::naming::{DefaultNamingStrategy, NamingStrategy};
use crate::schema::{Table, TablePath, View};
use crate::statement::{Query, SqlInMemory, Value};

mod cache;
mod transaction;

use cache::StatementCache;

/// Lifecycle of a runner.
///
/// `Idle` until the first statement or [`QueryRunner::connect`], then
/// `Connected`, `InTransaction` between start and commit/rollback, and
/// finally `Released`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Connected,
    InTransaction,
    Released,
}

pub struct QueryRunnerBuilder {
    driver: Arc<dyn Driver>,
    options: RunnerOptions,
    logger: Arc<dyn QueryLogger>,
    naming: Arc<dyn NamingStrategy>,
    broadcaster: Broadcaster,
    mode: ReplicationMode,
}

impl QueryRunnerBuilder {
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self {
            driver,
            options: RunnerOptions::default(),
            logger: Arc::new(TracingLogger),
            naming: Arc::new(DefaultNamingStrategy),
            broadcaster: Broadcaster::default(),
            mode: ReplicationMode::Master,
        }
    }

    pub fn options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn QueryLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn naming_strategy(mut self, naming: Arc<dyn NamingStrategy>) -> Self {
        self.naming = naming;
        self
    }

    /// Registers a listener for transaction events.
    pub fn listener(mut self, listener: Arc<dyn TransactionListener>) -> Self {
        self.broadcaster.subscribe(listener);
        self
    }

    pub fn replication_mode(mut self, mode: ReplicationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> QueryRunner {
        let dialect = self.driver.dialect();
        let statements = StatementCache::new(if dialect.capabilities().supports_statement_cache {
            self.options.statement_cache_size
        } else {
            0
        });
        QueryRunner {
            driver: self.driver,
            dialect,
            options: self.options,
            logger: self.logger,
            naming: self.naming,
            broadcaster: self.broadcaster,
            mode: self.mode,
            connection: None,
            state: RunnerState::Idle,
            statements,
            replay_buffer: Vec::new(),
            restarts: 0,
            sql_memory_mode: false,
            sql_in_memory: SqlInMemory::default(),
            tables: IndexMap::new(),
            views: IndexMap::new(),
            introspections: 0,
        }
    }
}

/// Owned pieces of a [`DialectContext`], so the context can outlive a
/// mutable borrow of the runner.
pub(crate) struct Session {
    naming: Arc<dyn NamingStrategy>,
    database: Option<String>,
    schema: Option<String>,
    metadata_table: String,
}

impl Session {
    pub(crate) fn context(&self) -> DialectContext<'_> {
        DialectContext {
            naming: self.naming.as_ref(),
            database: self.database.as_deref(),
            schema: self.schema.as_deref(),
            metadata_table: &self.metadata_table,
        }
    }
}

pub struct QueryRunner {
    driver: Arc<dyn Driver>,
    pub(crate) dialect: Arc<dyn DialectStrategy>,
    pub(crate) options: RunnerOptions,
    pub(crate) logger: Arc<dyn QueryLogger>,
    pub(crate) naming: Arc<dyn NamingStrategy>,
    broadcaster: Broadcaster,
    mode: ReplicationMode,
    connection: Option<Box<dyn Connection>>,
    state: RunnerState,
    statements: StatementCache,
    /// Statements of the active transaction, kept for replay after a restart.
    replay_buffer: Vec<Query>,
    restarts: u32,
    sql_memory_mode: bool,
    sql_in_memory: SqlInMemory,
    pub(crate) tables: IndexMap<String, Arc<Table>>,
    pub(crate) views: IndexMap<String, Arc<View>>,
    pub(crate) introspections: usize,
}

impl fmt::Debug for QueryRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryRunner")
            .field("dialect", &self.dialect.name())
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("sql_memory_mode", &self.sql_memory_mode)
            .field("cached_tables", &self.tables.len())
            .finish()
    }
}

impl QueryRunner {
    pub fn builder(driver: Arc<dyn Driver>) -> QueryRunnerBuilder {
        QueryRunnerBuilder::new(driver)
    }

    pub fn dialect(&self) -> &Arc<dyn DialectStrategy> {
        &self.dialect
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    pub fn replication_mode(&self) -> ReplicationMode {
        self.mode
    }

    pub fn is_released(&self) -> bool {
        self.state == RunnerState::Released
    }

    pub fn is_transaction_active(&self) -> bool {
        self.state == RunnerState::InTransaction
    }

    /// Statements waiting to be replayed if the transaction restarts.
    pub fn buffered_statements(&self) -> &[Query] {
        &self.replay_buffer
    }

    /// Number of catalog introspections this runner performed.
    pub fn introspection_count(&self) -> usize {
        self.introspections
    }

    /// Prepared statements currently cached.
    pub fn cached_statement_count(&self) -> usize {
        self.statements.len()
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.is_released() {
            return Err(RunnerError::AlreadyReleased);
        }
        Ok(())
    }

    pub(crate) fn session(&self) -> Session {
        Session {
            naming: self.naming.clone(),
            database: self.options.database.clone(),
            schema: self.options.schema.clone(),
            metadata_table: self.options.metadata_table_name.clone(),
        }
    }

    /// Cache key of a table or view path.
    pub(crate) fn object_key(&self, path: &TablePath) -> String {
        path.clone()
            .or_defaults(self.options.database.as_deref(), self.options.schema.as_deref())
            .to_string()
    }

    // ====== Connection lifecycle ======

    /// Acquires a connection from the driver. Calling it again is a no-op.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.connection.is_some() {
            return Ok(());
        }
        let connection = self.driver.connect(self.mode).await.map_err(RunnerError::Connection)?;
        self.connection = Some(connection);
        self.state = RunnerState::Connected;
        tracing::debug!(dialect = self.dialect.name(), mode = ?self.mode, "runner connected");
        Ok(())
    }

    /// Returns the connection to the driver and drops every cache.
    ///
    /// Idempotent. A transaction still open is rolled back first.
    pub async fn release(&mut self) -> Result<()> {
        if self.is_released() {
            return Ok(());
        }
        if self.is_transaction_active() {
            for sql in self.dialect.rollback_transaction() {
                if let Err(err) = self.run(&sql, &[]).await {
                    tracing::warn!(error = %err, "rollback on release failed");
                }
            }
        }
        self.state = RunnerState::Released;
        self.statements.clear();
        self.replay_buffer.clear();
        self.tables.clear();
        self.views.clear();
        self.sql_in_memory.clear();
        if let Some(connection) = self.connection.take() {
            self.driver.release(connection).await.map_err(RunnerError::Connection)?;
        }
        tracing::debug!(dialect = self.dialect.name(), "runner released");
        Ok(())
    }

    // ====== Statements ======

    /// Executes one statement.
    ///
    /// Inside a transaction on a restart dialect the statement is buffered;
    /// a serialization failure rolls back to the restart savepoint and
    /// replays the buffer, ending with this statement.
    pub async fn query(&mut self, sql: &str, params: Vec<Value>) -> Result<QueryResult> {
        self.ensure_usable()?;
        self.connect().await?;
        let buffering = self.is_transaction_active() && self.dialect.restart_savepoint().is_some();
        if buffering {
            self.replay_buffer.push(Query::with_params(sql, params.clone()));
        }
        match self.run(sql, &params).await {
            Ok(result) => Ok(result),
            Err(err) if buffering && self.dialect.is_serialization_failure(&err) => {
                let replayed = self.restart_transaction(err, Query::with_params(sql, params)).await?;
                Ok(replayed.unwrap_or_default())
            }
            Err(err) => {
                if buffering {
                    self.replay_buffer.pop();
                }
                Err(self.failed(err, sql, params))
            }
        }
    }

    /// Convenience for statements without parameters.
    pub async fn execute(&mut self, sql: &str) -> Result<QueryResult> {
        self.query(sql, Vec::new()).await
    }

    /// Records `up`/`down` in the in-memory log and, unless sql-in-memory
    /// mode is on, executes `up` in order. Stops at the first failure.
    pub async fn execute_queries(&mut self, up: Vec<Query>, down: Vec<Query>) -> Result<()> {
        self.ensure_usable()?;
        self.sql_in_memory.push(up.clone(), down);
        if self.sql_memory_mode {
            return Ok(());
        }
        for query in up {
            self.query(&query.sql, query.params).await?;
        }
        Ok(())
    }

    /// Runs a statement with logging, slow-query detection and busy retries.
    pub(crate) async fn run(&mut self, sql: &str, params: &[Value]) -> std::result::Result<QueryResult, DriverError> {
        self.logger.log_query(sql, params);
        let started = Instant::now();
        let mut retries = 0u32;
        let result = loop {
            match self.execute_once(sql, params).await {
                Err(err) if self.should_retry_busy(&err, retries) => {
                    retries += 1;
                    let delay = self.options.busy_delay().unwrap_or_default();
                    tracing::debug!(attempt = retries, delay_ms = delay.as_millis() as u64, "database busy, retrying");
                    tokio::time::sleep(delay).await;
                }
                other => break other,
            }
        };
        if let Some(threshold) = self.options.slow_query_threshold() {
            let elapsed = started.elapsed();
            if elapsed > threshold {
                self.logger.log_query_slow(elapsed, sql, params);
            }
        }
        result
    }

    fn should_retry_busy(&self, err: &DriverError, retries: u32) -> bool {
        self.options.busy_retry_delay.is_some()
            && retries < self.options.busy_max_retries
            && self.dialect.is_busy_error(err)
    }

    async fn execute_once(&mut self, sql: &str, params: &[Value]) -> std::result::Result<QueryResult, DriverError> {
        let span = tracing::debug_span!("runner.query", sql = %sql, params = params.len());
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| DriverError::new("runner is not connected"))?;
        if !self.statements.is_enabled() {
            return connection.execute(sql, params).instrument(span).await;
        }
        let prepared = match self.statements.get(sql) {
            Some(prepared) => prepared,
            None => {
                let prepared = connection.prepare(sql).instrument(span.clone()).await?;
                self.statements.insert(prepared.clone());
                prepared
            }
        };
        connection.execute_prepared(&prepared, params).instrument(span).await
    }

    /// Logs a driver failure and wraps it.
    pub(crate) fn failed(&self, source: DriverError, sql: &str, params: Vec<Value>) -> RunnerError {
        self.logger.log_query_error(&source, sql, &params);
        RunnerError::QueryFailed {
            sql: sql.to_string(),
            params,
            source,
        }
    }

    // ====== SQL in memory ======

    /// From now on schema changes are recorded instead of executed.
    pub fn enable_sql_memory(&mut self) {
        self.sql_in_memory.clear();
        self.sql_memory_mode = true;
    }

    pub fn disable_sql_memory(&mut self) {
        self.sql_in_memory.clear();
        self.sql_memory_mode = false;
    }

    pub fn is_sql_memory_enabled(&self) -> bool {
        self.sql_memory_mode
    }

    /// Every up/down pair recorded so far.
    pub fn get_memory_sql(&self) -> &SqlInMemory {
        &self.sql_in_memory
    }

    pub fn clear_sql_memory(&mut self) {
        self.sql_in_memory.clear();
    }

    /// Executes the recorded up statements in order.
    pub async fn execute_memory_up_sql(&mut self) -> Result<()> {
        let up = self.sql_in_memory.up.clone();
        for query in up {
            self.query(&query.sql, query.params).await?;
        }
        Ok(())
    }

    /// Executes the recorded down statements, last change first.
    pub async fn execute_memory_down_sql(&mut self) -> Result<()> {
        let down: Vec<Query> = self.sql_in_memory.down_in_execution_order().cloned().collect();
        for query in down {
            self.query(&query.sql, query.params).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogReader for QueryRunner {
    async fn fetch(&mut self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        Ok(self.query(sql, params).await?.rows)
    }
}
