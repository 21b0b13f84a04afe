//! Schema introspection, reversible DDL synthesis and a transactional query
//! runner for SQLite, PostgreSQL, CockroachDB and MySQL.
//!
//! A [`QueryRunner`] wraps one connection obtained from a [`Driver`]. Schema
//! operations (`create_table`, `add_column`, `create_foreign_key`, ...) load
//! the affected table from the engine's catalogs, let the dialect produce
//! paired up/down statements, run them and keep the resulting table model
//! cached. In sql-in-memory mode the statements are only recorded, which is
//! how [`QueryRunner::generate_migration`] builds migration scripts.

pub mod broadcast;
pub mod config;
pub mod diff;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod logger;
pub mod naming;
pub mod orchestrator;
pub mod runner;
pub mod schema;
pub mod statement;

pub use broadcast::{ListenerError, TransactionEvent, TransactionListener};
pub use config::RunnerOptions;
pub use diff::{diff_tables, MigrationScript, SchemaChange};
pub use dialect::mysql::MySqlDialect;
pub use dialect::postgres::PostgresDialect;
pub use dialect::sqlite::SqliteDialect;
pub use dialect::{Capabilities, DialectStrategy, IsolationLevel};
pub use driver::{Connection, Driver, PreparedStatement, QueryResult, ReplicationMode, Row};
pub use error::{DriverError, ObjectKind, Result, RunnerError};
pub use logger::{NoopLogger, QueryLogger, TracingLogger};
pub use naming::{DefaultNamingStrategy, NamingStrategy};
pub use orchestrator::TableTarget;
pub use runner::{QueryRunner, QueryRunnerBuilder, RunnerState};
pub use schema::{
    ConstraintRename, GeneratedType, GenerationStrategy, ReferentialAction, Table, TableCheck, TableColumn,
    TableExclusion, TableForeignKey, TableIndex, TablePath, TableUnique, View,
};
pub use statement::{Query, SqlInMemory, Statements, Value};

#[cfg(feature = "mysql")]
pub use driver::MySqlDriver;
#[cfg(feature = "postgres")]
pub use driver::PostgresDriver;
#[cfg(feature = "sqlite")]
pub use driver::SqliteDriver;
