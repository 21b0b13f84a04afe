//! Per-dialect strategies: capabilities, catalog introspection and DDL synthesis.
//!
//! The runner is generic; everything engine-specific sits behind
//! [`DialectStrategy`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::driver::Row;
use crate::error::{DriverError, Result, RunnerError};
use crate::naming::NamingStrategy;
use crate::schema::{
    ConstraintRename, Table, TableCheck, TableColumn, TableExclusion, TableForeignKey, TableIndex,
    TablePath, TableUnique, View,
};
use crate::statement::{Query, Statements, Value};

pub mod capabilities;
pub mod mysql;
pub mod postgres;
pub mod sql;
pub mod sqlite;

pub use capabilities::Capabilities;

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Read access to the engine's catalogs.
///
/// Implemented by the query runner; introspectors only ever read through it.
#[async_trait]
pub trait CatalogReader: Send {
    async fn fetch(&mut self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>>;
}

/// Session facts the synthesizers and introspectors need.
#[derive(Clone, Copy)]
pub struct DialectContext<'a> {
    pub naming: &'a dyn NamingStrategy,
    pub database: Option<&'a str>,
    pub schema: Option<&'a str>,
    pub metadata_table: &'a str,
}

impl fmt::Debug for DialectContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialectContext")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("metadata_table", &self.metadata_table)
            .finish()
    }
}

/// One change applied to an existing table.
#[derive(Debug, Clone, Copy)]
pub enum AlterOp<'a> {
    AddColumn(&'a TableColumn),
    RenameColumn {
        old: &'a TableColumn,
        new: &'a TableColumn,
        renames: &'a [ConstraintRename],
    },
    ChangeColumn {
        old: &'a TableColumn,
        new: &'a TableColumn,
    },
    DropColumn(&'a TableColumn),
    /// Primary key of `before` replaced by the primary key of `after`.
    UpdatePrimaryKey,
    CreateUnique(&'a TableUnique),
    DropUnique(&'a TableUnique),
    CreateCheck(&'a TableCheck),
    DropCheck(&'a TableCheck),
    CreateExclusion(&'a TableExclusion),
    DropExclusion(&'a TableExclusion),
    CreateForeignKey(&'a TableForeignKey),
    DropForeignKey(&'a TableForeignKey),
    CreateIndex(&'a TableIndex),
    DropIndex(&'a TableIndex),
}

/// A table before and after one [`AlterOp`].
#[derive(Debug, Clone, Copy)]
pub struct AlterTable<'a> {
    pub before: &'a Table,
    pub after: &'a Table,
    pub op: AlterOp<'a>,
}

/// Everything engine-specific.
#[async_trait]
pub trait DialectStrategy: Send + Sync + fmt::Debug {
    fn capabilities(&self) -> &Capabilities;

    fn name(&self) -> &'static str {
        self.capabilities().name
    }

    fn quote(&self, ident: &str) -> String {
        sql::quote_ident(ident, self.capabilities().quote)
    }

    fn escape_path(&self, path: &TablePath) -> String {
        sql::quote_path(path, self.capabilities().quote)
    }

    /// Positional placeholder for the `index`-th parameter (1-based).
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    // ---------------------------------------------------------------
    // Transactions
    // ---------------------------------------------------------------

    /// Statements that open a transaction. Fails for unsupported levels.
    fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<Vec<String>>;

    fn commit_transaction(&self) -> Vec<String> {
        vec!["COMMIT".to_string()]
    }

    fn rollback_transaction(&self) -> Vec<String> {
        vec!["ROLLBACK".to_string()]
    }

    /// Savepoint that conflicting transactions roll back to before replaying.
    fn restart_savepoint(&self) -> Option<&'static str> {
        None
    }

    /// Lock contention worth retrying after a delay.
    fn is_busy_error(&self, _err: &DriverError) -> bool {
        false
    }

    /// Conflict that restarts the whole transaction.
    fn is_serialization_failure(&self, _err: &DriverError) -> bool {
        false
    }

    /// Canonical spelling of a type name, used when comparing columns.
    fn normalize_type(&self, column_type: &str) -> String {
        column_type.trim().to_ascii_lowercase()
    }

    /// Why changing `old` into `new` can only be done by dropping the column.
    fn lossy_change(&self, _old: &TableColumn, _new: &TableColumn) -> Option<String> {
        None
    }

    /// Rejects tables the dialect cannot express, before any SQL is built.
    fn check_support(&self, table: &Table) -> Result<()> {
        let caps = self.capabilities();
        if !caps.supports_exclusions && !table.exclusions.is_empty() {
            return Err(RunnerError::unsupported("exclusion constraints", caps.name));
        }
        if !caps.supports_checks && !table.checks.is_empty() {
            return Err(RunnerError::unsupported("check constraints", caps.name));
        }
        for column in &table.columns {
            self.check_column_support(table, column)?;
        }
        Ok(())
    }

    fn check_column_support(&self, table: &Table, column: &TableColumn) -> Result<()> {
        let caps = self.capabilities();
        if column.generation_strategy == Some(crate::schema::GenerationStrategy::Rowid) && !caps.supports_rowid {
            return Err(RunnerError::unsupported("rowid generation", caps.name));
        }
        if column.is_increment() && !caps.composite_increment && table.primary_columns().len() > 1 {
            return Err(RunnerError::unsupported(
                "autoincrement on a composite primary key",
                caps.name,
            ));
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------

    /// Loads the requested tables; missing ones are left out.
    async fn load_tables(
        &self,
        reader: &mut dyn CatalogReader,
        paths: &[TablePath],
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<Table>>;

    /// Every user table in the current database/schema.
    async fn list_tables(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<TablePath>>;

    /// Whether the view metadata table exists yet.
    async fn has_metadata_table(&self, reader: &mut dyn CatalogReader, ctx: &DialectContext<'_>) -> Result<bool> {
        let found = self
            .load_tables(reader, std::slice::from_ref(&metadata_path(ctx)), ctx)
            .await?;
        Ok(!found.is_empty())
    }

    /// Loads views recorded in the metadata table. Nothing is recorded
    /// before the first view is created, so a missing table means no views.
    async fn load_views(
        &self,
        reader: &mut dyn CatalogReader,
        paths: &[TablePath],
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<View>> {
        if !self.has_metadata_table(reader, ctx).await? {
            return Ok(Vec::new());
        }
        let query = select_view_metadata(self, paths, ctx);
        let rows = reader.fetch(&query.sql, query.params).await?;
        Ok(views_from_metadata(rows, ctx))
    }

    async fn current_database(&self, reader: &mut dyn CatalogReader) -> Result<Option<String>>;

    async fn current_schema(&self, reader: &mut dyn CatalogReader) -> Result<Option<String>>;

    async fn has_database(&self, _reader: &mut dyn CatalogReader, _name: &str) -> Result<bool> {
        Err(RunnerError::unsupported("database queries", self.name()))
    }

    async fn has_schema(&self, _reader: &mut dyn CatalogReader, _name: &str) -> Result<bool> {
        Err(RunnerError::unsupported("schema queries", self.name()))
    }

    /// Statements that remove every table and view.
    async fn clear_database(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<String>>;

    // ---------------------------------------------------------------
    // DDL
    // ---------------------------------------------------------------

    fn create_table(&self, table: &Table, ctx: &DialectContext<'_>) -> Result<Statements>;

    /// Inverse of [`create_table`](Self::create_table).
    fn drop_table(&self, table: &Table, ctx: &DialectContext<'_>) -> Result<Statements> {
        Ok(self.create_table(table, ctx)?.inverse())
    }

    fn rename_table(
        &self,
        before: &Table,
        after: &Table,
        renames: &[ConstraintRename],
        ctx: &DialectContext<'_>,
    ) -> Result<Statements>;

    fn alter_table(&self, change: &AlterTable<'_>, ctx: &DialectContext<'_>) -> Result<Statements>;

    /// `CREATE TABLE IF NOT EXISTS` for the view metadata table.
    fn create_metadata_table(&self, ctx: &DialectContext<'_>) -> Query {
        Query::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({} varchar(255) NOT NULL, {} varchar(255) NULL, \
             {} varchar(255) NULL, {} varchar(255) NULL, {} text NULL)",
            self.escape_path(&metadata_path(ctx)),
            self.quote("type"),
            self.quote("database"),
            self.quote("schema"),
            self.quote("name"),
            self.quote("value"),
        ))
    }

    fn create_view(&self, view: &View, ctx: &DialectContext<'_>) -> Result<Statements> {
        let mut stmts = Statements::new();
        let name = self.escape_path(&view.path);
        stmts.pair(
            format!("CREATE VIEW {} AS {}", name, view.expression),
            format!("DROP VIEW {}", name),
        );
        stmts.push_up(self.create_metadata_table(ctx));
        stmts.push_up(insert_view_metadata(self, view, ctx));
        stmts.push_down(delete_view_metadata(self, view, ctx));
        Ok(stmts)
    }

    fn drop_view(&self, view: &View, ctx: &DialectContext<'_>) -> Result<Statements> {
        Ok(self.create_view(view, ctx)?.inverse())
    }

    fn clear_table(&self, path: &TablePath) -> String {
        format!("DELETE FROM {}", self.escape_path(path))
    }

    fn create_database(&self, _name: &str, _if_not_exists: bool) -> Result<Statements> {
        Err(RunnerError::unsupported("creating databases", self.name()))
    }

    fn drop_database(&self, _name: &str, _if_exists: bool) -> Result<Statements> {
        Err(RunnerError::unsupported("dropping databases", self.name()))
    }

    fn create_schema(&self, _name: &str, _if_not_exists: bool) -> Result<Statements> {
        Err(RunnerError::unsupported("creating schemas", self.name()))
    }

    fn drop_schema(&self, _name: &str, _if_exists: bool, _cascade: bool) -> Result<Statements> {
        Err(RunnerError::unsupported("dropping schemas", self.name()))
    }
}

// ====== View metadata rows ======

fn metadata_path(ctx: &DialectContext<'_>) -> TablePath {
    TablePath::parse(ctx.metadata_table)
}

pub(crate) fn insert_view_metadata<D: DialectStrategy + ?Sized>(
    dialect: &D,
    view: &View,
    ctx: &DialectContext<'_>,
) -> Query {
    let table = dialect.escape_path(&metadata_path(ctx));
    let placeholders: Vec<String> = (1..=5).map(|i| dialect.placeholder(i)).collect();
    Query::with_params(
        format!(
            "INSERT INTO {}({}, {}, {}, {}, {}) VALUES ({})",
            table,
            dialect.quote("type"),
            dialect.quote("database"),
            dialect.quote("schema"),
            dialect.quote("name"),
            dialect.quote("value"),
            placeholders.join(", ")
        ),
        vec![
            Value::from(view.metadata_type()),
            Value::from(view.path.database.clone().or(ctx.database.map(str::to_string))),
            Value::from(view.path.schema.clone().or(ctx.schema.map(str::to_string))),
            Value::from(view.name()),
            Value::from(view.expression.as_str()),
        ],
    )
}

pub(crate) fn delete_view_metadata<D: DialectStrategy + ?Sized>(
    dialect: &D,
    view: &View,
    ctx: &DialectContext<'_>,
) -> Query {
    let table = dialect.escape_path(&metadata_path(ctx));
    let mut sql = format!(
        "DELETE FROM {} WHERE {} = {} AND {} = {}",
        table,
        dialect.quote("type"),
        dialect.placeholder(1),
        dialect.quote("name"),
        dialect.placeholder(2)
    );
    let mut params = vec![Value::from(view.metadata_type()), Value::from(view.name())];
    if let Some(schema) = view.path.schema.clone().or(ctx.schema.map(str::to_string)) {
        sql.push_str(&format!(" AND {} = {}", dialect.quote("schema"), dialect.placeholder(3)));
        params.push(Value::from(schema));
    }
    Query::with_params(sql, params)
}

fn select_view_metadata<D: DialectStrategy + ?Sized>(
    dialect: &D,
    paths: &[TablePath],
    ctx: &DialectContext<'_>,
) -> Query {
    let table = dialect.escape_path(&metadata_path(ctx));
    let mut sql = format!(
        "SELECT {}, {}, {}, {}, {} FROM {} WHERE {} IN ('VIEW', 'MATERIALIZED_VIEW')",
        dialect.quote("type"),
        dialect.quote("database"),
        dialect.quote("schema"),
        dialect.quote("name"),
        dialect.quote("value"),
        table,
        dialect.quote("type"),
    );
    let mut params = Vec::new();
    if !paths.is_empty() {
        let placeholders: Vec<String> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                params.push(Value::from(p.name.as_str()));
                dialect.placeholder(i + 1)
            })
            .collect();
        sql.push_str(&format!(" AND {} IN ({})", dialect.quote("name"), placeholders.join(", ")));
    }
    Query::with_params(sql, params)
}

fn views_from_metadata(rows: Vec<Row>, ctx: &DialectContext<'_>) -> Vec<View> {
    rows.into_iter()
        .filter_map(|row| {
            let name = row.get_string("name")?;
            let kind = row.get_string("type").unwrap_or_default();
            let schema = row.get_string("schema");
            if let (Some(wanted), Some(found)) = (ctx.schema, schema.as_deref()) {
                if wanted != found {
                    return None;
                }
            }
            Some(View {
                path: TablePath {
                    database: row.get_string("database"),
                    schema,
                    name,
                },
                expression: row.get_string("value").unwrap_or_default(),
                materialized: kind == "MATERIALIZED_VIEW",
            })
        })
        .collect()
}

/// Unsupported-operation error carrying the dialect name.
pub(crate) fn unsupported<D: DialectStrategy + ?Sized>(dialect: &D, feature: &str) -> RunnerError {
    RunnerError::unsupported(feature, dialect.name())
}
