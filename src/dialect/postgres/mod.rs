//! PostgreSQL dialect, also used for CockroachDB.
//!
//! CockroachDB speaks the PostgreSQL wire protocol and most of its DDL. The
//! differences handled here are the restart savepoint, explicit sequences,
//! unique constraints living as unique indices and the `table@index` syntax.

use async_trait::async_trait;

use crate::error::{DriverError, Result};
use crate::schema::{ConstraintRename, GeneratedType, GenerationStrategy, Table, TableColumn, TablePath, View};
use crate::statement::Statements;

use super::capabilities::{Capabilities, COCKROACH, POSTGRES};
use super::{
    delete_view_metadata, insert_view_metadata, unsupported, AlterTable, CatalogReader, DialectContext,
    DialectStrategy, IsolationLevel,
};

mod ddl;
mod introspect;

/// Savepoint CockroachDB transactions restart from.
pub const RESTART_SAVEPOINT: &str = "cockroach_restart";

/// SQLSTATE for `serialization_failure`.
const SERIALIZATION_FAILURE: &str = "40001";

#[derive(Debug, Clone)]
pub struct PostgresDialect {
    caps: &'static Capabilities,
    cockroach: bool,
}

impl PostgresDialect {
    pub fn postgres() -> Self {
        Self {
            caps: &POSTGRES,
            cockroach: false,
        }
    }

    pub fn cockroach() -> Self {
        Self {
            caps: &COCKROACH,
            cockroach: true,
        }
    }

    pub fn is_cockroach(&self) -> bool {
        self.cockroach
    }
}

impl Default for PostgresDialect {
    fn default() -> Self {
        Self::postgres()
    }
}

#[async_trait]
impl DialectStrategy for PostgresDialect {
    fn capabilities(&self) -> &Capabilities {
        self.caps
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn normalize_type(&self, column_type: &str) -> String {
        let lower = column_type.trim().to_ascii_lowercase();
        let canonical = match lower.as_str() {
            "int" | "integer" | "int8" | "serial8" | "bigserial" if self.cockroach => "bigint",
            "int" | "int4" | "serial" | "serial4" => "integer",
            "int2" | "smallserial" | "serial2" => "smallint",
            "int8" | "bigserial" | "serial8" => "bigint",
            "varchar" => "character varying",
            "char" => "character",
            "bool" => "boolean",
            "float" | "float8" => "double precision",
            "float4" => "real",
            "decimal" => "numeric",
            "timestamp" => "timestamp without time zone",
            "timestamptz" => "timestamp with time zone",
            "time" => "time without time zone",
            "timetz" => "time with time zone",
            "varbit" => "bit varying",
            "string" if self.cockroach => "text",
            other => other,
        };
        canonical.to_string()
    }

    fn lossy_change(&self, old: &TableColumn, new: &TableColumn) -> Option<String> {
        if old.as_expression != new.as_expression || old.generated_type != new.generated_type {
            return Some("computed columns cannot be altered in place".to_string());
        }
        None
    }

    fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<Vec<String>> {
        let mut statements = vec!["START TRANSACTION".to_string()];
        if let Some(level) = isolation {
            if !self.caps.supports_isolation(level) {
                return Err(unsupported(self, &format!("isolation level {}", level)));
            }
            statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level));
        }
        if self.cockroach {
            statements.push(format!("SAVEPOINT {}", RESTART_SAVEPOINT));
        }
        Ok(statements)
    }

    fn commit_transaction(&self) -> Vec<String> {
        if self.cockroach {
            vec![format!("RELEASE SAVEPOINT {}", RESTART_SAVEPOINT), "COMMIT".to_string()]
        } else {
            vec!["COMMIT".to_string()]
        }
    }

    fn restart_savepoint(&self) -> Option<&'static str> {
        if self.cockroach {
            Some(RESTART_SAVEPOINT)
        } else {
            None
        }
    }

    fn is_serialization_failure(&self, err: &DriverError) -> bool {
        err.has_code(SERIALIZATION_FAILURE)
    }

    fn check_column_support(&self, _table: &Table, column: &TableColumn) -> Result<()> {
        if !self.cockroach && column.generated_type == Some(GeneratedType::Virtual) {
            return Err(unsupported(self, "virtual generated columns"));
        }
        if column.generation_strategy == Some(GenerationStrategy::Rowid) && !self.caps.supports_rowid {
            return Err(unsupported(self, "rowid generation"));
        }
        Ok(())
    }

    async fn load_tables(
        &self,
        reader: &mut dyn CatalogReader,
        paths: &[TablePath],
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<Table>> {
        self.introspect(reader, paths, ctx).await
    }

    async fn list_tables(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<TablePath>> {
        self.table_names(reader, ctx).await
    }

    async fn current_database(&self, reader: &mut dyn CatalogReader) -> Result<Option<String>> {
        let rows = reader.fetch("SELECT current_database()::text AS \"name\"", Vec::new()).await?;
        Ok(rows.first().and_then(|r| r.get_string("name")))
    }

    async fn current_schema(&self, reader: &mut dyn CatalogReader) -> Result<Option<String>> {
        let rows = reader.fetch("SELECT current_schema()::text AS \"name\"", Vec::new()).await?;
        Ok(rows.first().and_then(|r| r.get_string("name")))
    }

    async fn has_database(&self, reader: &mut dyn CatalogReader, name: &str) -> Result<bool> {
        let rows = reader
            .fetch(
                "SELECT 1 AS \"found\" FROM pg_database WHERE datname = $1",
                vec![name.into()],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn has_schema(&self, reader: &mut dyn CatalogReader, name: &str) -> Result<bool> {
        let rows = reader
            .fetch(
                "SELECT 1 AS \"found\" FROM information_schema.schemata WHERE schema_name = $1",
                vec![name.into()],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn clear_database(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<String>> {
        self.drop_everything(reader, ctx).await
    }

    fn create_table(&self, table: &Table, ctx: &DialectContext<'_>) -> Result<Statements> {
        self.create(table, ctx)
    }

    fn rename_table(
        &self,
        before: &Table,
        after: &Table,
        renames: &[ConstraintRename],
        ctx: &DialectContext<'_>,
    ) -> Result<Statements> {
        self.rename(before, after, renames, ctx)
    }

    fn alter_table(&self, change: &AlterTable<'_>, ctx: &DialectContext<'_>) -> Result<Statements> {
        self.alter(change, ctx)
    }

    fn create_view(&self, view: &View, ctx: &DialectContext<'_>) -> Result<Statements> {
        let mut stmts = Statements::new();
        let name = self.escape_path(&view.path);
        let keyword = if view.materialized { "MATERIALIZED VIEW" } else { "VIEW" };
        stmts.pair(
            format!("CREATE {} {} AS {}", keyword, name, view.expression),
            format!("DROP {} {}", keyword, name),
        );
        stmts.push_up(self.create_metadata_table(ctx));
        stmts.push_up(insert_view_metadata(self, view, ctx));
        stmts.push_down(delete_view_metadata(self, view, ctx));
        Ok(stmts)
    }

    fn clear_table(&self, path: &TablePath) -> String {
        format!("TRUNCATE TABLE {}", self.escape_path(path))
    }

    fn create_database(&self, name: &str, if_not_exists: bool) -> Result<Statements> {
        let mut stmts = Statements::new();
        // PostgreSQL has no IF NOT EXISTS for databases.
        let guard = if if_not_exists && self.cockroach { "IF NOT EXISTS " } else { "" };
        stmts.pair(
            format!("CREATE DATABASE {}{}", guard, self.quote(name)),
            format!("DROP DATABASE {}", self.quote(name)),
        );
        Ok(stmts)
    }

    fn drop_database(&self, name: &str, if_exists: bool) -> Result<Statements> {
        let mut stmts = Statements::new();
        stmts.pair(
            format!("DROP DATABASE {}{}", if if_exists { "IF EXISTS " } else { "" }, self.quote(name)),
            format!("CREATE DATABASE {}", self.quote(name)),
        );
        Ok(stmts)
    }

    fn create_schema(&self, name: &str, if_not_exists: bool) -> Result<Statements> {
        let mut stmts = Statements::new();
        stmts.pair(
            format!(
                "CREATE SCHEMA {}{}",
                if if_not_exists { "IF NOT EXISTS " } else { "" },
                self.quote(name)
            ),
            format!("DROP SCHEMA {} CASCADE", self.quote(name)),
        );
        Ok(stmts)
    }

    fn drop_schema(&self, name: &str, if_exists: bool, cascade: bool) -> Result<Statements> {
        let mut stmts = Statements::new();
        stmts.pair(
            format!(
                "DROP SCHEMA {}{}{}",
                if if_exists { "IF EXISTS " } else { "" },
                self.quote(name),
                if cascade { " CASCADE" } else { "" }
            ),
            format!("CREATE SCHEMA {}", self.quote(name)),
        );
        Ok(stmts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cockroach_transaction_uses_restart_savepoint() {
        let d = PostgresDialect::cockroach();
        assert_eq!(
            d.begin_transaction(None).unwrap(),
            vec!["START TRANSACTION", "SAVEPOINT cockroach_restart"]
        );
        assert_eq!(d.commit_transaction(), vec!["RELEASE SAVEPOINT cockroach_restart", "COMMIT"]);
        assert_eq!(d.restart_savepoint(), Some("cockroach_restart"));
        assert!(d.begin_transaction(Some(IsolationLevel::RepeatableRead)).is_err());
    }

    #[test]
    fn test_postgres_isolation_level() {
        let d = PostgresDialect::postgres();
        assert_eq!(
            d.begin_transaction(Some(IsolationLevel::Serializable)).unwrap(),
            vec!["START TRANSACTION", "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"]
        );
        assert_eq!(d.restart_savepoint(), None);
    }

    #[test]
    fn test_serialization_failure_code() {
        let d = PostgresDialect::cockroach();
        assert!(d.is_serialization_failure(&DriverError::with_code("restart transaction", "40001")));
        assert!(!d.is_serialization_failure(&DriverError::with_code("duplicate key", "23505")));
    }

    #[test]
    fn test_type_aliases_normalize() {
        let pg = PostgresDialect::postgres();
        assert_eq!(pg.normalize_type("VARCHAR"), "character varying");
        assert_eq!(pg.normalize_type("int4"), "integer");
        assert_eq!(pg.normalize_type("timestamptz"), "timestamp with time zone");
        let crdb = PostgresDialect::cockroach();
        assert_eq!(crdb.normalize_type("int"), "bigint");
        assert_eq!(crdb.normalize_type("STRING"), "text");
    }

    #[test]
    fn test_placeholders_are_numbered() {
        assert_eq!(PostgresDialect::postgres().placeholder(3), "$3");
    }

    #[test]
    fn test_materialized_view_statements() {
        let naming = crate::naming::DefaultNamingStrategy;
        let ctx = DialectContext {
            naming: &naming,
            database: None,
            schema: Some("public"),
            metadata_table: "typeorm_metadata",
        };
        let view = View::new("stats", "SELECT 1").materialized();
        let stmts = PostgresDialect::postgres().create_view(&view, &ctx).unwrap();
        assert_eq!(stmts.up[0].sql, "CREATE MATERIALIZED VIEW \"stats\" AS SELECT 1");
        assert_eq!(stmts.down[0].sql, "DROP MATERIALIZED VIEW \"stats\"");
        assert!(stmts.up[1].sql.starts_with("CREATE TABLE IF NOT EXISTS \"typeorm_metadata\""));
        assert!(stmts.up[2].sql.starts_with("INSERT INTO \"typeorm_metadata\""));
        assert_eq!(stmts.up[2].params.len(), 5);
    }
}
