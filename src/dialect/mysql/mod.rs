//! MySQL / MariaDB dialect.

use async_trait::async_trait;

use crate::error::{DriverError, Result};
use crate::schema::{ConstraintRename, Table, TableColumn, TablePath};
use crate::statement::Statements;

use super::capabilities::{Capabilities, MYSQL};
use super::{unsupported, AlterTable, CatalogReader, DialectContext, DialectStrategy, IsolationLevel};

mod ddl;
mod introspect;

/// `ER_LOCK_DEADLOCK`.
const DEADLOCK: &str = "1213";

#[derive(Debug, Clone)]
pub struct MySqlDialect {
    caps: &'static Capabilities,
}

impl MySqlDialect {
    pub fn new() -> Self {
        Self { caps: &MYSQL }
    }
}

impl Default for MySqlDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DialectStrategy for MySqlDialect {
    fn capabilities(&self) -> &Capabilities {
        self.caps
    }

    fn normalize_type(&self, column_type: &str) -> String {
        let lower = column_type.trim().to_ascii_lowercase();
        let canonical = match lower.as_str() {
            "integer" => "int",
            "bool" | "boolean" => "tinyint",
            "dec" | "numeric" | "fixed" => "decimal",
            "double precision" | "real" => "double",
            "character varying" => "varchar",
            "character" => "char",
            other => other,
        };
        canonical.to_string()
    }

    fn lossy_change(&self, old: &TableColumn, new: &TableColumn) -> Option<String> {
        if old.as_expression != new.as_expression || old.generated_type != new.generated_type {
            return Some("generated columns are recreated".to_string());
        }
        None
    }

    fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        if let Some(level) = isolation {
            if !self.caps.supports_isolation(level) {
                return Err(unsupported(self, &format!("isolation level {}", level)));
            }
            // Applies to the next transaction only, so it goes first.
            statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level));
        }
        statements.push("START TRANSACTION".to_string());
        Ok(statements)
    }

    fn is_serialization_failure(&self, err: &DriverError) -> bool {
        err.has_code(DEADLOCK)
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
        let rows = reader.fetch("SELECT DATABASE() AS `name`", Vec::new()).await?;
        Ok(rows.first().and_then(|r| r.get_string("name")))
    }

    /// MySQL schemas are databases.
    async fn current_schema(&self, reader: &mut dyn CatalogReader) -> Result<Option<String>> {
        self.current_database(reader).await
    }

    async fn has_database(&self, reader: &mut dyn CatalogReader, name: &str) -> Result<bool> {
        let rows = reader
            .fetch(
                "SELECT `SCHEMA_NAME` AS `name` FROM `information_schema`.`SCHEMATA` WHERE `SCHEMA_NAME` = ?",
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

    fn clear_table(&self, path: &TablePath) -> String {
        format!("TRUNCATE TABLE {}", self.escape_path(path))
    }

    fn create_database(&self, name: &str, if_not_exists: bool) -> Result<Statements> {
        let mut stmts = Statements::new();
        stmts.pair(
            format!(
                "CREATE DATABASE {}{}",
                if if_not_exists { "IF NOT EXISTS " } else { "" },
                self.quote(name)
            ),
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_is_set_before_start() {
        let d = MySqlDialect::new();
        assert_eq!(
            d.begin_transaction(Some(IsolationLevel::ReadCommitted)).unwrap(),
            vec!["SET TRANSACTION ISOLATION LEVEL READ COMMITTED", "START TRANSACTION"]
        );
    }

    #[test]
    fn test_backtick_quoting() {
        let d = MySqlDialect::new();
        assert_eq!(d.quote("order"), "`order`");
        assert_eq!(d.placeholder(2), "?");
        let path = TablePath {
            database: Some("shop".into()),
            schema: None,
            name: "items".into(),
        };
        assert_eq!(d.escape_path(&path), "`shop`.`items`");
    }

    #[test]
    fn test_schemas_are_unsupported() {
        let d = MySqlDialect::new();
        assert!(matches!(
            d.create_schema("s", true),
            Err(crate::RunnerError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_type_aliases_normalize() {
        let d = MySqlDialect::new();
        assert_eq!(d.normalize_type("INTEGER"), "int");
        assert_eq!(d.normalize_type("boolean"), "tinyint");
    }
}
