//! SQLite dialect.

use async_trait::async_trait;

use crate::error::{DriverError, Result};
use crate::schema::{ConstraintRename, Table, TablePath};
use crate::statement::Statements;

use super::capabilities::{Capabilities, SQLITE};
use super::{unsupported, AlterTable, CatalogReader, DialectContext, DialectStrategy, IsolationLevel};

mod ddl;
mod introspect;

/// Primary result codes reported for lock contention.
const BUSY_CODES: &[&str] = &["5", "261", "517", "773"];

#[derive(Debug, Clone)]
pub struct SqliteDialect {
    caps: &'static Capabilities,
}

impl SqliteDialect {
    pub fn new() -> Self {
        Self { caps: &SQLITE }
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DialectStrategy for SqliteDialect {
    fn capabilities(&self) -> &Capabilities {
        self.caps
    }

    fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        match isolation {
            None => {}
            Some(IsolationLevel::ReadUncommitted) => statements.push("PRAGMA read_uncommitted = true".to_string()),
            Some(IsolationLevel::Serializable) => statements.push("PRAGMA read_uncommitted = false".to_string()),
            Some(level) => {
                return Err(unsupported(self, &format!("isolation level {}", level)));
            }
        }
        statements.push("BEGIN TRANSACTION".to_string());
        Ok(statements)
    }

    fn is_busy_error(&self, err: &DriverError) -> bool {
        err.code.as_deref().map(|c| BUSY_CODES.contains(&c)).unwrap_or(false)
            || err.message.contains("database is locked")
            || err.message.contains("SQLITE_BUSY")
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

    async fn current_database(&self, _reader: &mut dyn CatalogReader) -> Result<Option<String>> {
        Ok(Some("main".to_string()))
    }

    async fn current_schema(&self, _reader: &mut dyn CatalogReader) -> Result<Option<String>> {
        Ok(None)
    }

    async fn clear_database(
        &self,
        reader: &mut dyn CatalogReader,
        _ctx: &DialectContext<'_>,
    ) -> Result<Vec<String>> {
        let rows = reader
            .fetch(
                "SELECT \"type\", \"name\" FROM \"sqlite_master\" WHERE \"type\" IN ('table', 'view') AND \"name\" NOT LIKE 'sqlite_%'",
                Vec::new(),
            )
            .await?;
        let mut statements = vec!["PRAGMA foreign_keys = OFF".to_string()];
        for row in rows {
            let kind = row.get_string("type").unwrap_or_default();
            let name = match row.get_string("name") {
                Some(name) => name,
                None => continue,
            };
            let keyword = if kind == "view" { "VIEW" } else { "TABLE" };
            statements.push(format!("DROP {} IF EXISTS {}", keyword, self.quote(&name)));
        }
        statements.push("PRAGMA foreign_keys = ON".to_string());
        Ok(statements)
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_levels() {
        let d = SqliteDialect::new();
        assert_eq!(
            d.begin_transaction(Some(IsolationLevel::ReadUncommitted)).unwrap(),
            vec!["PRAGMA read_uncommitted = true", "BEGIN TRANSACTION"]
        );
        assert_eq!(d.begin_transaction(None).unwrap(), vec!["BEGIN TRANSACTION"]);
        assert!(d.begin_transaction(Some(IsolationLevel::RepeatableRead)).is_err());
    }

    #[test]
    fn test_busy_detection() {
        let d = SqliteDialect::new();
        assert!(d.is_busy_error(&DriverError::with_code("database is locked", "5")));
        assert!(d.is_busy_error(&DriverError::new("(code: 5) database is locked")));
        assert!(!d.is_busy_error(&DriverError::with_code("UNIQUE constraint failed", "2067")));
    }
}
