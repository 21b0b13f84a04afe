//! Schema operations on top of the query runner.
//!
//! Every operation follows the same protocol: resolve the current table
//! (from the caller, the runner's cache, or the catalogs), clone it and apply
//! the change to the clone, let the dialect synthesize the up/down pairs,
//! run or record them, and only then publish the clone into the cache.

use std::sync::Arc;

use crate::dialect::{AlterOp, AlterTable};
use crate::error::{ObjectKind, Result, RunnerError};
use crate::runner::QueryRunner;
use crate::schema::{Table, TablePath, View};
use crate::statement::Statements;

mod columns;
mod constraints;
mod database;

/// A table given either by name or by value.
///
/// Names are looked up in the runner's cache and introspected on a miss;
/// values are used as they are.
#[derive(Debug, Clone)]
pub enum TableTarget {
    Path(TablePath),
    Table(Arc<Table>),
}

impl From<&str> for TableTarget {
    fn from(name: &str) -> Self {
        TableTarget::Path(TablePath::parse(name))
    }
}

impl From<String> for TableTarget {
    fn from(name: String) -> Self {
        TableTarget::Path(TablePath::parse(&name))
    }
}

impl From<TablePath> for TableTarget {
    fn from(path: TablePath) -> Self {
        TableTarget::Path(path)
    }
}

impl From<&TablePath> for TableTarget {
    fn from(path: &TablePath) -> Self {
        TableTarget::Path(path.clone())
    }
}

impl From<Table> for TableTarget {
    fn from(table: Table) -> Self {
        TableTarget::Table(Arc::new(table))
    }
}

impl From<&Table> for TableTarget {
    fn from(table: &Table) -> Self {
        TableTarget::Table(Arc::new(table.clone()))
    }
}

impl From<Arc<Table>> for TableTarget {
    fn from(table: Arc<Table>) -> Self {
        TableTarget::Table(table)
    }
}

impl QueryRunner {
    // ====== Cache ======

    /// Resolves a target to the current snapshot of the table.
    pub(crate) async fn resolve_table(&mut self, target: TableTarget) -> Result<Arc<Table>> {
        match target {
            TableTarget::Table(table) => {
                let mut table = (*table).clone();
                table.normalize(self.naming.as_ref());
                Ok(Arc::new(table))
            }
            TableTarget::Path(path) => self.cached_table(&path).await,
        }
    }

    /// Cached snapshot of `path`, introspecting on a miss.
    pub(crate) async fn cached_table(&mut self, path: &TablePath) -> Result<Arc<Table>> {
        self.get_table(path)
            .await?
            .ok_or_else(|| RunnerError::not_found(ObjectKind::Table, path.to_string()))
    }

    /// Replaces the cache entry of `previous` with `table`.
    pub(crate) fn publish_table(&mut self, previous: &TablePath, table: Table) -> Arc<Table> {
        let old_key = self.object_key(previous);
        let new_key = self.object_key(&table.path);
        if old_key != new_key {
            self.tables.shift_remove(&old_key);
        }
        let table = Arc::new(table);
        self.tables.insert(new_key, table.clone());
        table
    }

    /// Forgets every cached table and view; the next lookup introspects.
    pub fn clear_cache(&mut self) {
        self.tables.clear();
        self.views.clear();
    }

    /// Introspects `paths`, caching what was found under the requested names.
    async fn load_tables(&mut self, paths: &[TablePath]) -> Result<Vec<Arc<Table>>> {
        let dialect = self.dialect.clone();
        let session = self.session();
        let loaded = dialect.load_tables(self, paths, &session.context()).await?;
        self.introspections += 1;

        let mut found = Vec::with_capacity(loaded.len());
        for table in loaded {
            let requested = paths
                .iter()
                .find(|p| p.name == table.path.name)
                .cloned()
                .unwrap_or_else(|| table.path.clone());
            let key = self.object_key(&requested);
            let table = Arc::new(table);
            self.tables.insert(key, table.clone());
            found.push(table);
        }
        Ok(found)
    }

    // ====== Lookups ======

    /// The table at `path`, or `None` when it does not exist.
    pub async fn get_table(&mut self, path: &TablePath) -> Result<Option<Arc<Table>>> {
        self.ensure_usable()?;
        if let Some(table) = self.tables.get(&self.object_key(path)) {
            return Ok(Some(table.clone()));
        }
        Ok(self.load_tables(std::slice::from_ref(path)).await?.into_iter().next())
    }

    /// Tables at `paths`, missing ones left out. An empty slice means every
    /// table of the current database or schema.
    pub async fn get_tables(&mut self, paths: &[TablePath]) -> Result<Vec<Arc<Table>>> {
        self.ensure_usable()?;
        let paths = if paths.is_empty() {
            let dialect = self.dialect.clone();
            let session = self.session();
            dialect.list_tables(self, &session.context()).await?
        } else {
            paths.to_vec()
        };

        let missing: Vec<TablePath> = paths
            .iter()
            .filter(|p| !self.tables.contains_key(&self.object_key(p)))
            .cloned()
            .collect();
        if !missing.is_empty() {
            self.load_tables(&missing).await?;
        }
        Ok(paths
            .iter()
            .filter_map(|p| self.tables.get(&self.object_key(p)).cloned())
            .collect())
    }

    pub async fn has_table(&mut self, path: &TablePath) -> Result<bool> {
        Ok(self.get_table(path).await?.is_some())
    }

    /// Whether the table has the column. Fails when the table does not exist.
    pub async fn has_column(&mut self, table: impl Into<TableTarget>, column: &str) -> Result<bool> {
        self.ensure_usable()?;
        let table = self.resolve_table(table.into()).await?;
        Ok(table.has_column(column))
    }

    pub async fn get_view(&mut self, path: &TablePath) -> Result<Option<Arc<View>>> {
        Ok(self.get_views(std::slice::from_ref(path)).await?.into_iter().next())
    }

    /// Views recorded in the metadata table; an empty slice means all of them.
    pub async fn get_views(&mut self, paths: &[TablePath]) -> Result<Vec<Arc<View>>> {
        self.ensure_usable()?;
        let cached: Vec<Arc<View>> = paths
            .iter()
            .filter_map(|p| self.views.get(&self.object_key(p)).cloned())
            .collect();
        if !paths.is_empty() && cached.len() == paths.len() {
            return Ok(cached);
        }

        let dialect = self.dialect.clone();
        let session = self.session();
        let loaded = dialect.load_views(self, paths, &session.context()).await?;
        self.introspections += 1;
        let mut views = Vec::with_capacity(loaded.len());
        for view in loaded {
            let requested = paths
                .iter()
                .find(|p| p.name == view.path.name)
                .cloned()
                .unwrap_or_else(|| view.path.clone());
            let key = self.object_key(&requested);
            let view = Arc::new(view);
            self.views.insert(key, view.clone());
            views.push(view);
        }
        Ok(views)
    }

    // ====== Synthesis ======

    /// Statements turning `before` into `after` through `op`.
    ///
    /// Support is checked first so an unsupported change never issues SQL.
    pub(crate) fn synthesize(&self, before: &Table, after: &Table, op: AlterOp<'_>) -> Result<Statements> {
        self.dialect.check_support(after)?;
        let session = self.session();
        self.dialect
            .alter_table(&AlterTable { before, after, op }, &session.context())
    }

    /// Runs (or records) `statements` and publishes `after` in place of `before`.
    pub(crate) async fn apply(&mut self, before: &Table, after: Table, statements: Statements) -> Result<Arc<Table>> {
        self.execute_queries(statements.up, statements.down).await?;
        Ok(self.publish_table(&before.path, after))
    }

    // ====== Tables ======

    /// Creates `table`. With `if_not_exists`, an existing table is left alone.
    pub async fn create_table(&mut self, table: Table, if_not_exists: bool) -> Result<()> {
        self.ensure_usable()?;
        if if_not_exists && self.has_table(&table.path).await? {
            return Ok(());
        }
        let mut table = table;
        table.normalize(self.naming.as_ref());
        table.validate()?;
        self.dialect.check_support(&table)?;

        let statements = {
            let session = self.session();
            self.dialect.create_table(&table, &session.context())?
        };
        self.logger
            .log_schema_build(&format!("creating table \"{}\"", table.path));
        self.execute_queries(statements.up, statements.down).await?;
        table.just_created = true;
        let path = table.path.clone();
        self.publish_table(&path, table);
        Ok(())
    }

    /// Drops a table. With `if_exists`, a missing table is not an error.
    pub async fn drop_table(&mut self, target: impl Into<TableTarget>, if_exists: bool) -> Result<()> {
        self.ensure_usable()?;
        let target = target.into();
        if let TableTarget::Path(path) = &target {
            if if_exists && !self.has_table(path).await? {
                return Ok(());
            }
        }
        let table = self.resolve_table(target).await?;
        let statements = {
            let session = self.session();
            self.dialect.drop_table(&table, &session.context())?
        };
        self.logger
            .log_schema_build(&format!("dropping table \"{}\"", table.path));
        self.execute_queries(statements.up, statements.down).await?;
        let key = self.object_key(&table.path);
        self.tables.shift_remove(&key);
        Ok(())
    }

    /// Renames a table; default-named constraints follow the new name.
    pub async fn rename_table(&mut self, target: impl Into<TableTarget>, new_name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let mut after = (*before).clone();
        let renames = after.rename(before.path.renamed(new_name), self.naming.as_ref());
        let statements = {
            let session = self.session();
            self.dialect
                .rename_table(&before, &after, &renames, &session.context())?
        };
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    // ====== Views ======

    pub async fn create_view(&mut self, view: View) -> Result<()> {
        self.ensure_usable()?;
        let statements = {
            let session = self.session();
            self.dialect.create_view(&view, &session.context())?
        };
        self.execute_queries(statements.up, statements.down).await?;
        let key = self.object_key(&view.path);
        self.views.insert(key, Arc::new(view));
        Ok(())
    }

    pub async fn drop_view(&mut self, path: &TablePath) -> Result<()> {
        self.ensure_usable()?;
        let view = self
            .get_view(path)
            .await?
            .ok_or_else(|| RunnerError::not_found(ObjectKind::View, path.to_string()))?;
        let statements = {
            let session = self.session();
            self.dialect.drop_view(&view, &session.context())?
        };
        self.execute_queries(statements.up, statements.down).await?;
        let key = self.object_key(path);
        self.views.shift_remove(&key);
        Ok(())
    }
}

/// Fails with `InvalidSchema` when `table` already uses `name`.
pub(crate) fn require_unused_name(table: &Table, name: Option<&str>) -> Result<()> {
    match name {
        Some(name) if table.has_constraint_named(name) => Err(RunnerError::invalid(format!(
            "table \"{}\" already has a constraint or index named \"{}\"",
            table.path, name
        ))),
        _ => Ok(()),
    }
}

/// Fails with `NotFound` unless every column exists in `table`.
pub(crate) fn require_columns(table: &Table, columns: &[String]) -> Result<()> {
    for column in columns {
        table.require_column(column)?;
    }
    Ok(())
}
