use crate::error::Result;
use crate::runner::QueryRunner;
use crate::schema::TablePath;

impl QueryRunner {
    /// Deletes every row of a table. Runs immediately and is not recorded,
    /// so it has no down statement.
    pub async fn clear_table(&mut self, path: &TablePath) -> Result<()> {
        self.ensure_usable()?;
        let sql = self.dialect.clear_table(path);
        self.execute(&sql).await?;
        Ok(())
    }

    /// Drops every table and view of the current database or schema.
    ///
    /// Runs immediately, statement by statement, outside of the in-memory
    /// log. No transaction is opened here: SQLite ignores
    /// `PRAGMA foreign_keys` inside one.
    pub async fn clear_database(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let dialect = self.dialect.clone();
        let session = self.session();
        let statements = dialect.clear_database(self, &session.context()).await?;
        self.logger
            .log_schema_build(&format!("clearing database, {} statements", statements.len()));
        for sql in &statements {
            self.execute(sql).await?;
        }
        self.clear_cache();
        Ok(())
    }

    pub async fn current_database(&mut self) -> Result<Option<String>> {
        self.ensure_usable()?;
        let dialect = self.dialect.clone();
        dialect.current_database(self).await
    }

    pub async fn current_schema(&mut self) -> Result<Option<String>> {
        self.ensure_usable()?;
        let dialect = self.dialect.clone();
        dialect.current_schema(self).await
    }

    pub async fn has_database(&mut self, name: &str) -> Result<bool> {
        self.ensure_usable()?;
        let dialect = self.dialect.clone();
        dialect.has_database(self, name).await
    }

    pub async fn has_schema(&mut self, name: &str) -> Result<bool> {
        self.ensure_usable()?;
        let dialect = self.dialect.clone();
        dialect.has_schema(self, name).await
    }

    pub async fn create_database(&mut self, name: &str, if_not_exists: bool) -> Result<()> {
        self.ensure_usable()?;
        let statements = self.dialect.create_database(name, if_not_exists)?;
        self.execute_queries(statements.up, statements.down).await
    }

    pub async fn drop_database(&mut self, name: &str, if_exists: bool) -> Result<()> {
        self.ensure_usable()?;
        let statements = self.dialect.drop_database(name, if_exists)?;
        self.execute_queries(statements.up, statements.down).await
    }

    pub async fn create_schema(&mut self, name: &str, if_not_exists: bool) -> Result<()> {
        self.ensure_usable()?;
        let statements = self.dialect.create_schema(name, if_not_exists)?;
        self.execute_queries(statements.up, statements.down).await
    }

    pub async fn drop_schema(&mut self, name: &str, if_exists: bool, cascade: bool) -> Result<()> {
        self.ensure_usable()?;
        let statements = self.dialect.drop_schema(name, if_exists, cascade)?;
        self.execute_queries(statements.up, statements.down).await?;
        // Tables of the dropped schema may be cached under any key.
        self.clear_cache();
        Ok(())
    }
}
