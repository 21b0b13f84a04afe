use crate::dialect::AlterOp;
use crate::error::{ObjectKind, Result, RunnerError};
use crate::runner::QueryRunner;
use crate::schema::{TableColumn, TableUnique};

use super::TableTarget;

impl QueryRunner {
    pub async fn add_column(&mut self, target: impl Into<TableTarget>, column: TableColumn) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        if before.has_column(&column.name) {
            return Err(RunnerError::invalid(format!(
                "table \"{}\" already has a column \"{}\"",
                before.path, column.name
            )));
        }
        column.validate().map_err(RunnerError::invalid)?;

        let mut after = (*before).clone();
        after.add_column(column.clone());
        if column.is_primary {
            after.primary_key_name = None;
        }
        after.normalize(self.naming.as_ref());

        let statements = self.synthesize(&before, &after, AlterOp::AddColumn(&column))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    /// Adds columns one by one, each as its own recorded change.
    pub async fn add_columns(&mut self, target: impl Into<TableTarget>, columns: Vec<TableColumn>) -> Result<()> {
        let mut target = target.into();
        for column in columns {
            self.add_column(target.clone(), column).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    /// Renames a column. Constraints named after the old column follow it.
    pub async fn rename_column(&mut self, target: impl Into<TableTarget>, old_name: &str, new_name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let old = before.require_column(old_name)?.clone();

        let mut after = (*before).clone();
        let renames = after.rename_column(old_name, new_name, self.naming.as_ref())?;
        let new = after.require_column(new_name)?.clone();

        let statements = self.synthesize(
            &before,
            &after,
            AlterOp::RenameColumn {
                old: &old,
                new: &new,
                renames: &renames,
            },
        )?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    /// Changes `old_name` into `column`.
    ///
    /// A rename is applied first as its own change. Changes the dialect can
    /// only perform by dropping the column fail with `LossyChange` unless
    /// `allow_lossy_column_changes` is set.
    pub async fn change_column(
        &mut self,
        target: impl Into<TableTarget>,
        old_name: &str,
        column: TableColumn,
    ) -> Result<()> {
        self.ensure_usable()?;
        let mut target = target.into();
        let current = self.resolve_table(target.clone()).await?;
        let old = current.require_column(old_name)?.clone();
        column.validate().map_err(RunnerError::invalid)?;

        if let Some(reason) = self.dialect.lossy_change(&old, &column) {
            if !self.options.allow_lossy_column_changes {
                return Err(RunnerError::LossyChange {
                    table: current.path.to_string(),
                    column: old.name.clone(),
                    reason,
                });
            }
            tracing::warn!(table = %current.path, column = %old.name, %reason, "recreating column, its data is lost");
        }

        if old.name != column.name {
            self.rename_column(TableTarget::Table(current.clone()), &old.name, &column.name)
                .await?;
            target = self.refresh_target(TableTarget::Path(current.path.clone())).await?;
        }

        let before = self.resolve_table(target).await?;
        let old = before.require_column(&column.name)?.clone();
        let mut after = (*before).clone();
        after.replace_column(&old.name, column.clone());

        if old.is_unique != column.is_unique {
            if column.is_unique {
                let columns = vec![column.name.clone()];
                let name = self.naming.unique_constraint_name(&after.path.name, &columns);
                after.add_unique(TableUnique::new(columns).named(name));
            } else if let Some(name) = after.single_column_unique(&column.name).and_then(|u| u.name.clone()) {
                after.remove_unique(&name);
            }
        }
        if old.is_primary != column.is_primary {
            after.primary_key_name = None;
        }
        after.normalize(self.naming.as_ref());

        let statements = self.synthesize(&before, &after, AlterOp::ChangeColumn { old: &old, new: &column })?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    /// Applies `(old_name, column)` changes in order.
    pub async fn change_columns(
        &mut self,
        target: impl Into<TableTarget>,
        changes: Vec<(String, TableColumn)>,
    ) -> Result<()> {
        let mut target = target.into();
        for (old_name, column) in changes {
            self.change_column(target.clone(), &old_name, column).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    /// Drops a column with every index and constraint covering it.
    pub async fn drop_column(&mut self, target: impl Into<TableTarget>, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let column = before
            .find_column(name)
            .cloned()
            .ok_or_else(|| RunnerError::not_found(ObjectKind::Column, format!("{}.{}", before.path, name)))?;

        let mut after = (*before).clone();
        after.remove_column(name);
        if column.is_primary {
            after.primary_key_name = None;
        }
        after.normalize(self.naming.as_ref());

        let statements = self.synthesize(&before, &after, AlterOp::DropColumn(&column))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn drop_columns(&mut self, target: impl Into<TableTarget>, names: &[&str]) -> Result<()> {
        let mut target = target.into();
        for name in names {
            self.drop_column(target.clone(), name).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    /// After a change, a target given by value is stale; continue from the
    /// published snapshot instead.
    pub(crate) async fn refresh_target(&mut self, target: TableTarget) -> Result<TableTarget> {
        Ok(match target {
            TableTarget::Table(table) => TableTarget::Table(self.cached_table(&table.path).await?),
            path => path,
        })
    }
}
