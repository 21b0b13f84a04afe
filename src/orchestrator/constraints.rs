use crate::dialect::AlterOp;
use crate::error::{ObjectKind, Result, RunnerError};
use crate::runner::QueryRunner;
use crate::schema::{TableCheck, TableColumn, TableExclusion, TableForeignKey, TableIndex, TableUnique};

use super::{require_columns, require_unused_name, TableTarget};

impl QueryRunner {
    // ====== Primary keys ======

    /// Makes `columns` the primary key, replacing the current one.
    pub async fn create_primary_key(
        &mut self,
        target: impl Into<TableTarget>,
        columns: &[String],
        name: Option<&str>,
    ) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        require_columns(&before, columns)?;

        let mut after = (*before).clone();
        after.set_primary_columns(columns);
        after.primary_key_name = name.map(str::to_string);
        after.normalize(self.naming.as_ref());

        let statements = self.synthesize(&before, &after, AlterOp::UpdatePrimaryKey)?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    /// Replaces the primary key with the columns among `columns` marked primary.
    pub async fn update_primary_keys(&mut self, target: impl Into<TableTarget>, columns: &[TableColumn]) -> Result<()> {
        let primary: Vec<String> = columns
            .iter()
            .filter(|c| c.is_primary)
            .map(|c| c.name.clone())
            .collect();
        self.create_primary_key(target, &primary, None).await
    }

    pub async fn drop_primary_key(&mut self, target: impl Into<TableTarget>) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        if before.primary_columns().is_empty() {
            return Err(RunnerError::not_found(ObjectKind::PrimaryKey, before.path.to_string()));
        }

        let mut after = (*before).clone();
        after.set_primary_columns(&[]);
        after.primary_key_name = None;

        let statements = self.synthesize(&before, &after, AlterOp::UpdatePrimaryKey)?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    // ====== Unique constraints ======

    pub async fn create_unique_constraint(&mut self, target: impl Into<TableTarget>, unique: TableUnique) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        require_columns(&before, &unique.column_names)?;

        let mut unique = unique;
        if unique.name.is_none() {
            unique.name = Some(self.naming.unique_constraint_name(before.name(), &unique.column_names));
        }
        require_unused_name(&before, unique.name.as_deref())?;
        let mut after = (*before).clone();
        after.add_unique(unique.clone());

        let statements = self.synthesize(&before, &after, AlterOp::CreateUnique(&unique))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn create_unique_constraints(
        &mut self,
        target: impl Into<TableTarget>,
        uniques: Vec<TableUnique>,
    ) -> Result<()> {
        let mut target = target.into();
        for unique in uniques {
            self.create_unique_constraint(target.clone(), unique).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    pub async fn drop_unique_constraint(&mut self, target: impl Into<TableTarget>, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let unique = before
            .find_unique(name)
            .cloned()
            .ok_or_else(|| RunnerError::not_found(ObjectKind::Unique, name))?;

        let mut after = (*before).clone();
        after.remove_unique(name);

        let statements = self.synthesize(&before, &after, AlterOp::DropUnique(&unique))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn drop_unique_constraints(&mut self, target: impl Into<TableTarget>, names: &[&str]) -> Result<()> {
        let mut target = target.into();
        for name in names {
            self.drop_unique_constraint(target.clone(), name).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    // ====== Check constraints ======

    pub async fn create_check_constraint(&mut self, target: impl Into<TableTarget>, check: TableCheck) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;

        let mut check = check;
        if check.name.is_none() {
            check.name = Some(self.naming.check_constraint_name(before.name(), &check.expression, false));
        }
        require_unused_name(&before, check.name.as_deref())?;
        let mut after = (*before).clone();
        after.add_check(check.clone());

        let statements = self.synthesize(&before, &after, AlterOp::CreateCheck(&check))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn create_check_constraints(&mut self, target: impl Into<TableTarget>, checks: Vec<TableCheck>) -> Result<()> {
        let mut target = target.into();
        for check in checks {
            self.create_check_constraint(target.clone(), check).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    pub async fn drop_check_constraint(&mut self, target: impl Into<TableTarget>, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let check = before
            .find_check(name)
            .cloned()
            .ok_or_else(|| RunnerError::not_found(ObjectKind::Check, name))?;

        let mut after = (*before).clone();
        after.remove_check(name);

        let statements = self.synthesize(&before, &after, AlterOp::DropCheck(&check))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn drop_check_constraints(&mut self, target: impl Into<TableTarget>, names: &[&str]) -> Result<()> {
        let mut target = target.into();
        for name in names {
            self.drop_check_constraint(target.clone(), name).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    // ====== Exclusion constraints ======

    pub async fn create_exclusion_constraint(
        &mut self,
        target: impl Into<TableTarget>,
        exclusion: TableExclusion,
    ) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;

        let mut exclusion = exclusion;
        if exclusion.name.is_none() {
            exclusion.name = Some(self.naming.exclusion_constraint_name(before.name(), &exclusion.expression));
        }
        require_unused_name(&before, exclusion.name.as_deref())?;
        let mut after = (*before).clone();
        after.add_exclusion(exclusion.clone());

        let statements = self.synthesize(&before, &after, AlterOp::CreateExclusion(&exclusion))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn create_exclusion_constraints(
        &mut self,
        target: impl Into<TableTarget>,
        exclusions: Vec<TableExclusion>,
    ) -> Result<()> {
        let mut target = target.into();
        for exclusion in exclusions {
            self.create_exclusion_constraint(target.clone(), exclusion).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    pub async fn drop_exclusion_constraint(&mut self, target: impl Into<TableTarget>, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let exclusion = before
            .find_exclusion(name)
            .cloned()
            .ok_or_else(|| RunnerError::not_found(ObjectKind::Exclusion, name))?;

        let mut after = (*before).clone();
        after.remove_exclusion(name);

        let statements = self.synthesize(&before, &after, AlterOp::DropExclusion(&exclusion))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn drop_exclusion_constraints(&mut self, target: impl Into<TableTarget>, names: &[&str]) -> Result<()> {
        let mut target = target.into();
        for name in names {
            self.drop_exclusion_constraint(target.clone(), name).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    // ====== Foreign keys ======

    pub async fn create_foreign_key(
        &mut self,
        target: impl Into<TableTarget>,
        foreign_key: TableForeignKey,
    ) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        require_columns(&before, &foreign_key.column_names)?;
        if foreign_key.column_names.len() != foreign_key.referenced_column_names.len() {
            return Err(RunnerError::invalid(format!(
                "foreign key on \"{}\" maps {} columns to {}",
                before.path,
                foreign_key.column_names.len(),
                foreign_key.referenced_column_names.len()
            )));
        }

        let mut foreign_key = foreign_key;
        if foreign_key.name.is_none() {
            foreign_key.name = Some(self.naming.foreign_key_name(before.name(), &foreign_key.column_names));
        }
        require_unused_name(&before, foreign_key.name.as_deref())?;
        let mut after = (*before).clone();
        after.add_foreign_key(foreign_key.clone());

        let statements = self.synthesize(&before, &after, AlterOp::CreateForeignKey(&foreign_key))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn create_foreign_keys(
        &mut self,
        target: impl Into<TableTarget>,
        foreign_keys: Vec<TableForeignKey>,
    ) -> Result<()> {
        let mut target = target.into();
        for foreign_key in foreign_keys {
            self.create_foreign_key(target.clone(), foreign_key).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    pub async fn drop_foreign_key(&mut self, target: impl Into<TableTarget>, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let foreign_key = before
            .find_foreign_key(name)
            .cloned()
            .ok_or_else(|| RunnerError::not_found(ObjectKind::ForeignKey, name))?;

        let mut after = (*before).clone();
        after.remove_foreign_key(name);

        let statements = self.synthesize(&before, &after, AlterOp::DropForeignKey(&foreign_key))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn drop_foreign_keys(&mut self, target: impl Into<TableTarget>, names: &[&str]) -> Result<()> {
        let mut target = target.into();
        for name in names {
            self.drop_foreign_key(target.clone(), name).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    // ====== Indices ======

    pub async fn create_index(&mut self, target: impl Into<TableTarget>, index: TableIndex) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        require_columns(&before, &index.column_names)?;

        let mut index = index;
        if index.name.is_none() {
            index.name = Some(self.naming.index_name(
                before.name(),
                &index.column_names,
                index.where_clause.as_deref(),
            ));
        }
        require_unused_name(&before, index.name.as_deref())?;
        let mut after = (*before).clone();
        after.add_index(index.clone());

        let statements = self.synthesize(&before, &after, AlterOp::CreateIndex(&index))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn create_indices(&mut self, target: impl Into<TableTarget>, indices: Vec<TableIndex>) -> Result<()> {
        let mut target = target.into();
        for index in indices {
            self.create_index(target.clone(), index).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }

    pub async fn drop_index(&mut self, target: impl Into<TableTarget>, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let before = self.resolve_table(target.into()).await?;
        let index = before
            .find_index(name)
            .cloned()
            .ok_or_else(|| RunnerError::not_found(ObjectKind::Index, name))?;

        let mut after = (*before).clone();
        after.remove_index(name);

        let statements = self.synthesize(&before, &after, AlterOp::DropIndex(&index))?;
        self.apply(&before, after, statements).await?;
        Ok(())
    }

    pub async fn drop_indices(&mut self, target: impl Into<TableTarget>, names: &[&str]) -> Result<()> {
        let mut target = target.into();
        for name in names {
            self.drop_index(target.clone(), name).await?;
            target = self.refresh_target(target).await?;
        }
        Ok(())
    }
}
