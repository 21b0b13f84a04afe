//! Desired-versus-live schema comparison.
//!
//! [`diff_tables`] compares the tables an application wants with the tables
//! the engine has and returns the changes in an order the engine accepts:
//! foreign keys and indices go before the columns they cover, tables are
//! created before anything references them, and foreign keys come last.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::dialect::DialectStrategy;
use crate::error::Result;
use crate::naming::{bare_table_name, NamingStrategy};
use crate::runner::QueryRunner;
use crate::schema::{Table, TableCheck, TableColumn, TableForeignKey, TableIndex, TablePath, TableUnique};
use crate::statement::Query;

/// One step towards the desired schema.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    CreateTable(Table),
    DropTable(TablePath),
    AddColumn {
        table: TablePath,
        column: TableColumn,
    },
    DropColumn {
        table: TablePath,
        column: String,
    },
    ChangeColumn {
        table: TablePath,
        old: String,
        new: TableColumn,
    },
    UpdatePrimaryKey {
        table: TablePath,
        columns: Vec<String>,
    },
    CreateIndex {
        table: TablePath,
        index: TableIndex,
    },
    DropIndex {
        table: TablePath,
        name: String,
    },
    CreateUnique {
        table: TablePath,
        unique: TableUnique,
    },
    DropUnique {
        table: TablePath,
        name: String,
    },
    CreateCheck {
        table: TablePath,
        check: TableCheck,
    },
    DropCheck {
        table: TablePath,
        name: String,
    },
    CreateForeignKey {
        table: TablePath,
        foreign_key: TableForeignKey,
    },
    DropForeignKey {
        table: TablePath,
        name: String,
    },
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaChange::CreateTable(table) => write!(f, "create table \"{}\"", table.path),
            SchemaChange::DropTable(path) => write!(f, "drop table \"{}\"", path),
            SchemaChange::AddColumn { table, column } => {
                write!(f, "add column \"{}\" to \"{}\"", column.name, table)
            }
            SchemaChange::DropColumn { table, column } => {
                write!(f, "drop column \"{}\" from \"{}\"", column, table)
            }
            SchemaChange::ChangeColumn { table, old, .. } => {
                write!(f, "change column \"{}\" of \"{}\"", old, table)
            }
            SchemaChange::UpdatePrimaryKey { table, columns } => {
                write!(f, "set primary key of \"{}\" to ({})", table, columns.join(", "))
            }
            SchemaChange::CreateIndex { table, index } => write!(
                f,
                "create index \"{}\" on \"{}\"",
                index.name.as_deref().unwrap_or_default(),
                table
            ),
            SchemaChange::DropIndex { table, name } => write!(f, "drop index \"{}\" on \"{}\"", name, table),
            SchemaChange::CreateUnique { table, unique } => write!(
                f,
                "create unique constraint \"{}\" on \"{}\"",
                unique.name.as_deref().unwrap_or_default(),
                table
            ),
            SchemaChange::DropUnique { table, name } => {
                write!(f, "drop unique constraint \"{}\" on \"{}\"", name, table)
            }
            SchemaChange::CreateCheck { table, check } => write!(
                f,
                "create check constraint \"{}\" on \"{}\"",
                check.name.as_deref().unwrap_or_default(),
                table
            ),
            SchemaChange::DropCheck { table, name } => {
                write!(f, "drop check constraint \"{}\" on \"{}\"", name, table)
            }
            SchemaChange::CreateForeignKey { table, foreign_key } => write!(
                f,
                "create foreign key \"{}\" on \"{}\"",
                foreign_key.name.as_deref().unwrap_or_default(),
                table
            ),
            SchemaChange::DropForeignKey { table, name } => {
                write!(f, "drop foreign key \"{}\" on \"{}\"", name, table)
            }
        }
    }
}

/// Up and down statements of a generated migration. `down` is already in
/// execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MigrationScript {
    pub up: Vec<Query>,
    pub down: Vec<Query>,
}

impl MigrationScript {
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }
}

/// Buckets filled per table and emitted phase by phase.
#[derive(Default)]
struct Plan {
    drop_foreign_keys: Vec<SchemaChange>,
    drop_constraints: Vec<SchemaChange>,
    drop_columns: Vec<SchemaChange>,
    create_tables: Vec<SchemaChange>,
    add_columns: Vec<SchemaChange>,
    change_columns: Vec<SchemaChange>,
    primary_keys: Vec<SchemaChange>,
    create_constraints: Vec<SchemaChange>,
    create_foreign_keys: Vec<SchemaChange>,
}

impl Plan {
    fn into_changes(self) -> Vec<SchemaChange> {
        let mut changes = self.drop_foreign_keys;
        changes.extend(self.drop_constraints);
        changes.extend(self.drop_columns);
        changes.extend(self.create_tables);
        changes.extend(self.add_columns);
        changes.extend(self.change_columns);
        changes.extend(self.primary_keys);
        changes.extend(self.create_constraints);
        changes.extend(self.create_foreign_keys);
        changes
    }
}

fn same_table(a: &TablePath, b: &TablePath) -> bool {
    a.name == b.name
        && match (&a.schema, &b.schema) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        }
}

/// Changes that turn `current` into `desired`.
///
/// Tables present only in `current` are left alone. Constraints are matched
/// by name after the desired tables are normalized with `naming`.
pub fn diff_tables(
    dialect: &dyn DialectStrategy,
    naming: &dyn NamingStrategy,
    desired: &[Table],
    current: &[Arc<Table>],
) -> Vec<SchemaChange> {
    let mut plan = Plan::default();
    let mut new_tables = Vec::new();

    for wanted in desired {
        let mut wanted = wanted.clone();
        wanted.normalize(naming);
        match current.iter().find(|t| same_table(&t.path, &wanted.path)) {
            Some(existing) => diff_table(dialect, &wanted, existing, &mut plan),
            None => new_tables.push(wanted),
        }
    }

    order_new_tables(new_tables, current, &mut plan);
    plan.into_changes()
}

/// Emits new tables so that a foreign key only references tables that
/// already exist. Keys inside a reference cycle are split off and created
/// after every table.
fn order_new_tables(mut pending: Vec<Table>, current: &[Arc<Table>], plan: &mut Plan) {
    let new_names: HashSet<String> = pending.iter().map(|t| t.path.name.clone()).collect();
    let mut created: HashSet<String> = current.iter().map(|t| t.path.name.clone()).collect();

    while !pending.is_empty() {
        let resolvable = |table: &Table, created: &HashSet<String>| {
            table.foreign_keys.iter().all(|fk| {
                let target = bare_table_name(&fk.referenced_table_name);
                target == table.path.name || !new_names.contains(target) || created.contains(target)
            })
        };
        let ready = pending.iter().position(|t| resolvable(t, &created));
        let mut table = pending.remove(ready.unwrap_or(0));

        if ready.is_none() {
            let (keep, defer): (Vec<_>, Vec<_>) = table.foreign_keys.drain(..).partition(|fk| {
                let target = bare_table_name(&fk.referenced_table_name);
                target == table.path.name || !new_names.contains(target) || created.contains(target)
            });
            table.foreign_keys = keep;
            for foreign_key in defer {
                plan.create_foreign_keys.push(SchemaChange::CreateForeignKey {
                    table: table.path.clone(),
                    foreign_key,
                });
            }
        }
        created.insert(table.path.name.clone());
        plan.create_tables.push(SchemaChange::CreateTable(table));
    }
}

fn diff_table(dialect: &dyn DialectStrategy, wanted: &Table, existing: &Table, plan: &mut Plan) {
    let path = existing.path.clone();

    // Foreign keys
    for fk in &existing.foreign_keys {
        let Some(name) = &fk.name else { continue };
        if !wanted.foreign_keys.iter().any(|w| w.name.as_ref() == Some(name) && same_foreign_key(w, fk)) {
            plan.drop_foreign_keys.push(SchemaChange::DropForeignKey {
                table: path.clone(),
                name: name.clone(),
            });
        }
    }
    for fk in &wanted.foreign_keys {
        if !existing.foreign_keys.iter().any(|e| e.name == fk.name && same_foreign_key(fk, e)) {
            plan.create_foreign_keys.push(SchemaChange::CreateForeignKey {
                table: path.clone(),
                foreign_key: fk.clone(),
            });
        }
    }

    // Indices, uniques and checks
    for index in &existing.indices {
        let Some(name) = &index.name else { continue };
        if !wanted.indices.iter().any(|w| w.name.as_ref() == Some(name) && same_index(w, index)) {
            plan.drop_constraints.push(SchemaChange::DropIndex {
                table: path.clone(),
                name: name.clone(),
            });
        }
    }
    for unique in &existing.uniques {
        let Some(name) = &unique.name else { continue };
        if !wanted
            .uniques
            .iter()
            .any(|w| w.name.as_ref() == Some(name) && w.column_names == unique.column_names)
        {
            plan.drop_constraints.push(SchemaChange::DropUnique {
                table: path.clone(),
                name: name.clone(),
            });
        }
    }
    for check in &existing.checks {
        let Some(name) = &check.name else { continue };
        if !wanted.checks.iter().any(|w| w.name.as_ref() == Some(name)) {
            plan.drop_constraints.push(SchemaChange::DropCheck {
                table: path.clone(),
                name: name.clone(),
            });
        }
    }
    for unique in &wanted.uniques {
        if !existing
            .uniques
            .iter()
            .any(|e| e.name == unique.name && e.column_names == unique.column_names)
        {
            plan.create_constraints.push(SchemaChange::CreateUnique {
                table: path.clone(),
                unique: unique.clone(),
            });
        }
    }
    for check in &wanted.checks {
        if !existing.checks.iter().any(|e| e.name == check.name) {
            plan.create_constraints.push(SchemaChange::CreateCheck {
                table: path.clone(),
                check: check.clone(),
            });
        }
    }
    for index in &wanted.indices {
        if !existing.indices.iter().any(|e| e.name == index.name && same_index(index, e)) {
            plan.create_constraints.push(SchemaChange::CreateIndex {
                table: path.clone(),
                index: index.clone(),
            });
        }
    }

    // Columns
    for column in &existing.columns {
        if !wanted.has_column(&column.name) {
            plan.drop_columns.push(SchemaChange::DropColumn {
                table: path.clone(),
                column: column.name.clone(),
            });
        }
    }
    for column in &wanted.columns {
        match existing.find_column(&column.name) {
            None => {
                // The wanted uniques cover this column; adding it unique too would
                // create the same constraint twice.
                let mut column = column.clone();
                column.is_unique = false;
                plan.add_columns.push(SchemaChange::AddColumn {
                    table: path.clone(),
                    column,
                });
            }
            Some(live) if column_differs(dialect, column, live) => {
                // Primary key and uniqueness are handled by their own changes.
                let mut new = column.clone();
                new.is_primary = live.is_primary;
                new.is_unique = live.is_unique;
                plan.change_columns.push(SchemaChange::ChangeColumn {
                    table: path.clone(),
                    old: live.name.clone(),
                    new,
                });
            }
            Some(_) => {}
        }
    }

    // Added primary columns join the key as part of their AddColumn.
    let wanted_primary = wanted.primary_column_names();
    let mut after_columns = existing.primary_column_names();
    after_columns.extend(
        wanted
            .columns
            .iter()
            .filter(|c| c.is_primary && !existing.has_column(&c.name))
            .map(|c| c.name.clone()),
    );
    if wanted_primary != after_columns {
        plan.primary_keys.push(SchemaChange::UpdatePrimaryKey {
            table: path,
            columns: wanted_primary,
        });
    }
}

fn same_foreign_key(a: &TableForeignKey, b: &TableForeignKey) -> bool {
    a.column_names == b.column_names
        && bare_table_name(&a.referenced_table_name) == bare_table_name(&b.referenced_table_name)
        && a.referenced_column_names == b.referenced_column_names
        && a.on_delete == b.on_delete
        && a.on_update == b.on_update
}

fn same_index(a: &TableIndex, b: &TableIndex) -> bool {
    a.column_names == b.column_names && a.is_unique == b.is_unique
}

fn trimmed(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim)
}

/// Whether `wanted` and `live` differ in anything an in-place change covers.
///
/// Primary and unique flags are not compared here.
pub fn column_differs(dialect: &dyn DialectStrategy, wanted: &TableColumn, live: &TableColumn) -> bool {
    let caps = dialect.capabilities();

    if wanted.is_enum() || live.is_enum() {
        if wanted.is_enum() != live.is_enum() || wanted.enum_values != live.enum_values {
            return true;
        }
    } else if dialect.normalize_type(&wanted.column_type) != dialect.normalize_type(&live.column_type) {
        return true;
    }

    if caps.normalize_length(&wanted.column_type, wanted.length)
        != caps.normalize_length(&live.column_type, live.length)
    {
        return true;
    }
    if caps.normalize_precision(&wanted.column_type, wanted.precision, wanted.scale)
        != caps.normalize_precision(&live.column_type, live.precision, live.scale)
    {
        return true;
    }

    if !wanted.is_primary && wanted.is_nullable != live.is_nullable {
        return true;
    }
    if wanted.is_generated != live.is_generated
        || (wanted.is_generated && wanted.generation_strategy != live.generation_strategy)
    {
        return true;
    }
    if !wanted.is_generated && trimmed(&wanted.default) != trimmed(&live.default) {
        return true;
    }
    if wanted.as_expression.as_deref().map(str::trim) != live.as_expression.as_deref().map(str::trim)
        || wanted.generated_type != live.generated_type
    {
        return true;
    }
    if wanted.unsigned != live.unsigned {
        return true;
    }
    if trimmed(&wanted.on_update).map(str::to_ascii_uppercase) != trimmed(&live.on_update).map(str::to_ascii_uppercase)
    {
        return true;
    }
    if caps.supports_comments && wanted.comment != live.comment {
        return true;
    }
    if wanted.charset.is_some() && wanted.charset != live.charset {
        return true;
    }
    if wanted.collation.is_some() && wanted.collation != live.collation {
        return true;
    }
    false
}

impl QueryRunner {
    /// Changes that bring the live schema to `desired`.
    pub async fn plan_changes(&mut self, desired: &[Table]) -> Result<Vec<SchemaChange>> {
        let paths: Vec<TablePath> = desired.iter().map(|t| t.path.clone()).collect();
        let current = self.get_tables(&paths).await?;
        Ok(diff_tables(self.dialect.as_ref(), self.naming.as_ref(), desired, &current))
    }

    /// Applies `changes` in order through the schema operations.
    pub async fn apply_changes(&mut self, changes: Vec<SchemaChange>) -> Result<()> {
        for change in changes {
            self.logger.log_schema_build(&change.to_string());
            match change {
                SchemaChange::CreateTable(table) => self.create_table(table, false).await?,
                SchemaChange::DropTable(path) => self.drop_table(path, false).await?,
                SchemaChange::AddColumn { table, column } => self.add_column(table, column).await?,
                SchemaChange::DropColumn { table, column } => self.drop_column(table, &column).await?,
                SchemaChange::ChangeColumn { table, old, new } => self.change_column(table, &old, new).await?,
                SchemaChange::UpdatePrimaryKey { table, columns } => {
                    if columns.is_empty() {
                        self.drop_primary_key(table).await?
                    } else {
                        self.create_primary_key(table, &columns, None).await?
                    }
                }
                SchemaChange::CreateIndex { table, index } => self.create_index(table, index).await?,
                SchemaChange::DropIndex { table, name } => self.drop_index(table, &name).await?,
                SchemaChange::CreateUnique { table, unique } => self.create_unique_constraint(table, unique).await?,
                SchemaChange::DropUnique { table, name } => self.drop_unique_constraint(table, &name).await?,
                SchemaChange::CreateCheck { table, check } => self.create_check_constraint(table, check).await?,
                SchemaChange::DropCheck { table, name } => self.drop_check_constraint(table, &name).await?,
                SchemaChange::CreateForeignKey { table, foreign_key } => {
                    self.create_foreign_key(table, foreign_key).await?
                }
                SchemaChange::DropForeignKey { table, name } => self.drop_foreign_key(table, &name).await?,
            }
        }
        Ok(())
    }

    /// Brings the live schema to `desired` right away.
    pub async fn synchronize(&mut self, desired: &[Table]) -> Result<()> {
        let changes = self.plan_changes(desired).await?;
        self.apply_changes(changes).await
    }

    /// Computes the statements that would bring the live schema to
    /// `desired` without running them.
    ///
    /// The table cache is dropped afterwards since it followed the recorded,
    /// not the live, schema.
    pub async fn generate_migration(&mut self, desired: &[Table]) -> Result<MigrationScript> {
        let changes = self.plan_changes(desired).await?;
        self.enable_sql_memory();
        let applied = self.apply_changes(changes).await;
        let memory = self.get_memory_sql();
        let script = MigrationScript {
            up: memory.up.clone(),
            down: memory.down_in_execution_order().cloned().collect(),
        };
        self.disable_sql_memory();
        self.clear_cache();
        applied?;
        Ok(script)
    }
}
