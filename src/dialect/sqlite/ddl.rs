//! SQLite DDL.
//!
//! SQLite cannot alter columns or constraints in place, so almost every
//! change rebuilds the table: create the new shape under a temporary name,
//! copy the rows, drop the original and rename the copy back. Foreign key
//! enforcement is switched off around the rebuild; otherwise dropping a
//! referenced table deletes (or blocks on) the child rows.

use std::collections::HashMap;

use crate::dialect::sql::{column_list, quote_ident, quote_path, string_literal};
use crate::dialect::{AlterOp, AlterTable, DialectContext, DialectStrategy};
use crate::error::{ObjectKind, Result};
use crate::schema::{ConstraintRename, Table, TableColumn, TableForeignKey, TableIndex, TablePath};
use crate::statement::{Query, Statements};

use super::SqliteDialect;

const QUOTE: char = '"';

fn q(ident: &str) -> String {
    quote_ident(ident, QUOTE)
}

fn path(p: &TablePath) -> String {
    quote_path(p, QUOTE)
}

const FOREIGN_KEYS_OFF: &str = "PRAGMA foreign_keys = OFF";
const FOREIGN_KEYS_ON: &str = "PRAGMA foreign_keys = ON";

fn temporary_path(p: &TablePath) -> TablePath {
    p.renamed(format!("temporary_{}", p.name))
}

/// `"status" IN ('draft', 'live')`, the body of an enum check.
pub(super) fn enum_expression(column: &TableColumn) -> String {
    let values: Vec<String> = column.enum_values.iter().map(|v| string_literal(v)).collect();
    format!("{} IN ({})", q(&column.name), values.join(", "))
}

impl SqliteDialect {
    pub(super) fn column_definition(&self, table: &Table, column: &TableColumn) -> String {
        let mut def = format!("{} {}", q(&column.name), self.column_type(column));

        let single_increment_pk = column.is_primary
            && column.is_increment()
            && table.primary_columns().len() == 1;
        if single_increment_pk {
            def.push_str(" PRIMARY KEY AUTOINCREMENT");
        }
        if let (Some(expr), Some(kind)) = (&column.as_expression, column.generated_type) {
            def.push_str(&format!(" AS ({}) {}", expr, kind.as_sql()));
        }
        if !column.is_nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            if column.as_expression.is_none() {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
        def
    }

    fn column_type(&self, column: &TableColumn) -> String {
        let base = if column.is_enum() {
            "varchar".to_string()
        } else {
            column.column_type.clone()
        };
        if let Some(len) = column.length {
            format!("{}({})", base, len)
        } else if let Some(precision) = column.precision {
            match column.scale {
                Some(scale) => format!("{}({},{})", base, precision, scale),
                None => format!("{}({})", base, precision),
            }
        } else {
            base
        }
    }

    fn foreign_key_clause(&self, fk: &TableForeignKey) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            column_list(&fk.column_names, QUOTE),
            path(&TablePath::parse(&fk.referenced_table_name)),
            column_list(&fk.referenced_column_names, QUOTE)
        );
        sql.push_str(&format!(" ON DELETE {}", fk.on_delete.as_sql()));
        sql.push_str(&format!(" ON UPDATE {}", fk.on_update.as_sql()));
        if let Some(deferrable) = &fk.deferrable {
            sql.push_str(&format!(" DEFERRABLE {}", deferrable));
        }
        sql
    }

    /// Full `CREATE TABLE` for `table`, created as `target`.
    pub(super) fn create_table_sql(&self, table: &Table, target: &TablePath, ctx: &DialectContext<'_>) -> String {
        let naming = ctx.naming;
        let name = &table.path.name;
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(table, c))
            .collect();

        for uq in &table.uniques {
            let uq_name = uq
                .name
                .clone()
                .unwrap_or_else(|| naming.unique_constraint_name(name, &uq.column_names));
            parts.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                q(&uq_name),
                column_list(&uq.column_names, QUOTE)
            ));
        }
        for chk in &table.checks {
            let chk_name = chk
                .name
                .clone()
                .unwrap_or_else(|| naming.check_constraint_name(name, &chk.expression, false));
            parts.push(format!("CONSTRAINT {} CHECK ({})", q(&chk_name), chk.expression));
        }
        for column in table.columns.iter().filter(|c| c.is_enum()) {
            let expr = enum_expression(column);
            let chk_name = naming.check_constraint_name(name, &expr, true);
            parts.push(format!("CONSTRAINT {} CHECK ({})", q(&chk_name), expr));
        }
        for fk in &table.foreign_keys {
            let fk_name = fk
                .name
                .clone()
                .unwrap_or_else(|| naming.foreign_key_name(name, &fk.column_names));
            parts.push(format!("CONSTRAINT {} {}", q(&fk_name), self.foreign_key_clause(fk)));
        }

        let primary = table.primary_column_names();
        let inline_pk = table.primary_columns().len() == 1 && table.primary_columns()[0].is_increment();
        if !primary.is_empty() && !inline_pk {
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                q(&table.primary_key_name_or_default(naming)),
                column_list(&primary, QUOTE)
            ));
        }

        let mut sql = format!("CREATE TABLE {} ({})", path(target), parts.join(", "));
        if table.without_rowid {
            sql.push_str(" WITHOUT ROWID");
        }
        sql
    }

    pub(super) fn create_index_sql(&self, table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> String {
        let mut sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.is_unique { "UNIQUE " } else { "" },
            q(&self.index_name(table, index, ctx)),
            path(&table.path),
            column_list(&index.column_names, QUOTE)
        );
        if let Some(predicate) = &index.where_clause {
            sql.push_str(&format!(" WHERE {}", predicate));
        }
        sql
    }

    pub(super) fn drop_index_sql(&self, table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> String {
        let name = table.path.renamed(self.index_name(table, index, ctx));
        format!("DROP INDEX {}", path(&name))
    }

    fn index_name(&self, table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> String {
        index.name.clone().unwrap_or_else(|| {
            ctx.naming
                .index_name(&table.path.name, &index.column_names, index.where_clause.as_deref())
        })
    }

    pub(super) fn create(&self, table: &Table, ctx: &DialectContext<'_>) -> Result<Statements> {
        self.check_table(table)?;
        let mut stmts = Statements::new();
        stmts.pair(
            self.create_table_sql(table, &table.path, ctx),
            format!("DROP TABLE {}", path(&table.path)),
        );
        for index in &table.indices {
            stmts.pair(
                self.create_index_sql(table, index, ctx),
                self.drop_index_sql(table, index, ctx),
            );
        }
        Ok(stmts)
    }

    /// Statements rebuilding `old` into `new`.
    ///
    /// `sources` maps a column of `new` to the column of `old` it is copied from
    /// when the names differ.
    fn recreate_steps(
        &self,
        old: &Table,
        new: &Table,
        sources: &HashMap<String, String>,
        ctx: &DialectContext<'_>,
    ) -> Vec<Query> {
        let temp = temporary_path(&new.path);
        let mut steps = vec![
            Query::new(FOREIGN_KEYS_OFF),
            Query::new(self.create_table_sql(new, &temp, ctx)),
        ];

        let mut targets = Vec::new();
        let mut selected = Vec::new();
        for column in new.columns.iter().filter(|c| !c.is_computed()) {
            let source = sources.get(&column.name).unwrap_or(&column.name);
            if old.find_column(source).map(|c| !c.is_computed()).unwrap_or(false) {
                targets.push(column.name.clone());
                selected.push(source.clone());
            }
        }
        if !targets.is_empty() {
            steps.push(Query::new(format!(
                "INSERT INTO {}({}) SELECT {} FROM {}",
                path(&temp),
                column_list(&targets, QUOTE),
                column_list(&selected, QUOTE),
                path(&old.path)
            )));
        }
        steps.push(Query::new(format!("DROP TABLE {}", path(&old.path))));
        steps.push(Query::new(format!(
            "ALTER TABLE {} RENAME TO {}",
            path(&temp),
            q(&new.path.name)
        )));
        for index in &new.indices {
            steps.push(Query::new(self.create_index_sql(new, index, ctx)));
        }
        steps.push(Query::new(FOREIGN_KEYS_ON));
        steps
    }

    /// Rebuild in both directions. The down half is stored back to front.
    pub(super) fn recreate(
        &self,
        old: &Table,
        new: &Table,
        renamed: &[(String, String)],
        ctx: &DialectContext<'_>,
    ) -> Result<Statements> {
        self.check_table(new)?;
        let forward: HashMap<String, String> = renamed
            .iter()
            .map(|(from, to)| (to.clone(), from.clone()))
            .collect();
        let backward: HashMap<String, String> = renamed
            .iter()
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();

        let up = self.recreate_steps(old, new, &forward, ctx);
        let mut down = self.recreate_steps(new, old, &backward, ctx);
        down.reverse();
        Ok(Statements { up, down })
    }

    fn check_table(&self, table: &Table) -> Result<()> {
        self.check_support(table)
    }

    /// `ALTER TABLE .. ADD COLUMN` covers nullable or defaulted plain columns.
    fn can_add_in_place(column: &TableColumn) -> bool {
        !column.is_primary
            && !column.is_unique
            && !column.is_enum()
            && column.generated_type != Some(crate::schema::GeneratedType::Stored)
            && (column.is_nullable || column.default.is_some())
    }

    pub(super) fn alter(&self, change: &AlterTable<'_>, ctx: &DialectContext<'_>) -> Result<Statements> {
        let AlterTable { before, after, op } = *change;
        match op {
            AlterOp::AddColumn(column) if Self::can_add_in_place(column) => {
                self.check_table(after)?;
                let mut stmts = Statements::new();
                stmts.pair(
                    format!(
                        "ALTER TABLE {} ADD COLUMN {}",
                        path(&before.path),
                        self.column_definition(after, column)
                    ),
                    format!("ALTER TABLE {} DROP COLUMN {}", path(&before.path), q(&column.name)),
                );
                Ok(stmts)
            }
            AlterOp::RenameColumn { old, new, .. } => {
                self.recreate(before, after, &[(old.name.clone(), new.name.clone())], ctx)
            }
            AlterOp::ChangeColumn { old, new } if old.name != new.name => {
                self.recreate(before, after, &[(old.name.clone(), new.name.clone())], ctx)
            }
            AlterOp::CreateIndex(index) => {
                let mut stmts = Statements::new();
                stmts.pair(
                    self.create_index_sql(after, index, ctx),
                    self.drop_index_sql(after, index, ctx),
                );
                Ok(stmts)
            }
            AlterOp::DropIndex(index) => {
                let mut stmts = Statements::new();
                stmts.pair(
                    self.drop_index_sql(before, index, ctx),
                    self.create_index_sql(before, index, ctx),
                );
                Ok(stmts)
            }
            _ => self.recreate(before, after, &[], ctx),
        }
    }

    pub(super) fn rename(
        &self,
        before: &Table,
        after: &Table,
        renames: &[ConstraintRename],
        ctx: &DialectContext<'_>,
    ) -> Result<Statements> {
        let mut stmts = Statements::new();
        stmts.pair(
            format!("ALTER TABLE {} RENAME TO {}", path(&before.path), q(&after.path.name)),
            format!("ALTER TABLE {} RENAME TO {}", path(&after.path), q(&before.path.name)),
        );

        let moved = Table {
            path: after.path.clone(),
            ..before.clone()
        };
        let needs_rebuild = renames.iter().any(|r| r.kind != ObjectKind::Index);
        if needs_rebuild {
            stmts.append(self.recreate(&moved, after, &[], ctx)?);
            return Ok(stmts);
        }
        for rename in renames {
            if let (Some(old_index), Some(new_index)) = (
                moved.find_index(&rename.old_name),
                after.find_index(&rename.new_name),
            ) {
                stmts.pair(
                    self.drop_index_sql(&moved, old_index, ctx),
                    self.create_index_sql(&moved, old_index, ctx),
                );
                stmts.pair(
                    self.create_index_sql(after, new_index, ctx),
                    self.drop_index_sql(after, new_index, ctx),
                );
            }
        }
        Ok(stmts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{DefaultNamingStrategy, NamingStrategy};
    use crate::schema::{GenerationStrategy, TableUnique};

    fn ctx(naming: &DefaultNamingStrategy) -> DialectContext<'_> {
        DialectContext {
            naming,
            database: None,
            schema: None,
            metadata_table: "typeorm_metadata",
        }
    }

    #[test]
    fn test_autoincrement_is_inlined() {
        let naming = DefaultNamingStrategy;
        let table = Table::new("t")
            .column(TableColumn::new("id", "integer").primary().generated(GenerationStrategy::Increment))
            .column(TableColumn::new("name", "varchar").nullable());
        let sql = SqliteDialect::new().create_table_sql(&table, &table.path, &ctx(&naming));
        assert_eq!(
            sql,
            "CREATE TABLE \"t\" (\"id\" integer PRIMARY KEY AUTOINCREMENT NOT NULL, \"name\" varchar)"
        );
    }

    #[test]
    fn test_named_primary_key_and_unique() {
        let naming = DefaultNamingStrategy;
        let table = Table::new("t")
            .column(TableColumn::new("id", "int").primary())
            .column(TableColumn::new("name", "varchar"))
            .unique(TableUnique::new(["name"]));
        let sql = SqliteDialect::new().create_table_sql(&table, &table.path, &ctx(&naming));
        let uq = naming.unique_constraint_name("t", &["name".to_string()]);
        let pk = naming.primary_key_name("t", &["id".to_string()]);
        assert!(sql.contains(&format!("CONSTRAINT \"{}\" UNIQUE (\"name\")", uq)));
        assert!(sql.ends_with(&format!("CONSTRAINT \"{}\" PRIMARY KEY (\"id\"))", pk)));
    }

    #[test]
    fn test_recreate_copies_renamed_columns() {
        let naming = DefaultNamingStrategy;
        let before = Table::new("t")
            .column(TableColumn::new("id", "integer").primary())
            .column(TableColumn::new("a", "varchar"));
        let mut after = before.clone();
        after.rename_column("a", "b", &naming).unwrap();

        let stmts = SqliteDialect::new()
            .recreate(&before, &after, &[("a".into(), "b".into())], &ctx(&naming))
            .unwrap();
        let up: Vec<&str> = stmts.up.iter().map(|q| q.sql.as_str()).collect();
        assert_eq!(up[0], "PRAGMA foreign_keys = OFF");
        assert!(up[1].starts_with("CREATE TABLE \"temporary_t\""));
        assert_eq!(up[2], "INSERT INTO \"temporary_t\"(\"id\", \"b\") SELECT \"id\", \"a\" FROM \"t\"");
        assert_eq!(up[3], "DROP TABLE \"t\"");
        assert_eq!(up[4], "ALTER TABLE \"temporary_t\" RENAME TO \"t\"");
        assert_eq!(up.last(), Some(&"PRAGMA foreign_keys = ON"));

        // Executed back to front, the down half copies b back into a.
        let down: Vec<&str> = stmts.down.iter().rev().map(|q| q.sql.as_str()).collect();
        assert_eq!(down[0], "PRAGMA foreign_keys = OFF");
        assert_eq!(down[2], "INSERT INTO \"temporary_t\"(\"id\", \"a\") SELECT \"id\", \"b\" FROM \"t\"");
        assert_eq!(down.last(), Some(&"PRAGMA foreign_keys = ON"));
    }

    #[test]
    fn test_enum_becomes_named_check() {
        let naming = DefaultNamingStrategy;
        let table = Table::new("t").column(TableColumn::new("status", "varchar").enum_values(["a", "b"]));
        let sql = SqliteDialect::new().create_table_sql(&table, &table.path, &ctx(&naming));
        assert!(sql.contains("\"status\" varchar NOT NULL"));
        assert!(sql.contains("_ENUM\" CHECK (\"status\" IN ('a', 'b'))"));
    }
}
