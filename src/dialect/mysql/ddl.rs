//! MySQL DDL.
//!
//! Uniques are unique indices, column changes go through `CHANGE`, and
//! foreign keys cannot be renamed, so a rename drops and re-adds them.

use crate::dialect::sql::{column_list, quote_ident, quote_path, string_literal};
use crate::dialect::{unsupported, AlterOp, AlterTable, DialectContext, DialectStrategy};
use crate::error::{ObjectKind, Result};
use crate::schema::{
    ConstraintRename, Table, TableColumn, TableForeignKey, TableIndex, TablePath,
    TableUnique,
};
use crate::statement::Statements;

use super::MySqlDialect;

const QUOTE: char = '`';

fn q(ident: &str) -> String {
    quote_ident(ident, QUOTE)
}

fn path(p: &TablePath) -> String {
    quote_path(p, QUOTE)
}

impl MySqlDialect {
    fn column_type(&self, column: &TableColumn) -> String {
        if column.is_enum() {
            let values: Vec<String> = column.enum_values.iter().map(|v| string_literal(v)).collect();
            return format!("enum({})", values.join(","));
        }
        let base = column.column_type.clone();
        let mut sql = if let Some(len) = column.length.or_else(|| self.caps.default_length(&base)) {
            format!("{}({})", base, len)
        } else if let Some(precision) = column.precision {
            match column.scale {
                Some(scale) => format!("{}({},{})", base, precision, scale),
                None => format!("{}({})", base, precision),
            }
        } else {
            base
        };
        if column.unsigned {
            sql.push_str(" UNSIGNED");
        }
        sql
    }

    /// Full column definition; `increment` controls `AUTO_INCREMENT` so a
    /// primary key can be replaced around it.
    fn column_definition_with(&self, column: &TableColumn, increment: bool) -> String {
        let mut def = format!("{} {}", q(&column.name), self.column_type(column));
        if let Some(charset) = &column.charset {
            def.push_str(&format!(" CHARACTER SET \"{}\"", charset));
        }
        if let Some(collation) = &column.collation {
            def.push_str(&format!(" COLLATE \"{}\"", collation));
        }
        if let (Some(expr), Some(kind)) = (&column.as_expression, column.generated_type) {
            def.push_str(&format!(" AS ({}) {}", expr, kind.as_sql()));
        }
        def.push_str(if column.is_nullable { " NULL" } else { " NOT NULL" });
        if !column.is_computed() {
            if let Some(default) = &column.default {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
        if let Some(on_update) = &column.on_update {
            def.push_str(&format!(" ON UPDATE {}", on_update));
        }
        if increment && column.is_increment() {
            def.push_str(" AUTO_INCREMENT");
        }
        if let Some(comment) = &column.comment {
            def.push_str(&format!(" COMMENT {}", string_literal(comment)));
        }
        def
    }

    pub(super) fn column_definition(&self, column: &TableColumn) -> String {
        self.column_definition_with(column, true)
    }

    fn unique_name(table: &Table, uq: &TableUnique, ctx: &DialectContext<'_>) -> String {
        uq.name
            .clone()
            .unwrap_or_else(|| ctx.naming.unique_constraint_name(&table.path.name, &uq.column_names))
    }

    fn index_name(table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> String {
        index.name.clone().unwrap_or_else(|| {
            ctx.naming
                .index_name(&table.path.name, &index.column_names, index.where_clause.as_deref())
        })
    }

    fn foreign_key_name(table: &Table, fk: &TableForeignKey, ctx: &DialectContext<'_>) -> String {
        fk.name
            .clone()
            .unwrap_or_else(|| ctx.naming.foreign_key_name(&table.path.name, &fk.column_names))
    }

    fn index_kind(index: &TableIndex) -> &'static str {
        if index.is_unique {
            "UNIQUE "
        } else if index.is_spatial {
            "SPATIAL "
        } else if index.is_fulltext {
            "FULLTEXT "
        } else {
            ""
        }
    }

    fn foreign_key_clause(fk: &TableForeignKey) -> String {
        format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            column_list(&fk.column_names, QUOTE),
            path(&TablePath::parse(&fk.referenced_table_name)),
            column_list(&fk.referenced_column_names, QUOTE),
            fk.on_delete,
            fk.on_update
        )
    }

    fn check_table(&self, table: &Table) -> Result<()> {
        self.check_support(table)?;
        if table.indices.iter().any(|i| i.where_clause.is_some()) {
            return Err(unsupported(self, "partial indices"));
        }
        Ok(())
    }

    fn create_table_sql(&self, table: &Table, ctx: &DialectContext<'_>) -> String {
        let mut parts: Vec<String> = table.columns.iter().map(|c| self.column_definition(c)).collect();
        for uq in &table.uniques {
            parts.push(format!(
                "UNIQUE INDEX {} ({})",
                q(&Self::unique_name(table, uq, ctx)),
                column_list(&uq.column_names, QUOTE)
            ));
        }
        for index in &table.indices {
            parts.push(format!(
                "{}INDEX {} ({})",
                Self::index_kind(index),
                q(&Self::index_name(table, index, ctx)),
                column_list(&index.column_names, QUOTE)
            ));
        }
        let primary = table.primary_column_names();
        if !primary.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", column_list(&primary, QUOTE)));
        }
        for fk in &table.foreign_keys {
            parts.push(format!(
                "CONSTRAINT {} {}",
                q(&Self::foreign_key_name(table, fk, ctx)),
                Self::foreign_key_clause(fk)
            ));
        }
        let mut sql = format!("CREATE TABLE {} ({})", path(&table.path), parts.join(", "));
        sql.push_str(&format!(" ENGINE={}", table.engine.as_deref().unwrap_or("InnoDB")));
        if let Some(comment) = &table.comment {
            sql.push_str(&format!(" COMMENT={}", string_literal(comment)));
        }
        sql
    }

    pub(super) fn create(&self, table: &Table, ctx: &DialectContext<'_>) -> Result<Statements> {
        self.check_table(table)?;
        let mut stmts = Statements::new();
        stmts.pair(
            self.create_table_sql(table, ctx),
            format!("DROP TABLE {}", path(&table.path)),
        );
        Ok(stmts)
    }

    fn alter_sql(&self, table: &Table, clause: impl AsRef<str>) -> String {
        format!("ALTER TABLE {} {}", path(&table.path), clause.as_ref())
    }

    fn index_statements(&self, table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> Statements {
        let name = q(&Self::index_name(table, index, ctx));
        let mut stmts = Statements::new();
        stmts.pair(
            format!(
                "CREATE {}INDEX {} ON {} ({})",
                Self::index_kind(index),
                name,
                path(&table.path),
                column_list(&index.column_names, QUOTE)
            ),
            format!("DROP INDEX {} ON {}", name, path(&table.path)),
        );
        stmts
    }

    fn unique_statements(&self, table: &Table, uq: &TableUnique, ctx: &DialectContext<'_>) -> Statements {
        let name = q(&Self::unique_name(table, uq, ctx));
        let mut stmts = Statements::new();
        stmts.pair(
            format!(
                "CREATE UNIQUE INDEX {} ON {} ({})",
                name,
                path(&table.path),
                column_list(&uq.column_names, QUOTE)
            ),
            format!("DROP INDEX {} ON {}", name, path(&table.path)),
        );
        stmts
    }

    fn foreign_key_statements(&self, table: &Table, fk: &TableForeignKey, ctx: &DialectContext<'_>) -> Statements {
        let name = q(&Self::foreign_key_name(table, fk, ctx));
        let mut stmts = Statements::new();
        stmts.pair(
            self.alter_sql(table, format!("ADD CONSTRAINT {} {}", name, Self::foreign_key_clause(fk))),
            self.alter_sql(table, format!("DROP FOREIGN KEY {}", name)),
        );
        stmts
    }

    /// Replaces the primary key, taking `AUTO_INCREMENT` off its columns
    /// while no key backs them.
    fn primary_key_statements(&self, before: &Table, after: &Table) -> Statements {
        let mut stmts = Statements::new();
        let old_columns = before.primary_column_names();
        let new_columns = after.primary_column_names();
        if old_columns == new_columns {
            return stmts;
        }
        let increments: Vec<&TableColumn> = before
            .primary_columns()
            .into_iter()
            .filter(|c| c.is_increment())
            .collect();
        for column in &increments {
            stmts.pair(
                self.alter_sql(
                    after,
                    format!("CHANGE {} {}", q(&column.name), self.column_definition_with(column, false)),
                ),
                self.alter_sql(
                    after,
                    format!("CHANGE {} {}", q(&column.name), self.column_definition_with(column, true)),
                ),
            );
        }
        if !old_columns.is_empty() {
            stmts.pair(
                self.alter_sql(after, "DROP PRIMARY KEY"),
                self.alter_sql(after, format!("ADD PRIMARY KEY ({})", column_list(&old_columns, QUOTE))),
            );
        }
        if !new_columns.is_empty() {
            stmts.pair(
                self.alter_sql(after, format!("ADD PRIMARY KEY ({})", column_list(&new_columns, QUOTE))),
                self.alter_sql(after, "DROP PRIMARY KEY"),
            );
        }
        for column in increments {
            if let Some(kept) = after.find_column(&column.name).filter(|c| c.is_primary && c.is_increment()) {
                stmts.pair(
                    self.alter_sql(
                        after,
                        format!("CHANGE {} {}", q(&kept.name), self.column_definition_with(kept, true)),
                    ),
                    self.alter_sql(
                        after,
                        format!("CHANGE {} {}", q(&kept.name), self.column_definition_with(kept, false)),
                    ),
                );
            }
        }
        stmts
    }

    /// Drops indices, uniques and foreign keys only `before` has, then
    /// creates those only `after` has.
    fn constraint_statements(&self, before: &Table, after: &Table, ctx: &DialectContext<'_>) -> Statements {
        let mut stmts = Statements::new();
        for fk in &before.foreign_keys {
            let name = Self::foreign_key_name(before, fk, ctx);
            if !after.foreign_keys.iter().any(|f| Self::foreign_key_name(after, f, ctx) == name) {
                stmts.append(self.foreign_key_statements(before, fk, ctx).inverse());
            }
        }
        for index in &before.indices {
            let name = Self::index_name(before, index, ctx);
            if !after.indices.iter().any(|i| Self::index_name(after, i, ctx) == name) {
                stmts.append(self.index_statements(before, index, ctx).inverse());
            }
        }
        for uq in &before.uniques {
            let name = Self::unique_name(before, uq, ctx);
            if !after.uniques.iter().any(|u| Self::unique_name(after, u, ctx) == name) {
                stmts.append(self.unique_statements(before, uq, ctx).inverse());
            }
        }
        for index in &after.indices {
            let name = Self::index_name(after, index, ctx);
            if !before.indices.iter().any(|i| Self::index_name(before, i, ctx) == name) {
                stmts.append(self.index_statements(after, index, ctx));
            }
        }
        for uq in &after.uniques {
            let name = Self::unique_name(after, uq, ctx);
            if !before.uniques.iter().any(|u| Self::unique_name(before, u, ctx) == name) {
                stmts.append(self.unique_statements(after, uq, ctx));
            }
        }
        for fk in &after.foreign_keys {
            let name = Self::foreign_key_name(after, fk, ctx);
            if !before.foreign_keys.iter().any(|f| Self::foreign_key_name(before, f, ctx) == name) {
                stmts.append(self.foreign_key_statements(after, fk, ctx));
            }
        }
        stmts
    }

    /// Statements for constraint renames caused by a column or table rename.
    fn rename_statements(
        &self,
        before: &Table,
        after: &Table,
        renames: &[ConstraintRename],
        ctx: &DialectContext<'_>,
    ) -> Statements {
        let mut stmts = Statements::new();
        for rename in renames {
            match rename.kind {
                ObjectKind::Index | ObjectKind::Unique => {
                    let rename_index = |from: &str, to: &str| {
                        self.alter_sql(after, format!("RENAME INDEX {} TO {}", q(from), q(to)))
                    };
                    stmts.pair(
                        rename_index(&rename.old_name, &rename.new_name),
                        rename_index(&rename.new_name, &rename.old_name),
                    );
                }
                ObjectKind::ForeignKey => {
                    let (Some(old_fk), Some(new_fk)) = (
                        before.find_foreign_key(&rename.old_name),
                        after.find_foreign_key(&rename.new_name),
                    ) else {
                        continue;
                    };
                    let moved = Table {
                        path: after.path.clone(),
                        ..before.clone()
                    };
                    stmts.append(self.foreign_key_statements(&moved, old_fk, ctx).inverse());
                    stmts.append(self.foreign_key_statements(after, new_fk, ctx));
                }
                // The primary key is always called PRIMARY.
                _ => {}
            }
        }
        stmts
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
            format!("RENAME TABLE {} TO {}", path(&before.path), path(&after.path)),
            format!("RENAME TABLE {} TO {}", path(&after.path), path(&before.path)),
        );
        stmts.append(self.rename_statements(before, after, renames, ctx));
        Ok(stmts)
    }

    fn add_column(
        &self,
        before: &Table,
        after: &Table,
        column: &TableColumn,
        ctx: &DialectContext<'_>,
    ) -> Result<Statements> {
        self.check_table(after)?;
        let mut stmts = Statements::new();
        stmts.pair(
            self.alter_sql(after, format!("ADD {}", self.column_definition(column))),
            self.alter_sql(after, format!("DROP COLUMN {}", q(&column.name))),
        );
        if column.is_primary {
            stmts.append(self.primary_key_statements(before, after));
        }
        stmts.append(self.constraint_statements(before, after, ctx));
        Ok(stmts)
    }

    fn change_column(
        &self,
        before: &Table,
        after: &Table,
        old: &TableColumn,
        new: &TableColumn,
        ctx: &DialectContext<'_>,
    ) -> Result<Statements> {
        self.check_table(after)?;
        if self.lossy_change(old, new).is_some() {
            let mut stripped = before.clone();
            stripped.remove_column(&old.name);
            let mut stmts = self.add_column(&stripped, before, old, ctx)?.inverse();
            stmts.append(self.add_column(&stripped, after, new, ctx)?);
            return Ok(stmts);
        }
        let mut stmts = Statements::new();
        if old.is_primary != new.is_primary {
            stmts.append(self.primary_key_statements(before, after));
        }
        stmts.pair(
            self.alter_sql(after, format!("CHANGE {} {}", q(&old.name), self.column_definition(new))),
            self.alter_sql(after, format!("CHANGE {} {}", q(&new.name), self.column_definition(old))),
        );
        stmts.append(self.constraint_statements(before, after, ctx));
        Ok(stmts)
    }

    pub(super) fn alter(&self, change: &AlterTable<'_>, ctx: &DialectContext<'_>) -> Result<Statements> {
        let AlterTable { before, after, op } = *change;
        match op {
            AlterOp::AddColumn(column) => self.add_column(before, after, column, ctx),
            AlterOp::DropColumn(column) => Ok(self.add_column(after, before, column, ctx)?.inverse()),
            AlterOp::RenameColumn { old, new, renames } => {
                let mut stmts = Statements::new();
                stmts.pair(
                    self.alter_sql(after, format!("CHANGE {} {}", q(&old.name), self.column_definition(new))),
                    self.alter_sql(after, format!("CHANGE {} {}", q(&new.name), self.column_definition(old))),
                );
                stmts.append(self.rename_statements(before, after, renames, ctx));
                Ok(stmts)
            }
            AlterOp::ChangeColumn { old, new } => self.change_column(before, after, old, new, ctx),
            AlterOp::UpdatePrimaryKey => Ok(self.primary_key_statements(before, after)),
            AlterOp::CreateUnique(uq) => Ok(self.unique_statements(after, uq, ctx)),
            AlterOp::DropUnique(uq) => Ok(self.unique_statements(before, uq, ctx).inverse()),
            AlterOp::CreateCheck(_) | AlterOp::DropCheck(_) => Err(unsupported(self, "check constraints")),
            AlterOp::CreateExclusion(_) | AlterOp::DropExclusion(_) => {
                Err(unsupported(self, "exclusion constraints"))
            }
            AlterOp::CreateForeignKey(fk) => Ok(self.foreign_key_statements(after, fk, ctx)),
            AlterOp::DropForeignKey(fk) => Ok(self.foreign_key_statements(before, fk, ctx).inverse()),
            AlterOp::CreateIndex(index) => {
                self.check_table(after)?;
                Ok(self.index_statements(after, index, ctx))
            }
            AlterOp::DropIndex(index) => Ok(self.index_statements(before, index, ctx).inverse()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{DefaultNamingStrategy, NamingStrategy};
    use crate::schema::{GenerationStrategy, TableCheck};

    fn ctx(naming: &DefaultNamingStrategy) -> DialectContext<'_> {
        DialectContext {
            naming,
            database: None,
            schema: None,
            metadata_table: "typeorm_metadata",
        }
    }

    fn orders() -> Table {
        let mut t = Table::new("orders")
            .column(
                TableColumn::new("id", "int")
                    .primary()
                    .generated(GenerationStrategy::Increment),
            )
            .column(TableColumn::new("code", "varchar").unique())
            .column(TableColumn::new("state", "varchar").enum_values(["new", "paid"]).default_value("'new'"))
            .column(TableColumn::new("total", "decimal").precision(10, Some(2)).comment("gross"));
        t.normalize(&DefaultNamingStrategy);
        t
    }

    #[test]
    fn test_create_table_inlines_indices() {
        let naming = DefaultNamingStrategy;
        let stmts = MySqlDialect::new().create(&orders(), &ctx(&naming)).unwrap();
        let sql = &stmts.up[0].sql;
        assert!(sql.starts_with("CREATE TABLE `orders` (`id` int NOT NULL AUTO_INCREMENT, "));
        assert!(sql.contains("`code` varchar(255) NOT NULL"));
        assert!(sql.contains("`state` enum('new','paid') NOT NULL DEFAULT 'new'"));
        assert!(sql.contains("`total` decimal(10,2) NOT NULL COMMENT 'gross'"));
        let uq = naming.unique_constraint_name("orders", &["code".into()]);
        assert!(sql.contains(&format!("UNIQUE INDEX `{}` (`code`)", uq)));
        assert!(sql.ends_with("PRIMARY KEY (`id`)) ENGINE=InnoDB"));
        assert_eq!(stmts.down[0].sql, "DROP TABLE `orders`");
    }

    #[test]
    fn test_checks_are_rejected_before_any_sql() {
        let naming = DefaultNamingStrategy;
        let table = orders().check(TableCheck::new("`total` > 0"));
        assert!(matches!(
            MySqlDialect::new().create(&table, &ctx(&naming)),
            Err(crate::RunnerError::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_change_column_uses_change() {
        let naming = DefaultNamingStrategy;
        let before = orders();
        let mut after = before.clone();
        let old = before.find_column("total").unwrap().clone();
        let mut new = old.clone();
        new.precision = Some(12);
        after.replace_column("total", new.clone());
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::ChangeColumn { old: &old, new: &new },
        };
        let stmts = MySqlDialect::new().alter(&change, &ctx(&naming)).unwrap();
        assert_eq!(
            stmts.up[0].sql,
            "ALTER TABLE `orders` CHANGE `total` `total` decimal(12,2) NOT NULL COMMENT 'gross'"
        );
        assert_eq!(
            stmts.down[0].sql,
            "ALTER TABLE `orders` CHANGE `total` `total` decimal(10,2) NOT NULL COMMENT 'gross'"
        );
    }

    #[test]
    fn test_foreign_key_rename_drops_and_recreates() {
        let naming = DefaultNamingStrategy;
        let mut before = Table::new("lines")
            .column(TableColumn::new("order_id", "int"))
            .foreign_key(TableForeignKey::new(["order_id"], "orders", ["id"]));
        before.normalize(&naming);
        let mut after = before.clone();
        let renames = after.rename_column("order_id", "parent_id", &naming).unwrap();
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::RenameColumn {
                old: before.find_column("order_id").unwrap(),
                new: after.find_column("parent_id").unwrap(),
                renames: &renames,
            },
        };
        let stmts = MySqlDialect::new().alter(&change, &ctx(&naming)).unwrap();
        let old_fk = naming.foreign_key_name("lines", &["order_id".into()]);
        let new_fk = naming.foreign_key_name("lines", &["parent_id".into()]);
        let up: Vec<&str> = stmts.up.iter().map(|q| q.sql.as_str()).collect();
        assert_eq!(up[0], "ALTER TABLE `lines` CHANGE `order_id` `parent_id` int NOT NULL");
        assert_eq!(up[1], format!("ALTER TABLE `lines` DROP FOREIGN KEY `{}`", old_fk));
        assert!(up[2].starts_with(&format!("ALTER TABLE `lines` ADD CONSTRAINT `{}` FOREIGN KEY (`parent_id`)", new_fk)));
    }

    #[test]
    fn test_primary_key_change_lifts_auto_increment() {
        let naming = DefaultNamingStrategy;
        let before = orders();
        let mut after = before.clone();
        after.set_primary_columns(&["id".to_string(), "code".to_string()]);
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::UpdatePrimaryKey,
        };
        let stmts = MySqlDialect::new().alter(&change, &ctx(&naming)).unwrap();
        let up: Vec<&str> = stmts.up.iter().map(|q| q.sql.as_str()).collect();
        assert_eq!(up[0], "ALTER TABLE `orders` CHANGE `id` `id` int NOT NULL");
        assert_eq!(up[1], "ALTER TABLE `orders` DROP PRIMARY KEY");
        assert_eq!(up[2], "ALTER TABLE `orders` ADD PRIMARY KEY (`id`, `code`)");
        assert_eq!(up[3], "ALTER TABLE `orders` CHANGE `id` `id` int NOT NULL AUTO_INCREMENT");
    }
}
