//! PostgreSQL and CockroachDB DDL.

use crate::dialect::sql::{column_list, quote_ident, quote_path, string_literal};
use crate::dialect::{AlterOp, AlterTable, DialectContext, DialectStrategy};
use crate::error::{ObjectKind, Result};
use crate::schema::{
    ConstraintRename, GenerationStrategy, Table, TableCheck, TableColumn, TableExclusion, TableForeignKey,
    TableIndex, TablePath, TableUnique,
};
use crate::statement::Statements;

use super::PostgresDialect;

const QUOTE: char = '"';

fn q(ident: &str) -> String {
    quote_ident(ident, QUOTE)
}

fn path(p: &TablePath) -> String {
    quote_path(p, QUOTE)
}

/// `timestamp with time zone` + 3 -> `timestamp(3) with time zone`.
fn with_arguments(base: &str, args: &str) -> String {
    match base.find(" with") {
        Some(pos) => format!("{}({}){}", &base[..pos], args, &base[pos..]),
        None => format!("{}({})", base, args),
    }
}

fn serial_type(column_type: &str) -> Option<&'static str> {
    match column_type.to_ascii_lowercase().as_str() {
        "integer" | "int" | "int4" => Some("serial"),
        "smallint" | "int2" => Some("smallserial"),
        "bigint" | "int8" => Some("bigserial"),
        _ => None,
    }
}

impl PostgresDialect {
    // ====== Names ======

    /// Native enum type backing `column`: `<table>_<column>_enum`.
    pub(super) fn enum_type_path(table: &Table, column: &TableColumn) -> TablePath {
        table.path.renamed(format!("{}_{}_enum", table.path.name, column.name))
    }

    /// Sequence feeding an increment column: `<table>_<column>_seq`.
    pub(super) fn sequence_path(table: &Table, column: &str) -> TablePath {
        table.path.renamed(format!("{}_{}_seq", table.path.name, column))
    }

    fn pk_name(table: &Table, ctx: &DialectContext<'_>) -> String {
        table.primary_key_name_or_default(ctx.naming)
    }

    fn unique_name(table: &Table, uq: &TableUnique, ctx: &DialectContext<'_>) -> String {
        uq.name
            .clone()
            .unwrap_or_else(|| ctx.naming.unique_constraint_name(&table.path.name, &uq.column_names))
    }

    fn check_name(table: &Table, chk: &TableCheck, ctx: &DialectContext<'_>) -> String {
        chk.name
            .clone()
            .unwrap_or_else(|| ctx.naming.check_constraint_name(&table.path.name, &chk.expression, false))
    }

    fn exclusion_name(table: &Table, xcl: &TableExclusion, ctx: &DialectContext<'_>) -> String {
        xcl.name
            .clone()
            .unwrap_or_else(|| ctx.naming.exclusion_constraint_name(&table.path.name, &xcl.expression))
    }

    fn foreign_key_name(table: &Table, fk: &TableForeignKey, ctx: &DialectContext<'_>) -> String {
        fk.name
            .clone()
            .unwrap_or_else(|| ctx.naming.foreign_key_name(&table.path.name, &fk.column_names))
    }

    fn index_name(table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> String {
        index.name.clone().unwrap_or_else(|| {
            ctx.naming
                .index_name(&table.path.name, &index.column_names, index.where_clause.as_deref())
        })
    }

    /// `"t"@"idx"` on CockroachDB, `"schema"."idx"` on PostgreSQL.
    fn index_ref(&self, table: &Table, name: &str) -> String {
        if self.cockroach {
            format!("{}@{}", path(&table.path), q(name))
        } else {
            path(&table.path.renamed(name))
        }
    }

    // ====== Column definitions ======

    /// Declared type without serial substitution.
    fn column_type(&self, table: &Table, column: &TableColumn) -> String {
        if column.is_enum() {
            return path(&Self::enum_type_path(table, column));
        }
        let base = column.column_type.clone();
        if let Some(len) = column.length {
            with_arguments(&base, &len.to_string())
        } else if let Some(precision) = column.precision {
            match column.scale {
                Some(scale) => with_arguments(&base, &format!("{},{}", precision, scale)),
                None => with_arguments(&base, &precision.to_string()),
            }
        } else {
            base
        }
    }

    fn generated_default(&self, table: &Table, column: &TableColumn) -> Option<String> {
        match column.generation_strategy {
            Some(GenerationStrategy::Uuid) if column.is_generated => Some("gen_random_uuid()".to_string()),
            Some(GenerationStrategy::Rowid) if column.is_generated => Some("unique_rowid()".to_string()),
            Some(GenerationStrategy::Increment) if column.is_generated && self.cockroach => {
                Some(self.nextval(table, &column.name))
            }
            _ => None,
        }
    }

    fn nextval(&self, table: &Table, column: &str) -> String {
        format!("nextval({})", string_literal(&path(&Self::sequence_path(table, column))))
    }

    pub(super) fn column_definition(&self, table: &Table, column: &TableColumn) -> String {
        let declared = match serial_type(&column.column_type) {
            Some(serial) if column.is_increment() && !self.cockroach => serial.to_string(),
            _ => self.column_type(table, column),
        };
        let mut def = format!("{} {}", q(&column.name), declared);
        if let (Some(expr), Some(kind)) = (&column.as_expression, column.generated_type) {
            if self.cockroach {
                def.push_str(&format!(" AS ({}) {}", expr, kind.as_sql()));
            } else {
                def.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr));
            }
        }
        if !column.is_nullable {
            def.push_str(" NOT NULL");
        }
        if !column.is_computed() {
            if let Some(default) = column.default.clone().or_else(|| self.generated_default(table, column)) {
                def.push_str(&format!(" DEFAULT {}", default));
            }
        }
        if let Some(collation) = &column.collation {
            def.push_str(&format!(" COLLATE {}", q(collation)));
        }
        def
    }

    fn create_enum_sql(&self, table: &Table, column: &TableColumn) -> String {
        let values: Vec<String> = column.enum_values.iter().map(|v| string_literal(v)).collect();
        format!(
            "CREATE TYPE {} AS ENUM({})",
            path(&Self::enum_type_path(table, column)),
            values.join(", ")
        )
    }

    fn drop_enum_sql(&self, table: &Table, column: &TableColumn) -> String {
        format!("DROP TYPE {}", path(&Self::enum_type_path(table, column)))
    }

    fn comment_sql(&self, table: &Table, column: &str, comment: Option<&str>) -> String {
        format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            path(&table.path),
            q(column),
            comment.map(string_literal).unwrap_or_else(|| "NULL".to_string())
        )
    }

    // ====== Constraint clauses ======

    fn unique_clause(uq: &TableUnique) -> String {
        let mut sql = format!("UNIQUE ({})", column_list(&uq.column_names, QUOTE));
        if let Some(deferrable) = &uq.deferrable {
            sql.push_str(&format!(" DEFERRABLE {}", deferrable));
        }
        sql
    }

    fn foreign_key_clause(fk: &TableForeignKey) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            column_list(&fk.column_names, QUOTE),
            path(&TablePath::parse(&fk.referenced_table_name)),
            column_list(&fk.referenced_column_names, QUOTE)
        );
        sql.push_str(&format!(" ON DELETE {} ON UPDATE {}", fk.on_delete, fk.on_update));
        if let Some(deferrable) = &fk.deferrable {
            sql.push_str(&format!(" DEFERRABLE {}", deferrable));
        }
        sql
    }

    fn create_table_sql(&self, table: &Table, ctx: &DialectContext<'_>) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(table, c))
            .collect();
        for uq in &table.uniques {
            parts.push(format!(
                "CONSTRAINT {} {}",
                q(&Self::unique_name(table, uq, ctx)),
                Self::unique_clause(uq)
            ));
        }
        for chk in &table.checks {
            parts.push(format!(
                "CONSTRAINT {} CHECK ({})",
                q(&Self::check_name(table, chk, ctx)),
                chk.expression
            ));
        }
        for xcl in &table.exclusions {
            parts.push(format!(
                "CONSTRAINT {} EXCLUDE {}",
                q(&Self::exclusion_name(table, xcl, ctx)),
                xcl.expression
            ));
        }
        for fk in &table.foreign_keys {
            parts.push(format!(
                "CONSTRAINT {} {}",
                q(&Self::foreign_key_name(table, fk, ctx)),
                Self::foreign_key_clause(fk)
            ));
        }
        let primary = table.primary_column_names();
        if !primary.is_empty() {
            parts.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                q(&Self::pk_name(table, ctx)),
                column_list(&primary, QUOTE)
            ));
        }
        format!("CREATE TABLE {} ({})", path(&table.path), parts.join(", "))
    }

    fn create_index_sql(&self, table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> String {
        let mut sql = format!(
            "CREATE {}INDEX {} ON {}{} ({})",
            if index.is_unique { "UNIQUE " } else { "" },
            q(&Self::index_name(table, index, ctx)),
            path(&table.path),
            if index.is_spatial { " USING GiST" } else { "" },
            column_list(&index.column_names, QUOTE)
        );
        if let Some(predicate) = &index.where_clause {
            sql.push_str(&format!(" WHERE {}", predicate));
        }
        sql
    }

    fn drop_index_sql(&self, table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> String {
        let name = Self::index_name(table, index, ctx);
        format!("DROP INDEX {}", self.index_ref(table, &name))
    }

    fn alter_sql(&self, table: &Table, clause: impl AsRef<str>) -> String {
        format!("ALTER TABLE {} {}", path(&table.path), clause.as_ref())
    }

    fn drop_constraint(&self, table: &Table, name: &str) -> String {
        self.alter_sql(table, format!("DROP CONSTRAINT {}", q(name)))
    }

    fn unique_statements(&self, table: &Table, uq: &TableUnique, ctx: &DialectContext<'_>) -> Statements {
        let name = Self::unique_name(table, uq, ctx);
        let mut stmts = Statements::new();
        if self.caps.uniques_as_indices {
            stmts.pair(
                format!(
                    "CREATE UNIQUE INDEX {} ON {} ({})",
                    q(&name),
                    path(&table.path),
                    column_list(&uq.column_names, QUOTE)
                ),
                format!("DROP INDEX {} CASCADE", self.index_ref(table, &name)),
            );
        } else {
            stmts.pair(
                self.alter_sql(table, format!("ADD CONSTRAINT {} {}", q(&name), Self::unique_clause(uq))),
                self.drop_constraint(table, &name),
            );
        }
        stmts
    }

    fn check_statements(&self, table: &Table, chk: &TableCheck, ctx: &DialectContext<'_>) -> Statements {
        let name = Self::check_name(table, chk, ctx);
        let mut stmts = Statements::new();
        stmts.pair(
            self.alter_sql(table, format!("ADD CONSTRAINT {} CHECK ({})", q(&name), chk.expression)),
            self.drop_constraint(table, &name),
        );
        stmts
    }

    fn exclusion_statements(&self, table: &Table, xcl: &TableExclusion, ctx: &DialectContext<'_>) -> Statements {
        let name = Self::exclusion_name(table, xcl, ctx);
        let mut stmts = Statements::new();
        stmts.pair(
            self.alter_sql(table, format!("ADD CONSTRAINT {} EXCLUDE {}", q(&name), xcl.expression)),
            self.drop_constraint(table, &name),
        );
        stmts
    }

    fn foreign_key_statements(&self, table: &Table, fk: &TableForeignKey, ctx: &DialectContext<'_>) -> Statements {
        let name = Self::foreign_key_name(table, fk, ctx);
        let mut stmts = Statements::new();
        stmts.pair(
            self.alter_sql(table, format!("ADD CONSTRAINT {} {}", q(&name), Self::foreign_key_clause(fk))),
            self.drop_constraint(table, &name),
        );
        stmts
    }

    fn index_statements(&self, table: &Table, index: &TableIndex, ctx: &DialectContext<'_>) -> Statements {
        let mut stmts = Statements::new();
        stmts.pair(
            self.create_index_sql(table, index, ctx),
            self.drop_index_sql(table, index, ctx),
        );
        stmts
    }

    /// Drops the primary key of `before` and adds the one of `after`.
    fn primary_key_statements(&self, before: &Table, after: &Table, ctx: &DialectContext<'_>) -> Statements {
        let mut stmts = Statements::new();
        let old_columns = before.primary_column_names();
        let new_columns = after.primary_column_names();
        let old_name = Self::pk_name(before, ctx);
        let new_name = Self::pk_name(after, ctx);
        if old_columns == new_columns && old_name == new_name {
            return stmts;
        }
        if !old_columns.is_empty() {
            stmts.pair(
                self.drop_constraint(after, &old_name),
                self.alter_sql(
                    after,
                    format!("ADD CONSTRAINT {} PRIMARY KEY ({})", q(&old_name), column_list(&old_columns, QUOTE)),
                ),
            );
        }
        if !new_columns.is_empty() {
            stmts.pair(
                self.alter_sql(
                    after,
                    format!("ADD CONSTRAINT {} PRIMARY KEY ({})", q(&new_name), column_list(&new_columns, QUOTE)),
                ),
                self.drop_constraint(after, &new_name),
            );
        }
        stmts
    }

    /// Drops constraints that only `before` has, then creates those only `after` has.
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
        for chk in &before.checks {
            let name = Self::check_name(before, chk, ctx);
            if !after.checks.iter().any(|c| Self::check_name(after, c, ctx) == name) {
                stmts.append(self.check_statements(before, chk, ctx).inverse());
            }
        }
        for xcl in &before.exclusions {
            let name = Self::exclusion_name(before, xcl, ctx);
            if !after.exclusions.iter().any(|x| Self::exclusion_name(after, x, ctx) == name) {
                stmts.append(self.exclusion_statements(before, xcl, ctx).inverse());
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
        for chk in &after.checks {
            let name = Self::check_name(after, chk, ctx);
            if !before.checks.iter().any(|c| Self::check_name(before, c, ctx) == name) {
                stmts.append(self.check_statements(after, chk, ctx));
            }
        }
        for xcl in &after.exclusions {
            let name = Self::exclusion_name(after, xcl, ctx);
            if !before.exclusions.iter().any(|x| Self::exclusion_name(before, x, ctx) == name) {
                stmts.append(self.exclusion_statements(after, xcl, ctx));
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

    fn rename_statement(&self, table: &Table, rename: &ConstraintRename) -> Statements {
        let renamer = |from: &str, to: &str| match rename.kind {
            ObjectKind::Index => format!("ALTER INDEX {} RENAME TO {}", self.index_ref(table, from), q(to)),
            ObjectKind::Unique if self.caps.uniques_as_indices => {
                format!("ALTER INDEX {} RENAME TO {}", self.index_ref(table, from), q(to))
            }
            _ => self.alter_sql(table, format!("RENAME CONSTRAINT {} TO {}", q(from), q(to))),
        };
        let mut stmts = Statements::new();
        stmts.pair(
            renamer(&rename.old_name, &rename.new_name),
            renamer(&rename.new_name, &rename.old_name),
        );
        stmts
    }

    // ====== Table level ======

    fn check_table(&self, table: &Table) -> Result<()> {
        self.check_support(table)
    }

    pub(super) fn create(&self, table: &Table, ctx: &DialectContext<'_>) -> Result<Statements> {
        self.check_table(table)?;
        let mut stmts = Statements::new();
        for column in table.columns.iter().filter(|c| c.is_enum()) {
            stmts.pair(self.create_enum_sql(table, column), self.drop_enum_sql(table, column));
        }
        if self.cockroach {
            for column in table.columns.iter().filter(|c| c.is_increment()) {
                let seq = path(&Self::sequence_path(table, &column.name));
                stmts.pair(format!("CREATE SEQUENCE {}", seq), format!("DROP SEQUENCE {}", seq));
            }
        }
        stmts.pair(
            self.create_table_sql(table, ctx),
            format!("DROP TABLE {}", path(&table.path)),
        );
        for index in &table.indices {
            stmts.append(self.index_statements(table, index, ctx));
        }
        if let Some(comment) = &table.comment {
            stmts.pair(
                format!("COMMENT ON TABLE {} IS {}", path(&table.path), string_literal(comment)),
                format!("COMMENT ON TABLE {} IS NULL", path(&table.path)),
            );
        }
        for column in &table.columns {
            if let Some(comment) = &column.comment {
                stmts.pair(
                    self.comment_sql(table, &column.name, Some(comment)),
                    self.comment_sql(table, &column.name, None),
                );
            }
        }
        Ok(stmts)
    }

    pub(super) fn rename(
        &self,
        before: &Table,
        after: &Table,
        renames: &[ConstraintRename],
        _ctx: &DialectContext<'_>,
    ) -> Result<Statements> {
        let mut stmts = Statements::new();
        stmts.pair(
            format!("ALTER TABLE {} RENAME TO {}", path(&before.path), q(&after.path.name)),
            format!("ALTER TABLE {} RENAME TO {}", path(&after.path), q(&before.path.name)),
        );
        for column in after.columns.iter().filter(|c| c.is_enum()) {
            let old_type = Self::enum_type_path(before, column);
            let new_type = Self::enum_type_path(after, column);
            stmts.pair(
                format!("ALTER TYPE {} RENAME TO {}", path(&old_type), q(&new_type.name)),
                format!("ALTER TYPE {} RENAME TO {}", path(&new_type), q(&old_type.name)),
            );
        }
        for column in after.columns.iter().filter(|c| c.is_increment()) {
            let old_seq = Self::sequence_path(before, &column.name);
            let new_seq = Self::sequence_path(after, &column.name);
            stmts.pair(
                format!("ALTER SEQUENCE {} RENAME TO {}", path(&old_seq), q(&new_seq.name)),
                format!("ALTER SEQUENCE {} RENAME TO {}", path(&new_seq), q(&old_seq.name)),
            );
        }
        for rename in renames {
            stmts.append(self.rename_statement(after, rename));
        }
        Ok(stmts)
    }

    /// Adds `column` to `before`, producing `after`.
    fn add_column(
        &self,
        before: &Table,
        after: &Table,
        column: &TableColumn,
        ctx: &DialectContext<'_>,
    ) -> Result<Statements> {
        self.check_table(after)?;
        let mut stmts = Statements::new();
        if column.is_enum() {
            stmts.pair(self.create_enum_sql(after, column), self.drop_enum_sql(after, column));
        }
        if self.cockroach && column.is_increment() {
            let seq = path(&Self::sequence_path(after, &column.name));
            stmts.pair(format!("CREATE SEQUENCE {}", seq), format!("DROP SEQUENCE {}", seq));
        }
        stmts.pair(
            self.alter_sql(after, format!("ADD {}", self.column_definition(after, column))),
            self.alter_sql(after, format!("DROP COLUMN {}", q(&column.name))),
        );
        if column.is_primary {
            stmts.append(self.primary_key_statements(before, after, ctx));
        }
        stmts.append(self.constraint_statements(before, after, ctx));
        if let Some(comment) = &column.comment {
            stmts.pair(
                self.comment_sql(after, &column.name, Some(comment)),
                self.comment_sql(after, &column.name, None),
            );
        }
        Ok(stmts)
    }

    fn rename_column(
        &self,
        after: &Table,
        old: &TableColumn,
        new: &TableColumn,
        renames: &[ConstraintRename],
    ) -> Statements {
        let mut stmts = Statements::new();
        stmts.pair(
            self.alter_sql(after, format!("RENAME COLUMN {} TO {}", q(&old.name), q(&new.name))),
            self.alter_sql(after, format!("RENAME COLUMN {} TO {}", q(&new.name), q(&old.name))),
        );
        if old.is_enum() {
            let old_type = Self::enum_type_path(after, old);
            let new_type = Self::enum_type_path(after, new);
            stmts.pair(
                format!("ALTER TYPE {} RENAME TO {}", path(&old_type), q(&new_type.name)),
                format!("ALTER TYPE {} RENAME TO {}", path(&new_type), q(&old_type.name)),
            );
        }
        if old.is_increment() {
            let old_seq = Self::sequence_path(after, &old.name);
            let new_seq = Self::sequence_path(after, &new.name);
            stmts.pair(
                format!("ALTER SEQUENCE {} RENAME TO {}", path(&old_seq), q(&new_seq.name)),
                format!("ALTER SEQUENCE {} RENAME TO {}", path(&new_seq), q(&old_seq.name)),
            );
            if self.cockroach {
                let column = q(&new.name);
                stmts.pair(
                    self.alter_sql(after, format!("ALTER COLUMN {} SET DEFAULT {}", column, self.nextval(after, &new.name))),
                    self.alter_sql(after, format!("ALTER COLUMN {} SET DEFAULT {}", column, self.nextval(after, &old.name))),
                );
            }
        }
        for rename in renames {
            stmts.append(self.rename_statement(after, rename));
        }
        stmts
    }

    fn set_type(&self, table: &Table, column: &str, data_type: &str, via_text: bool) -> String {
        let column = q(column);
        if via_text {
            self.alter_sql(
                table,
                format!("ALTER COLUMN {} TYPE {} USING {}::text::{}", column, data_type, column, data_type),
            )
        } else {
            self.alter_sql(table, format!("ALTER COLUMN {} TYPE {}", column, data_type))
        }
    }

    /// Type changes, including enum value changes through a renamed old type.
    fn type_statements(&self, before: &Table, after: &Table, old: &TableColumn, new: &TableColumn) -> Statements {
        let mut stmts = Statements::new();
        let old_type = self.column_type(before, old);
        let new_type = self.column_type(after, new);

        match (old.is_enum(), new.is_enum()) {
            (true, true) if old.enum_values != new.enum_values => {
                let current = Self::enum_type_path(after, new);
                let legacy = current.renamed(format!("{}_old", current.name));
                stmts.pair(
                    format!("ALTER TYPE {} RENAME TO {}", path(&current), q(&legacy.name)),
                    format!("ALTER TYPE {} RENAME TO {}", path(&legacy), q(&current.name)),
                );
                stmts.pair(self.create_enum_sql(after, new), self.drop_enum_sql(after, new));
                stmts.pair(
                    self.set_type(after, &new.name, &path(&current), true),
                    self.set_type(after, &new.name, &path(&legacy), true),
                );
                let values: Vec<String> = old.enum_values.iter().map(|v| string_literal(v)).collect();
                stmts.pair(
                    format!("DROP TYPE {}", path(&legacy)),
                    format!("CREATE TYPE {} AS ENUM({})", path(&legacy), values.join(", ")),
                );
            }
            (true, false) => {
                stmts.pair(
                    self.set_type(after, &new.name, &new_type, true),
                    self.set_type(after, &new.name, &old_type, true),
                );
                stmts.append(
                    {
                        let mut created = Statements::new();
                        created.pair(self.create_enum_sql(before, old), self.drop_enum_sql(before, old));
                        created
                    }
                    .inverse(),
                );
            }
            (false, true) => {
                stmts.pair(self.create_enum_sql(after, new), self.drop_enum_sql(after, new));
                stmts.pair(
                    self.set_type(after, &new.name, &new_type, true),
                    self.set_type(after, &new.name, &old_type, true),
                );
            }
            _ if old_type != new_type => {
                stmts.pair(
                    self.set_type(after, &new.name, &new_type, false),
                    self.set_type(after, &new.name, &old_type, false),
                );
            }
            _ => {}
        }
        stmts
    }

    fn generation_statements(&self, after: &Table, old: &TableColumn, new: &TableColumn) -> Statements {
        let mut stmts = Statements::new();
        let column = q(&new.name);
        let set_default = |expr: &str| self.alter_sql(after, format!("ALTER COLUMN {} SET DEFAULT {}", column, expr));
        let drop_default = self.alter_sql(after, format!("ALTER COLUMN {} DROP DEFAULT", column));

        if old.is_increment() != new.is_increment() {
            let seq = path(&Self::sequence_path(after, &new.name));
            let mut added = Statements::new();
            added.pair(
                format!("CREATE SEQUENCE IF NOT EXISTS {} OWNED BY {}.{}", seq, path(&after.path), column),
                format!("DROP SEQUENCE {}", seq),
            );
            added.pair(set_default(&self.nextval(after, &new.name)), drop_default.clone());
            stmts.append(if new.is_increment() { added } else { added.inverse() });
        }

        let generated = |c: &TableColumn| match c.generation_strategy {
            Some(GenerationStrategy::Uuid) | Some(GenerationStrategy::Rowid) if c.is_generated => {
                self.generated_default(after, c)
            }
            _ => None,
        };
        match (generated(old), generated(new)) {
            (None, Some(expr)) => stmts.pair(set_default(&expr), drop_default.clone()),
            (Some(expr), None) => stmts.pair(drop_default.clone(), set_default(&expr)),
            (Some(a), Some(b)) if a != b => stmts.pair(set_default(&b), set_default(&a)),
            _ => {}
        }
        stmts
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
        if old.name != new.name {
            let mut renamed = old.clone();
            renamed.name = new.name.clone();
            stmts.append(self.rename_column(after, old, &renamed, &[]));
        }
        stmts.append(self.type_statements(before, after, old, new));

        let column = q(&new.name);
        if old.is_nullable != new.is_nullable {
            let set = self.alter_sql(after, format!("ALTER COLUMN {} SET NOT NULL", column));
            let drop = self.alter_sql(after, format!("ALTER COLUMN {} DROP NOT NULL", column));
            if new.is_nullable {
                stmts.pair(drop, set);
            } else {
                stmts.pair(set, drop);
            }
        }
        if old.default != new.default {
            let apply = |d: &Option<String>| match d {
                Some(expr) => self.alter_sql(after, format!("ALTER COLUMN {} SET DEFAULT {}", column, expr)),
                None => self.alter_sql(after, format!("ALTER COLUMN {} DROP DEFAULT", column)),
            };
            stmts.pair(apply(&new.default), apply(&old.default));
        }
        stmts.append(self.generation_statements(after, old, new));
        if old.comment != new.comment {
            stmts.pair(
                self.comment_sql(after, &new.name, new.comment.as_deref()),
                self.comment_sql(after, &new.name, old.comment.as_deref()),
            );
        }
        if old.is_primary != new.is_primary {
            stmts.append(self.primary_key_statements(before, after, ctx));
        }
        stmts.append(self.constraint_statements(before, after, ctx));
        Ok(stmts)
    }

    pub(super) fn alter(&self, change: &AlterTable<'_>, ctx: &DialectContext<'_>) -> Result<Statements> {
        let AlterTable { before, after, op } = *change;
        match op {
            AlterOp::AddColumn(column) => self.add_column(before, after, column, ctx),
            AlterOp::DropColumn(column) => Ok(self.add_column(after, before, column, ctx)?.inverse()),
            AlterOp::RenameColumn { old, new, renames } => Ok(self.rename_column(after, old, new, renames)),
            AlterOp::ChangeColumn { old, new } => self.change_column(before, after, old, new, ctx),
            AlterOp::UpdatePrimaryKey => Ok(self.primary_key_statements(before, after, ctx)),
            AlterOp::CreateUnique(uq) => Ok(self.unique_statements(after, uq, ctx)),
            AlterOp::DropUnique(uq) => Ok(self.unique_statements(before, uq, ctx).inverse()),
            AlterOp::CreateCheck(chk) => {
                self.check_table(after)?;
                Ok(self.check_statements(after, chk, ctx))
            }
            AlterOp::DropCheck(chk) => Ok(self.check_statements(before, chk, ctx).inverse()),
            AlterOp::CreateExclusion(xcl) => {
                self.check_table(after)?;
                Ok(self.exclusion_statements(after, xcl, ctx))
            }
            AlterOp::DropExclusion(xcl) => {
                self.check_table(after)?;
                Ok(self.exclusion_statements(before, xcl, ctx).inverse())
            }
            AlterOp::CreateForeignKey(fk) => Ok(self.foreign_key_statements(after, fk, ctx)),
            AlterOp::DropForeignKey(fk) => Ok(self.foreign_key_statements(before, fk, ctx).inverse()),
            AlterOp::CreateIndex(index) => Ok(self.index_statements(after, index, ctx)),
            AlterOp::DropIndex(index) => Ok(self.index_statements(before, index, ctx).inverse()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{DefaultNamingStrategy, NamingStrategy};
    use crate::schema::TableUnique;

    fn ctx(naming: &DefaultNamingStrategy) -> DialectContext<'_> {
        DialectContext {
            naming,
            database: None,
            schema: Some("public"),
            metadata_table: "typeorm_metadata",
        }
    }

    fn posts() -> Table {
        let mut t = Table::new(TablePath::with_schema("public", "posts"))
            .column(
                TableColumn::new("id", "integer")
                    .primary()
                    .generated(GenerationStrategy::Increment),
            )
            .column(TableColumn::new("status", "varchar").enum_values(["draft", "live"]))
            .column(TableColumn::new("title", "character varying").length(80).comment("headline"));
        t.normalize(&DefaultNamingStrategy);
        t
    }

    #[test]
    fn test_create_table_with_enum_serial_and_comment() {
        let naming = DefaultNamingStrategy;
        let table = posts();
        let stmts = PostgresDialect::postgres().create(&table, &ctx(&naming)).unwrap();
        let up: Vec<&str> = stmts.up.iter().map(|q| q.sql.as_str()).collect();
        assert_eq!(up[0], "CREATE TYPE \"public\".\"posts_status_enum\" AS ENUM('draft', 'live')");
        assert!(up[1].starts_with("CREATE TABLE \"public\".\"posts\" (\"id\" serial NOT NULL, "));
        assert!(up[1].contains("\"status\" \"public\".\"posts_status_enum\" NOT NULL"));
        assert!(up[1].contains("\"title\" character varying(80) NOT NULL"));
        assert_eq!(up[2], "COMMENT ON COLUMN \"public\".\"posts\".\"title\" IS 'headline'");
        assert_eq!(stmts.down[0].sql, "DROP TYPE \"public\".\"posts_status_enum\"");
    }

    #[test]
    fn test_cockroach_increment_uses_sequence() {
        let naming = DefaultNamingStrategy;
        let stmts = PostgresDialect::cockroach().create(&posts(), &ctx(&naming)).unwrap();
        assert_eq!(stmts.up[1].sql, "CREATE SEQUENCE \"public\".\"posts_id_seq\"");
        assert!(stmts.up[2]
            .sql
            .contains("\"id\" integer NOT NULL DEFAULT nextval('\"public\".\"posts_id_seq\"')"));
    }

    #[test]
    fn test_precision_goes_before_time_zone() {
        assert_eq!(with_arguments("timestamp with time zone", "3"), "timestamp(3) with time zone");
        assert_eq!(with_arguments("numeric", "10,2"), "numeric(10,2)");
    }

    #[test]
    fn test_unique_constraint_vs_unique_index() {
        let naming = DefaultNamingStrategy;
        let before = posts();
        let mut after = before.clone();
        let uq = TableUnique::new(["title"]).named("UQ_title");
        after.add_unique(uq.clone());
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::CreateUnique(&uq),
        };

        let pg = PostgresDialect::postgres().alter(&change, &ctx(&naming)).unwrap();
        assert_eq!(
            pg.up[0].sql,
            "ALTER TABLE \"public\".\"posts\" ADD CONSTRAINT \"UQ_title\" UNIQUE (\"title\")"
        );
        assert_eq!(pg.down[0].sql, "ALTER TABLE \"public\".\"posts\" DROP CONSTRAINT \"UQ_title\"");

        let crdb = PostgresDialect::cockroach().alter(&change, &ctx(&naming)).unwrap();
        assert_eq!(
            crdb.up[0].sql,
            "CREATE UNIQUE INDEX \"UQ_title\" ON \"public\".\"posts\" (\"title\")"
        );
        assert_eq!(crdb.down[0].sql, "DROP INDEX \"public\".\"posts\"@\"UQ_title\" CASCADE");
    }

    #[test]
    fn test_rename_column_renames_constraints() {
        let naming = DefaultNamingStrategy;
        let mut before = Table::new(TablePath::with_schema("public", "t"))
            .column(TableColumn::new("a", "integer"))
            .column(TableColumn::new("c", "integer"))
            .unique(TableUnique::new(["a", "c"]));
        before.normalize(&naming);
        let mut after = before.clone();
        let renames = after.rename_column("a", "b", &naming).unwrap();
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::RenameColumn {
                old: before.find_column("a").unwrap(),
                new: after.find_column("b").unwrap(),
                renames: &renames,
            },
        };
        let stmts = PostgresDialect::postgres().alter(&change, &ctx(&naming)).unwrap();
        let old_uq = naming.unique_constraint_name("t", &["a".into(), "c".into()]);
        let new_uq = naming.unique_constraint_name("t", &["b".into(), "c".into()]);
        assert_eq!(stmts.up[0].sql, "ALTER TABLE \"public\".\"t\" RENAME COLUMN \"a\" TO \"b\"");
        assert_eq!(
            stmts.up[1].sql,
            format!("ALTER TABLE \"public\".\"t\" RENAME CONSTRAINT \"{}\" TO \"{}\"", old_uq, new_uq)
        );
        assert_eq!(
            stmts.down[1].sql,
            format!("ALTER TABLE \"public\".\"t\" RENAME CONSTRAINT \"{}\" TO \"{}\"", new_uq, old_uq)
        );
    }

    #[test]
    fn test_primary_key_change_drops_then_adds() {
        let naming = DefaultNamingStrategy;
        let before = posts();
        let mut after = before.clone();
        after.set_primary_columns(&["id".to_string(), "title".to_string()]);
        after.primary_key_name = None;
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::UpdatePrimaryKey,
        };
        let stmts = PostgresDialect::postgres().alter(&change, &ctx(&naming)).unwrap();
        let old_pk = naming.primary_key_name("posts", &["id".into()]);
        let new_pk = naming.primary_key_name("posts", &["id".into(), "title".into()]);
        assert_eq!(stmts.up[0].sql, format!("ALTER TABLE \"public\".\"posts\" DROP CONSTRAINT \"{}\"", old_pk));
        assert_eq!(
            stmts.up[1].sql,
            format!("ALTER TABLE \"public\".\"posts\" ADD CONSTRAINT \"{}\" PRIMARY KEY (\"id\", \"title\")", new_pk)
        );
    }

    #[test]
    fn test_enum_value_change_round_trips_through_old_type() {
        let naming = DefaultNamingStrategy;
        let before = posts();
        let mut after = before.clone();
        let old = before.find_column("status").unwrap().clone();
        let new = old.clone().enum_values(["draft", "live", "archived"]);
        after.replace_column("status", new.clone());
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::ChangeColumn { old: &old, new: &new },
        };
        let stmts = PostgresDialect::postgres().alter(&change, &ctx(&naming)).unwrap();
        let up: Vec<&str> = stmts.up.iter().map(|q| q.sql.as_str()).collect();
        assert_eq!(
            up[0],
            "ALTER TYPE \"public\".\"posts_status_enum\" RENAME TO \"posts_status_enum_old\""
        );
        assert!(up[1].starts_with("CREATE TYPE \"public\".\"posts_status_enum\" AS ENUM('draft', 'live', 'archived')"));
        assert!(up[2].ends_with("USING \"status\"::text::\"public\".\"posts_status_enum\""));
        assert_eq!(up[3], "DROP TYPE \"public\".\"posts_status_enum_old\"");
        assert_eq!(stmts.down.len(), 4);
    }

    #[test]
    fn test_drop_column_restores_its_unique() {
        let naming = DefaultNamingStrategy;
        let mut before = posts();
        before.add_unique(TableUnique::new(["title"]).named("UQ_title"));
        let mut after = before.clone();
        after.remove_column("title");
        let column = before.find_column("title").unwrap().clone();
        let change = AlterTable {
            before: &before,
            after: &after,
            op: AlterOp::DropColumn(&column),
        };
        let stmts = PostgresDialect::postgres().alter(&change, &ctx(&naming)).unwrap();
        let up: Vec<&str> = stmts.up.iter().map(|q| q.sql.as_str()).collect();
        assert_eq!(up[0], "COMMENT ON COLUMN \"public\".\"posts\".\"title\" IS NULL");
        assert_eq!(up[1], "ALTER TABLE \"public\".\"posts\" DROP CONSTRAINT \"UQ_title\"");
        assert_eq!(up[2], "ALTER TABLE \"public\".\"posts\" DROP COLUMN \"title\"");
        // Executed back to front, the column comes back before its constraint.
        let down: Vec<&str> = stmts.down.iter().rev().map(|q| q.sql.as_str()).collect();
        assert!(down[0].starts_with("ALTER TABLE \"public\".\"posts\" ADD \"title\""));
        assert!(down[1].contains("ADD CONSTRAINT \"UQ_title\" UNIQUE"));
    }

    #[test]
    fn test_exclusion_rejected_on_cockroach() {
        let naming = DefaultNamingStrategy;
        let table = posts().exclusion(TableExclusion::new("USING gist (\"title\" WITH =)"));
        let err = PostgresDialect::cockroach().create(&table, &ctx(&naming)).unwrap_err();
        assert!(matches!(err, crate::RunnerError::UnsupportedOperation { .. }));
        assert!(PostgresDialect::postgres().create(&table, &ctx(&naming)).is_ok());
    }
}
