//! PostgreSQL and CockroachDB catalog introspection.
//!
//! Columns come from `information_schema.columns`; constraints, foreign keys
//! and indices from `pg_catalog`, which also covers names and predicates
//! that information_schema does not expose.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dialect::sql::{balanced_parens, unquote};
use crate::dialect::{CatalogReader, DialectContext, DialectStrategy};
use crate::driver::Row;
use crate::error::Result;
use crate::schema::{
    GeneratedType, GenerationStrategy, ReferentialAction, Table, TableCheck, TableColumn, TableExclusion,
    TableForeignKey, TableIndex, TablePath, TableUnique,
};
use crate::statement::Value;

use super::PostgresDialect;

/// `'draft'::character varying` -> `'draft'`.
static CAST_LITERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^\(?('(?:[^']|'')*')\)?::[\w\s."\[\]]+$"#).unwrap());

/// `(-1)::integer` or `0::bigint` -> the bare number.
static CAST_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\(?(-?[\d.]+)\)?::[\w\s]+$").unwrap());

const TABLE_SQL: &str = r#"SELECT c.relname::text AS "table_name", obj_description(c.oid, 'pg_class')::text AS "comment"
FROM pg_class c
JOIN pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p') AND n.nspname = $1 AND c.relname = $2"#;

const COLUMNS_SQL: &str = r#"SELECT c.column_name::text AS "column_name", c.data_type::text AS "data_type",
       c.udt_name::text AS "udt_name", c.udt_schema::text AS "udt_schema",
       c.is_nullable::text AS "is_nullable", c.column_default::text AS "column_default",
       c.character_maximum_length::int4 AS "length", c.numeric_precision::int4 AS "numeric_precision",
       c.numeric_scale::int4 AS "numeric_scale", c.datetime_precision::int4 AS "datetime_precision",
       c.is_generated::text AS "is_generated", c.generation_expression::text AS "generation_expression",
       c.is_identity::text AS "is_identity", c.collation_name::text AS "collation_name",
       col_description(format('%I.%I', c.table_schema, c.table_name)::regclass::oid, c.ordinal_position::int)::text AS "comment"
FROM information_schema.columns c
WHERE c.table_schema = $1 AND c.table_name = $2
ORDER BY c.ordinal_position"#;

const ENUM_SQL: &str = r#"SELECT e.enumlabel::text AS "value"
FROM pg_enum e
JOIN pg_type t ON t.oid = e.enumtypid
JOIN pg_namespace n ON n.oid = t.typnamespace
WHERE n.nspname = $1 AND t.typname = $2
ORDER BY e.enumsortorder"#;

const CONSTRAINTS_SQL: &str = r#"SELECT con.conname::text AS "constraint_name", con.contype::text AS "constraint_type",
       a.attname::text AS "column_name", pg_get_constraintdef(con.oid)::text AS "definition",
       con.condeferrable AS "deferrable", con.condeferred AS "deferred"
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
LEFT JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = ANY(con.conkey)
WHERE n.nspname = $1 AND c.relname = $2 AND con.contype IN ('p', 'u', 'c', 'x')
ORDER BY con.conname, array_position(con.conkey, a.attnum)"#;

const FOREIGN_KEYS_SQL: &str = r#"SELECT con.conname::text AS "constraint_name", a.attname::text AS "column_name",
       rn.nspname::text AS "referenced_schema", rc.relname::text AS "referenced_table",
       ra.attname::text AS "referenced_column",
       con.confdeltype::text AS "on_delete", con.confupdtype::text AS "on_update",
       con.condeferrable AS "deferrable", con.condeferred AS "deferred"
FROM pg_constraint con
JOIN pg_class c ON c.oid = con.conrelid
JOIN pg_namespace n ON n.oid = c.relnamespace
JOIN pg_class rc ON rc.oid = con.confrelid
JOIN pg_namespace rn ON rn.oid = rc.relnamespace
JOIN LATERAL unnest(con.conkey, con.confkey) WITH ORDINALITY AS k(attnum, refnum, ord) ON true
JOIN pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
JOIN pg_attribute ra ON ra.attrelid = con.confrelid AND ra.attnum = k.refnum
WHERE con.contype = 'f' AND n.nspname = $1 AND c.relname = $2
ORDER BY con.conname, k.ord"#;

const INDICES_SQL: &str = r#"SELECT i.relname::text AS "index_name", a.attname::text AS "column_name",
       ix.indisunique AS "is_unique", am.amname::text AS "index_type",
       pg_get_expr(ix.indpred, ix.indrelid)::text AS "condition"
FROM pg_class t
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_index ix ON ix.indrelid = t.oid
JOIN pg_class i ON i.oid = ix.indexrelid
JOIN pg_am am ON am.oid = i.relam
JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord) ON true
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
LEFT JOIN pg_constraint con ON con.conindid = ix.indexrelid AND con.contype IN ('p', 'u', 'x')
WHERE n.nspname = $1 AND t.relname = $2 AND NOT ix.indisprimary AND con.oid IS NULL
ORDER BY i.relname, k.ord"#;

/// Strips type casts PostgreSQL adds to stored defaults.
fn normalize_default(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(caps) = CAST_LITERAL.captures(trimmed) {
        return caps[1].to_string();
    }
    if let Some(caps) = CAST_NUMBER.captures(trimmed) {
        return caps[1].to_string();
    }
    trimmed.to_string()
}

/// `DEFERRABLE INITIALLY ...` clause from the catalog flags.
fn deferrable_clause(row: &Row) -> Option<String> {
    if !row.get_bool("deferrable") {
        return None;
    }
    Some(if row.get_bool("deferred") {
        "INITIALLY DEFERRED".to_string()
    } else {
        "INITIALLY IMMEDIATE".to_string()
    })
}

/// Body of `CHECK ((a > 0))` as reported by `pg_get_constraintdef`.
fn check_expression(definition: &str) -> String {
    let body = definition.trim();
    let body = body.strip_prefix("CHECK").unwrap_or(body).trim_start();
    let body = balanced_parens(body, 0).unwrap_or(body);
    body.strip_suffix(" NOT VALID").unwrap_or(body).to_string()
}

fn exclusion_expression(definition: &str) -> String {
    let body = definition.trim();
    body.strip_prefix("EXCLUDE ").unwrap_or(body).to_string()
}

impl PostgresDialect {
    async fn schema_or_current(&self, reader: &mut dyn CatalogReader, ctx: &DialectContext<'_>) -> Result<String> {
        if let Some(schema) = ctx.schema {
            return Ok(schema.to_string());
        }
        Ok(self
            .current_schema(reader)
            .await?
            .unwrap_or_else(|| "public".to_string()))
    }

    pub(super) async fn table_names(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<TablePath>> {
        let schema = self.schema_or_current(reader, ctx).await?;
        let rows = reader
            .fetch(
                "SELECT table_name::text AS \"table_name\" FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE' ORDER BY table_name",
                vec![Value::from(schema.as_str())],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get_string("table_name"))
            .filter(|name| name != ctx.metadata_table)
            .map(|name| TablePath::with_schema(schema.clone(), name))
            .collect())
    }

    pub(super) async fn introspect(
        &self,
        reader: &mut dyn CatalogReader,
        paths: &[TablePath],
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<Table>> {
        let default_schema = self.schema_or_current(reader, ctx).await?;
        let mut tables = Vec::with_capacity(paths.len());
        for path in paths {
            let schema = path.schema.clone().unwrap_or_else(|| default_schema.clone());
            let qualified = TablePath {
                database: path.database.clone(),
                schema: Some(schema),
                name: path.name.clone(),
            };
            if let Some(mut table) = self.load_table(reader, &qualified).await? {
                table.normalize(ctx.naming);
                tables.push(table);
            }
        }
        Ok(tables)
    }

    fn params(path: &TablePath) -> Vec<Value> {
        vec![
            Value::from(path.schema.clone().unwrap_or_default()),
            Value::from(path.name.as_str()),
        ]
    }

    async fn load_table(&self, reader: &mut dyn CatalogReader, path: &TablePath) -> Result<Option<Table>> {
        let found = reader.fetch(TABLE_SQL, Self::params(path)).await?;
        let Some(head) = found.first() else {
            return Ok(None);
        };
        let mut table = Table::new(path.clone());
        table.comment = head.get_string("comment");

        let rows = reader.fetch(COLUMNS_SQL, Self::params(path)).await?;
        for row in &rows {
            let column = self.column_from_row(reader, row).await?;
            table.add_column(column);
        }

        self.load_constraints(reader, &mut table).await?;
        self.load_foreign_keys(reader, &mut table).await?;
        self.load_indices(reader, &mut table).await?;
        Ok(Some(table))
    }

    async fn column_from_row(&self, reader: &mut dyn CatalogReader, row: &Row) -> Result<TableColumn> {
        let name = row.get_string("column_name").unwrap_or_default();
        let data_type = row.get_string("data_type").unwrap_or_default();
        let udt_name = row.get_string("udt_name").unwrap_or_default();
        let mut column = TableColumn::new(name, data_type.to_ascii_lowercase());
        column.is_nullable = row.get_string("is_nullable").as_deref() == Some("YES");
        column.comment = row.get_string("comment");
        column.collation = row.get_string("collation_name");

        if data_type == "USER-DEFINED" {
            let udt_schema = row.get_string("udt_schema").unwrap_or_default();
            let values = reader
                .fetch(ENUM_SQL, vec![Value::from(udt_schema), Value::from(udt_name.as_str())])
                .await?;
            let labels: Vec<String> = values.iter().filter_map(|r| r.get_string("value")).collect();
            if labels.is_empty() {
                column.column_type = udt_name;
            } else {
                column = column.enum_values(labels);
            }
        } else if data_type == "ARRAY" {
            column.column_type = udt_name;
        }

        let kind = column.column_type.clone();
        column.length = self
            .caps
            .normalize_length(&kind, row.get_i64("length").map(|l| l as u32));
        let precision = if kind.starts_with("time") || kind == "interval" {
            row.get_i64("datetime_precision")
        } else {
            row.get_i64("numeric_precision")
        };
        let (precision, scale) = self.caps.normalize_precision(
            &kind,
            precision.map(|p| p as u32),
            row.get_i64("numeric_scale").map(|s| s as u32),
        );
        column.precision = precision;
        column.scale = scale;

        if row.get_string("is_generated").as_deref() == Some("ALWAYS") {
            if let Some(expr) = row.get_string("generation_expression").filter(|e| !e.is_empty()) {
                column.as_expression = Some(expr);
                column.generated_type = Some(GeneratedType::Stored);
            }
        }

        let default = row.get_string("column_default");
        match default.as_deref() {
            Some(d) if d.starts_with("nextval(") => {
                column.is_generated = true;
                column.generation_strategy = Some(GenerationStrategy::Increment);
            }
            Some(d) if d == "gen_random_uuid()" || d == "uuid_generate_v4()" => {
                column.is_generated = true;
                column.generation_strategy = Some(GenerationStrategy::Uuid);
            }
            Some(d) if d == "unique_rowid()" => {
                column.is_generated = true;
                column.generation_strategy = Some(GenerationStrategy::Rowid);
            }
            Some(d) if !column.is_computed() => column.default = Some(normalize_default(d)),
            _ => {}
        }
        if row.get_string("is_identity").as_deref() == Some("YES") {
            column.is_generated = true;
            column.generation_strategy = Some(GenerationStrategy::Increment);
        }
        Ok(column)
    }

    async fn load_constraints(&self, reader: &mut dyn CatalogReader, table: &mut Table) -> Result<()> {
        let rows = reader.fetch(CONSTRAINTS_SQL, Self::params(&table.path)).await?;
        let mut grouped: BTreeMap<String, (String, Vec<String>, Row)> = BTreeMap::new();
        for row in rows {
            let Some(name) = row.get_string("constraint_name") else {
                continue;
            };
            let kind = row.get_string("constraint_type").unwrap_or_default();
            let column = row.get_string("column_name");
            let entry = grouped
                .entry(name)
                .or_insert_with(|| (kind, Vec::new(), row.clone()));
            if let Some(column) = column {
                if !entry.1.contains(&column) {
                    entry.1.push(column);
                }
            }
        }

        for (name, (kind, columns, row)) in grouped {
            match kind.as_str() {
                "p" => {
                    table.set_primary_columns(&columns);
                    table.primary_key_name = Some(name);
                }
                "u" => {
                    let mut uq = TableUnique::new(columns).named(name);
                    uq.deferrable = deferrable_clause(&row);
                    table.add_unique(uq);
                }
                "c" => {
                    let definition = row.get_string("definition").unwrap_or_default();
                    let mut chk = TableCheck::new(check_expression(&definition)).named(name);
                    chk.column_names = columns;
                    table.add_check(chk);
                }
                "x" => {
                    let definition = row.get_string("definition").unwrap_or_default();
                    table.add_exclusion(TableExclusion::new(exclusion_expression(&definition)).named(name));
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn load_foreign_keys(&self, reader: &mut dyn CatalogReader, table: &mut Table) -> Result<()> {
        let rows = reader.fetch(FOREIGN_KEYS_SQL, Self::params(&table.path)).await?;
        let own_schema = table.path.schema.clone();
        let mut grouped: BTreeMap<String, TableForeignKey> = BTreeMap::new();
        for row in rows {
            let Some(name) = row.get_string("constraint_name") else {
                continue;
            };
            let column = row.get_string("column_name").unwrap_or_default();
            let referenced = row.get_string("referenced_column").unwrap_or_default();
            let fk = grouped.entry(name.clone()).or_insert_with(|| {
                let ref_schema = row.get_string("referenced_schema");
                let ref_table = row.get_string("referenced_table").unwrap_or_default();
                let target = if ref_schema == own_schema {
                    ref_table
                } else {
                    format!("{}.{}", ref_schema.unwrap_or_default(), ref_table)
                };
                let mut fk = TableForeignKey::new(Vec::<String>::new(), target, Vec::<String>::new())
                    .named(name)
                    .on_delete(ReferentialAction::from_pg_code(
                        &row.get_string("on_delete").unwrap_or_default(),
                    ))
                    .on_update(ReferentialAction::from_pg_code(
                        &row.get_string("on_update").unwrap_or_default(),
                    ));
                fk.deferrable = deferrable_clause(&row);
                fk
            });
            fk.column_names.push(column);
            fk.referenced_column_names.push(referenced);
        }
        for fk in grouped.into_values() {
            table.add_foreign_key(fk);
        }
        Ok(())
    }

    async fn load_indices(&self, reader: &mut dyn CatalogReader, table: &mut Table) -> Result<()> {
        let rows = reader.fetch(INDICES_SQL, Self::params(&table.path)).await?;
        let mut grouped: BTreeMap<String, TableIndex> = BTreeMap::new();
        for row in rows {
            let Some(name) = row.get_string("index_name") else {
                continue;
            };
            let column = row.get_string("column_name").unwrap_or_default();
            let index = grouped.entry(name.clone()).or_insert_with(|| {
                let mut index = TableIndex::new(Vec::<String>::new()).named(name);
                index.is_unique = row.get_bool("is_unique");
                index.is_spatial = row
                    .get_string("index_type")
                    .map(|t| t.eq_ignore_ascii_case("gist"))
                    .unwrap_or(false);
                index.where_clause = row.get_string("condition");
                index
            });
            index.column_names.push(unquote(&column));
        }

        for (name, index) in grouped {
            // Unique constraints added as unique indices carry a non-IDX name.
            if self.caps.uniques_as_indices && index.is_unique && !name.starts_with("IDX_") && index.where_clause.is_none() {
                table.add_unique(TableUnique::new(index.column_names).named(name));
            } else {
                table.add_index(index);
            }
        }
        Ok(())
    }

    /// Statements dropping every view, table and enum type in the schema.
    pub(super) async fn drop_everything(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<String>> {
        let schema = self.schema_or_current(reader, ctx).await?;
        let param = || vec![Value::from(schema.as_str())];
        let mut statements = Vec::new();

        let queries: [(&str, &str); 4] = [
            (
                "SELECT matviewname::text AS \"name\" FROM pg_matviews WHERE schemaname = $1",
                "MATERIALIZED VIEW",
            ),
            (
                "SELECT table_name::text AS \"name\" FROM information_schema.views WHERE table_schema = $1",
                "VIEW",
            ),
            (
                "SELECT table_name::text AS \"name\" FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
                "TABLE",
            ),
            (
                "SELECT t.typname::text AS \"name\" FROM pg_type t \
                 JOIN pg_namespace n ON n.oid = t.typnamespace WHERE t.typtype = 'e' AND n.nspname = $1",
                "TYPE",
            ),
        ];
        for (sql, keyword) in queries {
            let rows = reader.fetch(sql, param()).await?;
            for name in rows.iter().filter_map(|r| r.get_string("name")) {
                let target = self.escape_path(&TablePath::with_schema(schema.clone(), name));
                statements.push(format!("DROP {} IF EXISTS {} CASCADE", keyword, target));
            }
        }
        Ok(statements)
    }
}
