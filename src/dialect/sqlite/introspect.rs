//! SQLite catalog reader: `sqlite_master` plus the `PRAGMA` table functions.
//!
//! Constraint names and computed expressions are not exposed by any pragma,
//! so they are recovered from the stored `CREATE TABLE` text.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dialect::sql::{balanced_parens, parse_type, quote_ident, split_top_level, unquote};
use crate::dialect::{CatalogReader, DialectContext};
use crate::driver::Row;
use crate::error::Result;
use crate::schema::{
    GeneratedType, GenerationStrategy, ReferentialAction, Table, TableCheck, TableColumn,
    TableForeignKey, TableIndex, TablePath, TableUnique,
};
use crate::statement::Value;

use super::SqliteDialect;

static NAMED_CONSTRAINT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^CONSTRAINT\s+("(?:[^"]|"")+"|`[^`]+`|\S+)\s+(.*)$"#).unwrap());
static COMPUTED: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bAS\s*\(").unwrap());
static ENUM_CHECK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)^\s*("(?:[^"]|"")+"|\w+)\s+IN\s*\((.*)\)\s*$"#).unwrap());
static QUOTED_IDENT: Lazy<Regex> = Lazy::new(|| Regex::new(r#""((?:[^"]|"")+)""#).unwrap());

#[derive(Debug, Clone, PartialEq)]
enum ConstraintKind {
    PrimaryKey,
    Unique(Vec<String>),
    Check(String),
    ForeignKey(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
struct ParsedConstraint {
    name: Option<String>,
    kind: ConstraintKind,
}

/// Pieces of a stored `CREATE TABLE` statement.
#[derive(Debug, Default)]
struct ParsedDefinition {
    /// Column name to the text following it.
    columns: BTreeMap<String, String>,
    constraints: Vec<ParsedConstraint>,
    without_rowid: bool,
}

/// Splits off a leading (possibly quoted) identifier.
fn leading_identifier(text: &str) -> (String, &str) {
    let text = text.trim_start();
    let quote = match text.chars().next() {
        Some(q @ ('"' | '`')) => q,
        Some(_) => {
            let end = text.find(char::is_whitespace).unwrap_or(text.len());
            return (text[..end].to_string(), &text[end..]);
        }
        None => return (String::new(), text),
    };
    let mut chars = text.char_indices().skip(1).peekable();
    while let Some((pos, ch)) = chars.next() {
        if ch == quote {
            if chars.peek().map(|(_, c)| *c == quote).unwrap_or(false) {
                chars.next();
                continue;
            }
            let end = pos + ch.len_utf8();
            return (unquote(&text[..end]), &text[end..]);
        }
    }
    (unquote(text), "")
}

fn parenthesized_columns(text: &str) -> Vec<String> {
    text.find('(')
        .and_then(|open| balanced_parens(text, open))
        .map(|inner| split_top_level(inner).into_iter().map(unquote).collect())
        .unwrap_or_default()
}

fn parse_constraint_body(name: Option<String>, body: &str) -> Option<ParsedConstraint> {
    let upper = body.trim_start().to_ascii_uppercase();
    let kind = if upper.starts_with("PRIMARY KEY") {
        ConstraintKind::PrimaryKey
    } else if upper.starts_with("UNIQUE") {
        ConstraintKind::Unique(parenthesized_columns(body))
    } else if upper.starts_with("CHECK") {
        let open = body.find('(')?;
        ConstraintKind::Check(balanced_parens(body, open)?.trim().to_string())
    } else if upper.starts_with("FOREIGN KEY") {
        ConstraintKind::ForeignKey(parenthesized_columns(body))
    } else {
        return None;
    };
    Some(ParsedConstraint { name, kind })
}

fn parse_definition(sql: &str) -> ParsedDefinition {
    let mut parsed = ParsedDefinition {
        without_rowid: sql.to_ascii_uppercase().trim_end().ends_with("WITHOUT ROWID"),
        ..Default::default()
    };
    let body = match sql.find('(').and_then(|open| balanced_parens(sql, open)) {
        Some(body) => body,
        None => return parsed,
    };
    for part in split_top_level(body) {
        let upper = part.to_ascii_uppercase();
        if upper.starts_with("CONSTRAINT") {
            if let Some(caps) = NAMED_CONSTRAINT.captures(part) {
                let name = unquote(&caps[1]);
                if let Some(c) = parse_constraint_body(Some(name), &caps[2]) {
                    parsed.constraints.push(c);
                }
            }
        } else if ["PRIMARY KEY", "UNIQUE", "CHECK", "FOREIGN KEY"]
            .iter()
            .any(|kw| upper.starts_with(kw))
        {
            if let Some(c) = parse_constraint_body(None, part) {
                parsed.constraints.push(c);
            }
        } else {
            let (name, rest) = leading_identifier(part);
            parsed.columns.insert(name, rest.trim().to_string());
        }
    }
    parsed
}

fn computed_expression(definition: &str) -> Option<String> {
    let m = COMPUTED.find(definition)?;
    let open = m.end() - 1;
    balanced_parens(definition, open).map(|e| e.trim().to_string())
}

fn parse_enum_check(expression: &str) -> Option<(String, Vec<String>)> {
    let caps = ENUM_CHECK.captures(expression)?;
    let column = unquote(&caps[1]);
    let values = split_top_level(&caps[2]).into_iter().map(unquote).collect();
    Some((column, values))
}

fn referenced_columns(expression: &str) -> Vec<String> {
    let mut columns: Vec<String> = QUOTED_IDENT
        .captures_iter(expression)
        .map(|c| c[1].replace("\"\"", "\""))
        .collect();
    columns.dedup();
    columns
}

fn pragma(name: &str, table: &str) -> String {
    format!("PRAGMA {}({})", name, quote_ident(table, '"'))
}

impl SqliteDialect {
    pub(super) async fn introspect(
        &self,
        reader: &mut dyn CatalogReader,
        paths: &[TablePath],
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<Table>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; paths.len()].join(", ");
        let params: Vec<Value> = paths.iter().map(|p| Value::from(p.name.as_str())).collect();
        let masters = reader
            .fetch(
                &format!(
                    "SELECT \"name\", \"sql\" FROM \"sqlite_master\" WHERE \"type\" = 'table' AND \"name\" IN ({})",
                    placeholders
                ),
                params,
            )
            .await?;

        let mut tables = Vec::with_capacity(masters.len());
        for master in masters {
            let name = match master.get_string("name") {
                Some(name) => name,
                None => continue,
            };
            let sql = master.get_string("sql").unwrap_or_default();
            let mut table = self.load_table(reader, &name, &sql).await?;
            table.normalize(ctx.naming);
            tables.push(table);
        }
        Ok(tables)
    }

    async fn load_table(&self, reader: &mut dyn CatalogReader, name: &str, sql: &str) -> Result<Table> {
        let definition = parse_definition(sql);
        let mut table = Table::new(TablePath::new(name));
        table.without_rowid = definition.without_rowid;

        for row in reader.fetch(&pragma("table_xinfo", name), Vec::new()).await? {
            let hidden = row.get_i64("hidden").unwrap_or(0);
            if hidden == 1 {
                continue;
            }
            let column_name = row.get_string("name").unwrap_or_default();
            let column_def = definition.columns.get(&column_name).cloned().unwrap_or_default();
            let pk = row.get_i64("pk").unwrap_or(0);
            table.columns.push(self.column_from_pragma(&row, &column_def, pk > 0, hidden));
        }

        // Constraints named in the definition.
        for constraint in &definition.constraints {
            match &constraint.kind {
                ConstraintKind::PrimaryKey => table.primary_key_name = constraint.name.clone(),
                ConstraintKind::Check(expression) => {
                    let is_enum = constraint
                        .name
                        .as_deref()
                        .map(|n| n.ends_with("_ENUM"))
                        .unwrap_or(false);
                    match parse_enum_check(expression).filter(|_| is_enum) {
                        Some((column, values)) => {
                            if let Some(c) = table.find_column_mut(&column) {
                                c.column_type = "enum".to_string();
                                c.length = None;
                                c.enum_values = values;
                            }
                        }
                        None => table.checks.push(TableCheck {
                            name: constraint.name.clone(),
                            column_names: referenced_columns(expression),
                            expression: expression.clone(),
                        }),
                    }
                }
                _ => {}
            }
        }

        self.load_indices(reader, &mut table, &definition).await?;
        self.load_foreign_keys(reader, &mut table, &definition).await?;
        Ok(table)
    }

    fn column_from_pragma(&self, row: &Row, definition: &str, is_primary: bool, hidden: i64) -> TableColumn {
        let declared = row.get_string("type").unwrap_or_default();
        let parsed = parse_type(&declared);
        let mut column = TableColumn::new(row.get_string("name").unwrap_or_default(), parsed.name.clone());

        let caps = self.caps;
        if caps.has_length(&parsed.name) {
            column.length = caps.normalize_length(&parsed.name, parsed.args.first().copied());
        } else if caps.has_precision(&parsed.name) {
            let (p, s) = caps.normalize_precision(&parsed.name, parsed.args.first().copied(), parsed.args.get(1).copied());
            column.precision = p;
            column.scale = s;
        }

        column.is_primary = is_primary;
        column.is_nullable = !row.get_bool("notnull") && !is_primary;
        column.default = row.get_string("dflt_value");

        if definition.to_ascii_uppercase().contains("PRIMARY KEY AUTOINCREMENT") {
            column.is_generated = true;
            column.generation_strategy = Some(GenerationStrategy::Increment);
        }
        if hidden == 2 || hidden == 3 {
            column.as_expression = computed_expression(definition);
            column.generated_type = Some(if hidden == 3 {
                GeneratedType::Stored
            } else {
                GeneratedType::Virtual
            });
        }
        column
    }

    async fn load_indices(
        &self,
        reader: &mut dyn CatalogReader,
        table: &mut Table,
        definition: &ParsedDefinition,
    ) -> Result<()> {
        let name = table.path.name.clone();
        let index_sql: BTreeMap<String, String> = reader
            .fetch(
                "SELECT \"name\", \"sql\" FROM \"sqlite_master\" WHERE \"type\" = 'index' AND \"tbl_name\" = ?",
                vec![Value::from(name.as_str())],
            )
            .await?
            .into_iter()
            .filter_map(|r| Some((r.get_string("name")?, r.get_string("sql")?)))
            .collect();

        for entry in reader.fetch(&pragma("index_list", &name), Vec::new()).await? {
            let index_name = entry.get_string("name").unwrap_or_default();
            let origin = entry.get_string("origin").unwrap_or_else(|| "c".to_string());
            if origin == "pk" {
                continue;
            }
            let mut columns: Vec<(i64, String)> = reader
                .fetch(&pragma("index_info", &index_name), Vec::new())
                .await?
                .into_iter()
                .filter_map(|r| Some((r.get_i64("seqno")?, r.get_string("name")?)))
                .collect();
            columns.sort();
            let columns: Vec<String> = columns.into_iter().map(|(_, c)| c).collect();

            if origin == "u" {
                let constraint_name = definition.constraints.iter().find_map(|c| match &c.kind {
                    ConstraintKind::Unique(cols)
                        if cols.len() == columns.len() && cols.iter().all(|x| columns.contains(x)) =>
                    {
                        c.name.clone()
                    }
                    _ => None,
                });
                table.add_unique(TableUnique {
                    name: constraint_name,
                    column_names: columns,
                    deferrable: None,
                });
            } else {
                let where_clause = index_sql.get(&index_name).and_then(|sql| {
                    let upper = sql.to_ascii_uppercase();
                    upper.rfind(" WHERE ").map(|pos| sql[pos + 7..].trim().to_string())
                });
                table.add_index(TableIndex {
                    name: Some(index_name),
                    column_names: columns,
                    is_unique: entry.get_bool("unique"),
                    is_spatial: false,
                    is_fulltext: false,
                    where_clause,
                });
            }
        }
        Ok(())
    }

    async fn load_foreign_keys(
        &self,
        reader: &mut dyn CatalogReader,
        table: &mut Table,
        definition: &ParsedDefinition,
    ) -> Result<()> {
        let rows = reader
            .fetch(&pragma("foreign_key_list", &table.path.name), Vec::new())
            .await?;

        let mut grouped: BTreeMap<i64, Vec<Row>> = BTreeMap::new();
        for row in rows {
            grouped.entry(row.get_i64("id").unwrap_or(0)).or_default().push(row);
        }

        // PRAGMA foreign_key_list reports constraints in reverse declaration order.
        for (_, mut rows) in grouped.into_iter().rev() {
            rows.sort_by_key(|r| r.get_i64("seq").unwrap_or(0));
            let first = &rows[0];
            let columns: Vec<String> = rows.iter().filter_map(|r| r.get_string("from")).collect();
            let referenced: Vec<String> = rows.iter().filter_map(|r| r.get_string("to")).collect();
            let name = definition.constraints.iter().find_map(|c| match &c.kind {
                ConstraintKind::ForeignKey(cols) if *cols == columns => c.name.clone(),
                _ => None,
            });
            table.foreign_keys.push(TableForeignKey {
                name,
                column_names: columns,
                referenced_table_name: first.get_string("table").unwrap_or_default(),
                referenced_column_names: referenced,
                on_delete: first
                    .get_string("on_delete")
                    .and_then(|s| ReferentialAction::parse(&s))
                    .unwrap_or_default(),
                on_update: first
                    .get_string("on_update")
                    .and_then(|s| ReferentialAction::parse(&s))
                    .unwrap_or_default(),
                deferrable: None,
            });
        }
        Ok(())
    }

    pub(super) async fn table_names(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<TablePath>> {
        let rows = reader
            .fetch(
                "SELECT \"name\" FROM \"sqlite_master\" WHERE \"type\" = 'table' AND \"name\" NOT LIKE 'sqlite_%' ORDER BY \"name\"",
                Vec::new(),
            )
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| r.get_string("name"))
            .filter(|name| name != ctx.metadata_table)
            .map(TablePath::new)
            .collect())
    }
}
