//! MySQL catalog introspection over `information_schema`.

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::dialect::sql::{split_top_level, string_literal, unquote};
use crate::dialect::{CatalogReader, DialectContext, DialectStrategy};
use crate::driver::Row;
use crate::error::Result;
use crate::schema::{
    GeneratedType, GenerationStrategy, ReferentialAction, Table, TableColumn, TableForeignKey, TableIndex,
    TablePath, TableUnique,
};
use crate::statement::Value;

use super::MySqlDialect;

/// `on update CURRENT_TIMESTAMP(3)` inside `EXTRA`.
static ON_UPDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)on update ([a-z_]+(?:\(\d*\))?)").unwrap());

const TABLE_SQL: &str = "SELECT `TABLE_NAME` AS `table_name`, `TABLE_COMMENT` AS `comment`, `ENGINE` AS `engine` \
FROM `information_schema`.`TABLES` \
WHERE `TABLE_SCHEMA` = ? AND `TABLE_NAME` = ? AND `TABLE_TYPE` = 'BASE TABLE'";

const DEFAULTS_SQL: &str = "SELECT `DEFAULT_CHARACTER_SET_NAME` AS `charset`, `DEFAULT_COLLATION_NAME` AS `collation` \
FROM `information_schema`.`SCHEMATA` WHERE `SCHEMA_NAME` = ?";

const COLUMNS_SQL: &str = "SELECT `COLUMN_NAME` AS `column_name`, `DATA_TYPE` AS `data_type`, \
`COLUMN_TYPE` AS `column_type`, `IS_NULLABLE` AS `is_nullable`, `COLUMN_DEFAULT` AS `column_default`, \
`CHARACTER_MAXIMUM_LENGTH` AS `length`, `NUMERIC_PRECISION` AS `numeric_precision`, \
`NUMERIC_SCALE` AS `numeric_scale`, `DATETIME_PRECISION` AS `datetime_precision`, \
`COLUMN_KEY` AS `column_key`, `EXTRA` AS `extra`, `GENERATION_EXPRESSION` AS `generation_expression`, \
`COLUMN_COMMENT` AS `comment`, `CHARACTER_SET_NAME` AS `charset`, `COLLATION_NAME` AS `collation` \
FROM `information_schema`.`COLUMNS` \
WHERE `TABLE_SCHEMA` = ? AND `TABLE_NAME` = ? ORDER BY `ORDINAL_POSITION`";

const INDICES_SQL: &str = "SELECT `INDEX_NAME` AS `index_name`, `COLUMN_NAME` AS `column_name`, \
`NON_UNIQUE` AS `non_unique`, `INDEX_TYPE` AS `index_type` \
FROM `information_schema`.`STATISTICS` \
WHERE `TABLE_SCHEMA` = ? AND `TABLE_NAME` = ? AND `INDEX_NAME` <> 'PRIMARY' \
ORDER BY `INDEX_NAME`, `SEQ_IN_INDEX`";

const FOREIGN_KEYS_SQL: &str = "SELECT `kcu`.`CONSTRAINT_NAME` AS `constraint_name`, `kcu`.`COLUMN_NAME` AS `column_name`, \
`kcu`.`REFERENCED_TABLE_SCHEMA` AS `referenced_schema`, `kcu`.`REFERENCED_TABLE_NAME` AS `referenced_table`, \
`kcu`.`REFERENCED_COLUMN_NAME` AS `referenced_column`, `rc`.`DELETE_RULE` AS `on_delete`, `rc`.`UPDATE_RULE` AS `on_update` \
FROM `information_schema`.`KEY_COLUMN_USAGE` `kcu` \
JOIN `information_schema`.`REFERENTIAL_CONSTRAINTS` `rc` \
ON `rc`.`CONSTRAINT_SCHEMA` = `kcu`.`CONSTRAINT_SCHEMA` AND `rc`.`CONSTRAINT_NAME` = `kcu`.`CONSTRAINT_NAME` \
WHERE `kcu`.`TABLE_SCHEMA` = ? AND `kcu`.`TABLE_NAME` = ? AND `kcu`.`REFERENCED_TABLE_NAME` IS NOT NULL \
ORDER BY `kcu`.`CONSTRAINT_NAME`, `kcu`.`ORDINAL_POSITION`";

const NUMERIC_TYPES: &[&str] = &[
    "tinyint", "smallint", "mediumint", "int", "bigint", "decimal", "float", "double", "bit", "year",
];

/// Values of `enum('a','b')` from `COLUMN_TYPE`.
fn enum_values(column_type: &str) -> Vec<String> {
    let Some(open) = column_type.find('(') else {
        return Vec::new();
    };
    let close = column_type.rfind(')').unwrap_or(column_type.len());
    split_top_level(&column_type[open + 1..close.max(open + 1)])
        .into_iter()
        .map(unquote)
        .collect()
}

/// Brings `COLUMN_DEFAULT` back to the SQL expression a model would declare.
///
/// MySQL reports string defaults unquoted and flags expressions with
/// `DEFAULT_GENERATED`; MariaDB already quotes strings.
fn default_expression(raw: &str, data_type: &str, extra: &str) -> Option<String> {
    if raw.eq_ignore_ascii_case("NULL") {
        return None;
    }
    let expression = extra.contains("DEFAULT_GENERATED")
        || NUMERIC_TYPES.contains(&data_type)
        || raw.starts_with('\'')
        || raw.to_ascii_uppercase().starts_with("CURRENT_TIMESTAMP");
    if expression {
        Some(raw.to_string())
    } else {
        Some(string_literal(raw))
    }
}

impl MySqlDialect {
    async fn database_or_current(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<String> {
        if let Some(database) = ctx.database {
            return Ok(database.to_string());
        }
        Ok(self.current_database(reader).await?.unwrap_or_default())
    }

    pub(super) async fn table_names(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<TablePath>> {
        let database = self.database_or_current(reader, ctx).await?;
        let rows = reader
            .fetch(
                "SELECT `TABLE_NAME` AS `table_name` FROM `information_schema`.`TABLES` \
                 WHERE `TABLE_SCHEMA` = ? AND `TABLE_TYPE` = 'BASE TABLE' ORDER BY `TABLE_NAME`",
                vec![Value::from(database.as_str())],
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|r| r.get_string("table_name"))
            .filter(|name| name != ctx.metadata_table)
            .map(|name| TablePath {
                database: Some(database.clone()),
                schema: None,
                name,
            })
            .collect())
    }

    pub(super) async fn introspect(
        &self,
        reader: &mut dyn CatalogReader,
        paths: &[TablePath],
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<Table>> {
        let current = self.database_or_current(reader, ctx).await?;
        let mut tables = Vec::with_capacity(paths.len());
        for path in paths {
            let qualified = TablePath {
                database: Some(path.database.clone().unwrap_or_else(|| current.clone())),
                schema: None,
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
            Value::from(path.database.clone().unwrap_or_default()),
            Value::from(path.name.as_str()),
        ]
    }

    async fn load_table(&self, reader: &mut dyn CatalogReader, path: &TablePath) -> Result<Option<Table>> {
        let found = reader.fetch(TABLE_SQL, Self::params(path)).await?;
        let Some(head) = found.first() else {
            return Ok(None);
        };
        let database = path.database.clone().unwrap_or_default();
        let mut table = Table::new(path.clone());
        table.comment = head.get_string("comment").filter(|c| !c.is_empty());
        table.engine = head
            .get_string("engine")
            .filter(|e| !e.eq_ignore_ascii_case("InnoDB"));

        let defaults = reader.fetch(DEFAULTS_SQL, vec![Value::from(database.as_str())]).await?;
        let default_charset = defaults.first().and_then(|r| r.get_string("charset"));
        let default_collation = defaults.first().and_then(|r| r.get_string("collation"));

        let rows = reader.fetch(COLUMNS_SQL, Self::params(path)).await?;
        for row in &rows {
            let mut column = self.column_from_row(row);
            // Only report what differs from the database defaults.
            if column.charset == default_charset {
                column.charset = None;
            }
            if column.collation == default_collation {
                column.collation = None;
            }
            table.add_column(column);
        }

        self.load_foreign_keys(reader, &mut table, &database).await?;
        self.load_indices(reader, &mut table).await?;
        Ok(Some(table))
    }

    fn column_from_row(&self, row: &Row) -> TableColumn {
        let name = row.get_string("column_name").unwrap_or_default();
        let data_type = row.get_string("data_type").unwrap_or_default().to_ascii_lowercase();
        let full_type = row.get_string("column_type").unwrap_or_default().to_ascii_lowercase();
        let extra = row.get_string("extra").unwrap_or_default();

        let mut column = TableColumn::new(name, data_type.clone());
        if data_type == "enum" {
            column = column.enum_values(enum_values(&full_type));
        }
        column.is_nullable = row.get_string("is_nullable").as_deref() == Some("YES");
        column.is_primary = row.get_string("column_key").as_deref() == Some("PRI");
        column.unsigned = full_type.contains("unsigned");
        column.comment = row.get_string("comment").filter(|c| !c.is_empty());
        column.charset = row.get_string("charset");
        column.collation = row.get_string("collation");

        if !column.is_enum() {
            column.length = self
                .caps
                .normalize_length(&data_type, row.get_i64("length").map(|l| l as u32));
            let precision = if matches!(data_type.as_str(), "datetime" | "timestamp" | "time") {
                row.get_i64("datetime_precision")
            } else {
                row.get_i64("numeric_precision")
            };
            let (precision, scale) = self.caps.normalize_precision(
                &data_type,
                precision.map(|p| p as u32),
                row.get_i64("numeric_scale").map(|s| s as u32),
            );
            column.precision = precision;
            column.scale = scale;
        }

        let lower_extra = extra.to_ascii_lowercase();
        if lower_extra.contains("auto_increment") {
            column.is_generated = true;
            column.generation_strategy = Some(GenerationStrategy::Increment);
        }
        if lower_extra.contains("virtual generated") || lower_extra.contains("stored generated") {
            column.as_expression = row.get_string("generation_expression");
            column.generated_type = Some(if lower_extra.contains("stored") {
                GeneratedType::Stored
            } else {
                GeneratedType::Virtual
            });
        }
        if let Some(caps) = ON_UPDATE.captures(&extra) {
            column.on_update = Some(caps[1].to_ascii_uppercase());
        }
        if !column.is_computed() {
            column.default = row
                .get_string("column_default")
                .and_then(|raw| default_expression(&raw, &data_type, &extra));
        }
        column
    }

    async fn load_foreign_keys(
        &self,
        reader: &mut dyn CatalogReader,
        table: &mut Table,
        database: &str,
    ) -> Result<()> {
        let rows = reader.fetch(FOREIGN_KEYS_SQL, Self::params(&table.path)).await?;
        let mut grouped: IndexMap<String, TableForeignKey> = IndexMap::new();
        for row in rows {
            let Some(name) = row.get_string("constraint_name") else {
                continue;
            };
            let column = row.get_string("column_name").unwrap_or_default();
            let referenced_column = row.get_string("referenced_column").unwrap_or_default();
            let fk = grouped.entry(name.clone()).or_insert_with(|| {
                let referenced_table = row.get_string("referenced_table").unwrap_or_default();
                let referenced = match row.get_string("referenced_schema") {
                    Some(schema) if schema != database => format!("{}.{}", schema, referenced_table),
                    _ => referenced_table,
                };
                let mut fk = TableForeignKey::new(Vec::<String>::new(), referenced, Vec::<String>::new()).named(name);
                fk.on_delete = row
                    .get_string("on_delete")
                    .and_then(|r| ReferentialAction::parse(&r))
                    .unwrap_or_default();
                fk.on_update = row
                    .get_string("on_update")
                    .and_then(|r| ReferentialAction::parse(&r))
                    .unwrap_or_default();
                fk
            });
            fk.column_names.push(column);
            fk.referenced_column_names.push(referenced_column);
        }
        for fk in grouped.into_values() {
            table.add_foreign_key(fk);
        }
        Ok(())
    }

    async fn load_indices(&self, reader: &mut dyn CatalogReader, table: &mut Table) -> Result<()> {
        let rows = reader.fetch(INDICES_SQL, Self::params(&table.path)).await?;
        let mut grouped: IndexMap<String, (Vec<String>, bool, String)> = IndexMap::new();
        for row in rows {
            let Some(name) = row.get_string("index_name") else {
                continue;
            };
            let column = row.get_string("column_name").unwrap_or_default();
            let unique = row.get_i64("non_unique") == Some(0);
            let kind = row.get_string("index_type").unwrap_or_default();
            grouped
                .entry(name)
                .or_insert_with(|| (Vec::new(), unique, kind))
                .0
                .push(column);
        }
        for (name, (columns, unique, kind)) in grouped {
            // InnoDB backs every foreign key with an index of the same name.
            if table.find_foreign_key(&name).is_some() {
                continue;
            }
            if unique && !name.starts_with("IDX_") {
                table.add_unique(TableUnique::new(columns).named(name));
                continue;
            }
            let mut index = TableIndex::new(columns).named(name);
            index.is_unique = unique;
            index.is_spatial = kind.eq_ignore_ascii_case("SPATIAL");
            index.is_fulltext = kind.eq_ignore_ascii_case("FULLTEXT");
            table.add_index(index);
        }
        Ok(())
    }

    pub(super) async fn drop_everything(
        &self,
        reader: &mut dyn CatalogReader,
        ctx: &DialectContext<'_>,
    ) -> Result<Vec<String>> {
        let database = self.database_or_current(reader, ctx).await?;
        let mut statements = vec!["SET FOREIGN_KEY_CHECKS = 0".to_string()];
        let queries: [(&str, &str); 2] = [
            (
                "SELECT `TABLE_NAME` AS `name` FROM `information_schema`.`VIEWS` WHERE `TABLE_SCHEMA` = ?",
                "VIEW",
            ),
            (
                "SELECT `TABLE_NAME` AS `name` FROM `information_schema`.`TABLES` \
                 WHERE `TABLE_SCHEMA` = ? AND `TABLE_TYPE` = 'BASE TABLE'",
                "TABLE",
            ),
        ];
        for (sql, keyword) in queries {
            let rows = reader.fetch(sql, vec![Value::from(database.as_str())]).await?;
            for name in rows.iter().filter_map(|r| r.get_string("name")) {
                let target = self.escape_path(&TablePath {
                    database: Some(database.clone()),
                    schema: None,
                    name,
                });
                statements.push(format!("DROP {} IF EXISTS {}", keyword, target));
            }
        }
        statements.push("SET FOREIGN_KEY_CHECKS = 1".to_string());
        Ok(statements)
    }
}
