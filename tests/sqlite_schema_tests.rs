//! Schema operations against an in-memory SQLite database.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use common::init_tracing;
use sqlx_schema_runner::{
    Connection, DefaultNamingStrategy, Driver, NamingStrategy, QueryRunner, ReferentialAction, ReplicationMode,
    RunnerError, SqliteDriver, Table, TableCheck, TableColumn, TableForeignKey, TableIndex, TablePath, TableUnique,
    Value, View,
};

async fn runner() -> QueryRunner {
    init_tracing();
    let driver = SqliteDriver::open_in_memory().await.unwrap();
    QueryRunner::builder(Arc::new(driver)).build()
}

fn path(name: &str) -> TablePath {
    TablePath::new(name)
}

async fn reload(runner: &mut QueryRunner, name: &str) -> Arc<Table> {
    runner.clear_cache();
    runner.get_table(&path(name)).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_primary_and_unique_survive_introspection() {
    let mut runner = runner().await;
    let table = Table::new("t")
        .column(TableColumn::new("id", "int").primary())
        .column(TableColumn::new("name", "varchar").unique());
    runner.create_table(table, false).await.unwrap();

    let live = reload(&mut runner, "t").await;
    assert_eq!(live.primary_column_names(), vec!["id".to_string()]);
    assert_eq!(live.uniques.len(), 1);
    assert_eq!(live.uniques[0].column_names, vec!["name".to_string()]);
}

#[tokio::test]
async fn test_add_not_null_column_with_default_fills_rows() {
    let mut runner = runner().await;
    let table = Table::new("counters").column(TableColumn::new("id", "integer").primary());
    runner.create_table(table, false).await.unwrap();
    for id in 1..=3 {
        runner
            .execute(&format!("INSERT INTO \"counters\" (\"id\") VALUES ({})", id))
            .await
            .unwrap();
    }

    runner
        .add_column("counters", TableColumn::new("n", "integer").default_value("0"))
        .await
        .unwrap();

    let result = runner.execute("SELECT \"n\" FROM \"counters\"").await.unwrap();
    assert_eq!(result.rows.len(), 3);
    assert!(result.rows.iter().all(|r| r.get_i64("n") == Some(0)));
}

#[tokio::test]
async fn test_rename_column_rederives_unique_name() {
    let mut runner = runner().await;
    let naming = DefaultNamingStrategy;
    let table = Table::new("t")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("a", "integer"))
        .column(TableColumn::new("c", "integer"))
        .unique(TableUnique::new(["a", "c"]));
    runner.create_table(table, false).await.unwrap();

    runner.rename_column("t", "a", "b").await.unwrap();

    let expected = naming.unique_constraint_name("t", &["b".to_string(), "c".to_string()]);
    let cached = runner.get_table(&path("t")).await.unwrap().unwrap();
    assert_eq!(cached.uniques[0].name.as_deref(), Some(expected.as_str()));

    let live = reload(&mut runner, "t").await;
    assert!(live.has_column("b"));
    assert!(!live.has_column("a"));
    assert_eq!(live.uniques.len(), 1);
    assert_eq!(live.uniques[0].column_names, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(live.uniques[0].name.as_deref(), Some(expected.as_str()));
}

#[tokio::test]
async fn test_down_statements_restore_the_table() {
    let mut runner = runner().await;
    let table = Table::new("items")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("label", "varchar").length(50));
    runner.create_table(table, false).await.unwrap();
    let original = reload(&mut runner, "items").await;
    runner.clear_sql_memory();

    runner
        .add_column("items", TableColumn::new("price", "integer").nullable())
        .await
        .unwrap();
    runner
        .create_index("items", TableIndex::new(["label"]))
        .await
        .unwrap();
    runner
        .change_column("items", "label", TableColumn::new("title", "varchar").length(80))
        .await
        .unwrap();
    runner.execute_memory_down_sql().await.unwrap();

    let restored = reload(&mut runner, "items").await;
    let names = |t: &Table| t.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
    assert_eq!(names(&restored), names(&original));
    assert_eq!(restored.primary_column_names(), original.primary_column_names());
    assert!(restored.indices.is_empty());
    assert_eq!(restored.find_column("label").unwrap().length, Some(50));
}

#[tokio::test]
async fn test_changes_are_served_from_cache() {
    let mut runner = runner().await;
    let table = Table::new("users")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("email", "varchar").nullable());
    runner.create_table(table, false).await.unwrap();
    assert_eq!(runner.introspection_count(), 0);

    runner
        .add_column("users", TableColumn::new("age", "integer").nullable())
        .await
        .unwrap();
    runner
        .create_unique_constraint("users", TableUnique::new(["email"]))
        .await
        .unwrap();
    assert!(runner.has_column("users", "age").await.unwrap());
    assert_eq!(runner.introspection_count(), 0);

    runner.clear_cache();
    assert!(runner.has_column("users", "age").await.unwrap());
    assert_eq!(runner.introspection_count(), 1);
    assert!(runner.has_column("users", "email").await.unwrap());
    assert_eq!(runner.introspection_count(), 1);
}

#[tokio::test]
async fn test_missing_objects_fail_before_sql() {
    let mut runner = runner().await;
    let table = Table::new("t").column(TableColumn::new("id", "integer").primary());
    runner.create_table(table, false).await.unwrap();
    runner.clear_sql_memory();

    let err = runner.drop_column("t", "nope").await.unwrap_err();
    assert!(matches!(err, RunnerError::NotFound { .. }));
    let err = runner.drop_index("t", "IDX_nope").await.unwrap_err();
    assert!(matches!(err, RunnerError::NotFound { .. }));
    let err = runner
        .create_index("t", TableIndex::new(["ghost"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::NotFound { .. }));
    let err = runner.add_column("missing", TableColumn::new("x", "integer")).await.unwrap_err();
    assert!(matches!(err, RunnerError::NotFound { .. }));
    assert!(runner.get_memory_sql().is_empty());
}

#[tokio::test]
async fn test_drop_and_rename_table() {
    let mut runner = runner().await;
    let table = Table::new("old_name")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("v", "integer").nullable())
        .index(TableIndex::new(["v"]));
    runner.create_table(table, false).await.unwrap();

    runner.rename_table("old_name", "new_name").await.unwrap();
    assert!(!runner.has_table(&path("old_name")).await.unwrap());
    let renamed = reload(&mut runner, "new_name").await;
    let expected = DefaultNamingStrategy.index_name("new_name", &["v".to_string()], None);
    assert_eq!(renamed.indices[0].name.as_deref(), Some(expected.as_str()));

    runner.drop_table("new_name", false).await.unwrap();
    assert!(!runner.has_table(&path("new_name")).await.unwrap());
    runner.drop_table("new_name", true).await.unwrap();
}

#[tokio::test]
async fn test_foreign_keys_and_clear_database() {
    let mut runner = runner().await;
    let authors = Table::new("authors").column(TableColumn::new("id", "integer").primary());
    let posts = Table::new("posts")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("author_id", "integer"));
    runner.create_table(authors, false).await.unwrap();
    runner.create_table(posts, false).await.unwrap();

    runner
        .create_foreign_key("posts", TableForeignKey::new(["author_id"], "authors", ["id"]))
        .await
        .unwrap();
    let live = reload(&mut runner, "posts").await;
    assert_eq!(live.foreign_keys.len(), 1);
    assert_eq!(live.foreign_keys[0].referenced_table_name, "authors");

    let name = live.foreign_keys[0].name.clone().unwrap();
    runner.drop_foreign_key("posts", &name).await.unwrap();
    assert!(reload(&mut runner, "posts").await.foreign_keys.is_empty());

    runner.clear_database().await.unwrap();
    assert!(runner.get_tables(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_clear_table_keeps_structure() {
    let mut runner = runner().await;
    let table = Table::new("logs").column(TableColumn::new("id", "integer").primary());
    runner.create_table(table, false).await.unwrap();
    runner.execute("INSERT INTO \"logs\" (\"id\") VALUES (1)").await.unwrap();

    runner.clear_table(&path("logs")).await.unwrap();
    let rows = runner.execute("SELECT * FROM \"logs\"").await.unwrap().rows;
    assert!(rows.is_empty());
    assert!(runner.has_table(&path("logs")).await.unwrap());
}

#[tokio::test]
async fn test_memory_sql_can_be_replayed() {
    let mut runner = runner().await;
    runner.enable_sql_memory();
    let table = Table::new("drafts").column(TableColumn::new("id", "integer").primary());
    runner.create_table(table, false).await.unwrap();
    assert!(!runner.get_memory_sql().is_empty());

    runner.execute_memory_up_sql().await.unwrap();
    runner.disable_sql_memory();
    runner.clear_cache();
    assert!(runner.has_table(&path("drafts")).await.unwrap());
}

#[tokio::test]
async fn test_generate_migration_leaves_schema_untouched() {
    let mut runner = runner().await;
    let table = Table::new("accounts").column(TableColumn::new("id", "integer").primary());
    runner.create_table(table, false).await.unwrap();

    let desired = Table::new("accounts")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("nickname", "varchar").nullable());
    let script = runner.generate_migration(&[desired.clone()]).await.unwrap();
    assert!(script.up.iter().any(|q| q.sql.contains("ADD COLUMN \"nickname\"")));
    assert!(!script.down.is_empty());
    assert!(!runner.has_column("accounts", "nickname").await.unwrap());
    assert!(!runner.is_sql_memory_enabled());

    runner.synchronize(&[desired.clone()]).await.unwrap();
    assert!(runner.has_column("accounts", "nickname").await.unwrap());
    assert!(runner.generate_migration(&[desired]).await.unwrap().is_empty());
}

async fn parent_and_child(runner: &mut QueryRunner, on_delete: ReferentialAction) {
    let parent = Table::new("p")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("v", "integer").nullable());
    let child = Table::new("c")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("pid", "integer"))
        .foreign_key(TableForeignKey::new(["pid"], "p", ["id"]).on_delete(on_delete));
    runner.create_table(parent, false).await.unwrap();
    runner.create_table(child, false).await.unwrap();
    runner.execute("INSERT INTO \"p\" (\"id\", \"v\") VALUES (1, 10)").await.unwrap();
    runner.execute("INSERT INTO \"c\" (\"id\", \"pid\") VALUES (1, 1)").await.unwrap();
}

#[tokio::test]
async fn test_rebuilding_referenced_table_keeps_child_rows() {
    let mut runner = runner().await;
    parent_and_child(&mut runner, ReferentialAction::Cascade).await;

    runner
        .create_unique_constraint("p", TableUnique::new(["v"]))
        .await
        .unwrap();

    let children = runner.execute("SELECT * FROM \"c\"").await.unwrap().rows;
    assert_eq!(children.len(), 1);
    assert_eq!(reload(&mut runner, "p").await.uniques.len(), 1);
    // Enforcement is back on after the rebuild.
    assert!(runner
        .execute("INSERT INTO \"c\" (\"id\", \"pid\") VALUES (2, 99)")
        .await
        .is_err());
}

#[tokio::test]
async fn test_rebuilding_referenced_table_without_cascade() {
    let mut runner = runner().await;
    parent_and_child(&mut runner, ReferentialAction::NoAction).await;

    runner
        .add_column("p", TableColumn::new("label", "varchar").unique().nullable())
        .await
        .unwrap();

    assert!(!runner.has_table(&path("temporary_p")).await.unwrap());
    let live = reload(&mut runner, "p").await;
    assert!(live.has_column("label"));
    assert_eq!(runner.execute("SELECT * FROM \"c\"").await.unwrap().rows.len(), 1);
    assert_eq!(runner.execute("SELECT * FROM \"p\"").await.unwrap().rows.len(), 1);
}

#[tokio::test]
async fn test_views_round_trip() {
    let mut runner = runner().await;
    assert!(runner.get_view(&path("active")).await.unwrap().is_none());
    assert!(runner.get_views(&[]).await.unwrap().is_empty());

    let table = Table::new("t")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("flag", "integer").default_value("1"));
    runner.create_table(table, false).await.unwrap();
    runner.execute("INSERT INTO \"t\" (\"id\") VALUES (1)").await.unwrap();
    runner.clear_sql_memory();

    runner
        .create_view(View::new("active", "SELECT \"id\" FROM \"t\" WHERE \"flag\" = 1"))
        .await
        .unwrap();
    let rows = runner.execute("SELECT * FROM \"active\"").await.unwrap().rows;
    assert_eq!(rows.len(), 1);

    runner.clear_cache();
    let view = runner.get_view(&path("active")).await.unwrap().unwrap();
    assert_eq!(view.expression, "SELECT \"id\" FROM \"t\" WHERE \"flag\" = 1");
    assert!(!view.materialized);
    assert_eq!(runner.get_views(&[]).await.unwrap().len(), 1);
    // The metadata table is not a user table.
    let tables = runner.get_tables(&[]).await.unwrap();
    assert_eq!(tables.len(), 1);

    runner.execute_memory_down_sql().await.unwrap();
    runner.clear_cache();
    assert!(runner.get_view(&path("active")).await.unwrap().is_none());
    assert!(runner.execute("SELECT * FROM \"active\"").await.is_err());
}

#[tokio::test]
async fn test_drop_view() {
    let mut runner = runner().await;
    let table = Table::new("t").column(TableColumn::new("id", "integer").primary());
    runner.create_table(table, false).await.unwrap();

    let err = runner.drop_view(&path("ids")).await.unwrap_err();
    assert!(matches!(err, RunnerError::NotFound { .. }));

    runner.create_view(View::new("ids", "SELECT \"id\" FROM \"t\"")).await.unwrap();
    runner.clear_cache();
    runner.drop_view(&path("ids")).await.unwrap();
    assert!(runner.get_view(&path("ids")).await.unwrap().is_none());
    assert!(runner.execute("SELECT * FROM \"ids\"").await.is_err());
}

#[tokio::test]
async fn test_primary_key_replacement_round_trip() {
    let mut runner = runner().await;
    let table = Table::new("pairs")
        .column(TableColumn::new("a", "integer").primary())
        .column(TableColumn::new("b", "integer"));
    runner.create_table(table, false).await.unwrap();
    runner.execute("INSERT INTO \"pairs\" (\"a\", \"b\") VALUES (1, 1), (2, 1)").await.unwrap();
    runner.clear_sql_memory();

    runner
        .create_primary_key("pairs", &["a".to_string(), "b".to_string()], None)
        .await
        .unwrap();
    let live = reload(&mut runner, "pairs").await;
    assert_eq!(live.primary_column_names(), vec!["a".to_string(), "b".to_string()]);

    runner.drop_primary_key("pairs").await.unwrap();
    let live = reload(&mut runner, "pairs").await;
    assert!(live.primary_column_names().is_empty());
    let err = runner.drop_primary_key("pairs").await.unwrap_err();
    assert!(matches!(err, RunnerError::NotFound { .. }));

    runner.execute_memory_down_sql().await.unwrap();
    let restored = reload(&mut runner, "pairs").await;
    assert_eq!(restored.primary_column_names(), vec!["a".to_string()]);
    assert_eq!(runner.execute("SELECT * FROM \"pairs\"").await.unwrap().rows.len(), 2);
}

#[tokio::test]
async fn test_check_and_enum_columns_round_trip() {
    let mut runner = runner().await;
    let table = Table::new("orders")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("status", "varchar").enum_values(["open", "closed"]))
        .column(TableColumn::new("qty", "integer"))
        .check(TableCheck::new("\"qty\" > 0"));
    runner.create_table(table, false).await.unwrap();
    runner
        .execute("INSERT INTO \"orders\" (\"id\", \"status\", \"qty\") VALUES (1, 'open', 5)")
        .await
        .unwrap();
    assert!(runner
        .execute("INSERT INTO \"orders\" (\"id\", \"status\", \"qty\") VALUES (2, 'lost', 5)")
        .await
        .is_err());

    let original = reload(&mut runner, "orders").await;
    assert_eq!(original.find_column("status").unwrap().enum_values, vec!["open", "closed"]);
    assert_eq!(original.checks.len(), 1);
    assert_eq!(original.checks[0].expression, "\"qty\" > 0");
    runner.clear_sql_memory();

    runner
        .create_check_constraint("orders", TableCheck::new("\"qty\" < 100"))
        .await
        .unwrap();
    let live = reload(&mut runner, "orders").await;
    assert_eq!(live.checks.len(), 2);
    assert_eq!(live.find_column("status").unwrap().enum_values, vec!["open", "closed"]);
    assert!(runner
        .execute("INSERT INTO \"orders\" (\"id\", \"status\", \"qty\") VALUES (3, 'open', 500)")
        .await
        .is_err());

    runner.execute_memory_down_sql().await.unwrap();
    let restored = reload(&mut runner, "orders").await;
    assert_eq!(restored.checks, original.checks);
    assert_eq!(restored.find_column("status"), original.find_column("status"));
    assert_eq!(runner.execute("SELECT * FROM \"orders\"").await.unwrap().rows.len(), 1);
}

#[tokio::test]
async fn test_rename_foreign_key_column_round_trip() {
    let mut runner = runner().await;
    let naming = DefaultNamingStrategy;
    parent_and_child(&mut runner, ReferentialAction::Cascade).await;
    runner.clear_sql_memory();

    runner.rename_column("c", "pid", "parent_id").await.unwrap();
    let live = reload(&mut runner, "c").await;
    assert_eq!(live.foreign_keys.len(), 1);
    let fk = &live.foreign_keys[0];
    assert_eq!(fk.column_names, vec!["parent_id".to_string()]);
    assert_eq!(fk.referenced_table_name, "p");
    assert_eq!(fk.on_delete, ReferentialAction::Cascade);
    let expected = naming.foreign_key_name("c", &["parent_id".to_string()]);
    assert_eq!(fk.name.as_deref(), Some(expected.as_str()));
    assert_eq!(runner.execute("SELECT * FROM \"c\"").await.unwrap().rows.len(), 1);

    runner.execute_memory_down_sql().await.unwrap();
    let restored = reload(&mut runner, "c").await;
    assert_eq!(restored.foreign_keys[0].column_names, vec!["pid".to_string()]);
    let expected = naming.foreign_key_name("c", &["pid".to_string()]);
    assert_eq!(restored.foreign_keys[0].name.as_deref(), Some(expected.as_str()));
    assert_eq!(runner.execute("SELECT * FROM \"p\"").await.unwrap().rows.len(), 1);
    assert_eq!(runner.execute("SELECT * FROM \"c\"").await.unwrap().rows.len(), 1);
}

#[tokio::test]
async fn test_synchronize_adds_unique_column_once() {
    let mut runner = runner().await;
    let table = Table::new("people").column(TableColumn::new("id", "integer").primary());
    runner.create_table(table, false).await.unwrap();

    let desired = Table::new("people")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("email", "varchar").nullable().unique());
    runner.synchronize(&[desired.clone()]).await.unwrap();

    let live = reload(&mut runner, "people").await;
    assert_eq!(live.uniques.len(), 1);
    assert_eq!(live.uniques[0].column_names, vec!["email".to_string()]);
    assert!(runner.generate_migration(&[desired]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_constraint_name_is_rejected() {
    let mut runner = runner().await;
    let table = Table::new("t")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("email", "varchar").unique());
    runner.create_table(table, false).await.unwrap();
    runner.clear_sql_memory();

    let err = runner
        .create_unique_constraint("t", TableUnique::new(["email"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::InvalidSchema { .. }));
    runner
        .create_index("t", TableIndex::new(["email"]).named("IDX_email"))
        .await
        .unwrap();
    let err = runner
        .create_index("t", TableIndex::new(["id"]).named("IDX_email"))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::InvalidSchema { .. }));
    assert_eq!(reload(&mut runner, "t").await.uniques.len(), 1);
}

#[tokio::test]
async fn test_prepared_statement_runs_with_new_params() {
    init_tracing();
    let driver = SqliteDriver::open_in_memory().await.unwrap();
    let mut conn = driver.connect(ReplicationMode::Master).await.unwrap();
    conn.execute("CREATE TABLE \"kv\" (\"k\" integer, \"v\" varchar)", &[]).await.unwrap();

    let insert = conn.prepare("INSERT INTO \"kv\" VALUES (?, ?)").await.unwrap();
    for (k, v) in [(1, "a"), (2, "b")] {
        let done = conn
            .execute_prepared(&insert, &[Value::Int(k), Value::Text(v.to_string())])
            .await
            .unwrap();
        assert_eq!(done.affected, 1);
    }

    let select = conn.prepare("SELECT \"v\" FROM \"kv\" WHERE \"k\" = ?").await.unwrap();
    let found = conn.execute_prepared(&select, &[Value::Int(2)]).await.unwrap();
    assert_eq!(found.rows.len(), 1);
    assert_eq!(found.rows[0].get_string("v").as_deref(), Some("b"));
    driver.release(conn).await.unwrap();
}
