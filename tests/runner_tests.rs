//! Runner state machine, transaction replay and hooks, against a scripted driver.

mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{init_tracing, MockDriver};
use sqlx_schema_runner::{
    DriverError, IsolationLevel, ListenerError, MySqlDialect, PostgresDialect, QueryRunner, RunnerError,
    RunnerOptions, RunnerState, SqliteDialect, Table, TableCheck, TableColumn, TableExclusion, TableUnique,
    TransactionEvent, TransactionListener, Value,
};

fn runner(driver: &MockDriver) -> QueryRunner {
    init_tracing();
    QueryRunner::builder(Arc::new(driver.clone())).build()
}

#[tokio::test]
async fn test_commit_without_transaction_fails() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = runner(&driver);

    let err = runner.commit_transaction().await.unwrap_err();
    assert!(matches!(err, RunnerError::TransactionNotStarted));
    let err = runner.rollback_transaction().await.unwrap_err();
    assert!(matches!(err, RunnerError::TransactionNotStarted));
    assert!(driver.log().is_empty());
}

#[tokio::test]
async fn test_nested_start_fails() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = runner(&driver);

    runner.start_transaction(None).await.unwrap();
    assert_eq!(runner.state(), RunnerState::InTransaction);
    let err = runner.start_transaction(None).await.unwrap_err();
    assert!(matches!(err, RunnerError::TransactionAlreadyStarted));

    runner.commit_transaction().await.unwrap();
    assert_eq!(runner.state(), RunnerState::Connected);
    assert_eq!(driver.log(), vec!["START TRANSACTION", "COMMIT"]);
}

#[tokio::test]
async fn test_isolation_level_is_validated_before_anything_runs() {
    let driver = MockDriver::new(SqliteDialect::new());
    let mut runner = runner(&driver);

    let err = runner
        .start_transaction(Some(IsolationLevel::RepeatableRead))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::UnsupportedOperation { .. }));
    assert!(driver.log().is_empty());
    assert!(!runner.is_transaction_active());
}

#[tokio::test]
async fn test_released_runner_rejects_everything() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = runner(&driver);

    runner.execute("SELECT 1").await.unwrap();
    runner.release().await.unwrap();
    // Idempotent.
    runner.release().await.unwrap();
    assert_eq!(driver.releases(), 1);
    assert!(runner.is_released());

    assert!(matches!(runner.execute("SELECT 1").await, Err(RunnerError::AlreadyReleased)));
    assert!(matches!(runner.start_transaction(None).await, Err(RunnerError::AlreadyReleased)));
    assert!(matches!(runner.connect().await, Err(RunnerError::AlreadyReleased)));
    assert!(matches!(runner.has_table(&"users".into()).await, Err(RunnerError::AlreadyReleased)));
}

#[tokio::test]
async fn test_release_rolls_back_open_transaction() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = runner(&driver);

    runner.start_transaction(None).await.unwrap();
    runner.execute("INSERT INTO t VALUES (1)").await.unwrap();
    runner.release().await.unwrap();
    assert_eq!(
        driver.log(),
        vec!["START TRANSACTION", "INSERT INTO t VALUES (1)", "ROLLBACK"]
    );
}

#[tokio::test]
async fn test_query_failure_carries_statement() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    driver.fail_on("SELECT", DriverError::with_code("relation does not exist", "42P01"), 1);
    let mut runner = runner(&driver);

    let err = runner
        .query("SELECT * FROM missing WHERE id = $1", vec![Value::Int(7)])
        .await
        .unwrap_err();
    match err {
        RunnerError::QueryFailed { sql, params, source } => {
            assert_eq!(sql, "SELECT * FROM missing WHERE id = $1");
            assert_eq!(params, vec![Value::Int(7)]);
            assert!(source.has_code("42P01"));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_cockroach_commit_conflict_replays_buffer() {
    let driver = MockDriver::new(PostgresDialect::cockroach());
    let mut runner = runner(&driver);

    runner.start_transaction(None).await.unwrap();
    runner.execute("INSERT INTO a VALUES (1)").await.unwrap();
    runner.execute("INSERT INTO b VALUES (2)").await.unwrap();
    assert_eq!(runner.buffered_statements().len(), 2);

    driver.fail_on(
        "RELEASE SAVEPOINT",
        DriverError::with_code("restart transaction", "40001"),
        1,
    );
    driver.clear_log();
    runner.commit_transaction().await.unwrap();

    assert_eq!(
        driver.log(),
        vec![
            "RELEASE SAVEPOINT cockroach_restart",
            "ROLLBACK TO SAVEPOINT cockroach_restart",
            "INSERT INTO a VALUES (1)",
            "INSERT INTO b VALUES (2)",
            "RELEASE SAVEPOINT cockroach_restart",
            "COMMIT",
        ]
    );
    assert!(runner.buffered_statements().is_empty());
    assert!(!runner.is_transaction_active());
}

#[tokio::test]
async fn test_cockroach_failed_statement_is_not_replayed() {
    let driver = MockDriver::new(PostgresDialect::cockroach());
    let mut runner = runner(&driver);

    runner.start_transaction(None).await.unwrap();
    runner.execute("INSERT INTO a VALUES (1)").await.unwrap();
    driver.fail_on("INSERT INTO b", DriverError::with_code("duplicate key value", "23505"), 1);
    assert!(runner.execute("INSERT INTO b VALUES (2)").await.is_err());
    assert_eq!(runner.buffered_statements().len(), 1);

    driver.fail_on(
        "RELEASE SAVEPOINT",
        DriverError::with_code("restart transaction", "40001"),
        1,
    );
    driver.clear_log();
    runner.commit_transaction().await.unwrap();
    assert_eq!(
        driver.log(),
        vec![
            "RELEASE SAVEPOINT cockroach_restart",
            "ROLLBACK TO SAVEPOINT cockroach_restart",
            "INSERT INTO a VALUES (1)",
            "RELEASE SAVEPOINT cockroach_restart",
            "COMMIT",
        ]
    );
}

#[tokio::test]
async fn test_cockroach_retry_budget_is_bounded() {
    let driver = MockDriver::new(PostgresDialect::cockroach());
    let mut runner = QueryRunner::builder(Arc::new(driver.clone()))
        .options(RunnerOptions::default().with_max_transaction_retries(1))
        .build();

    runner.start_transaction(None).await.unwrap();
    runner.execute("INSERT INTO a VALUES (1)").await.unwrap();
    driver.fail_on(
        "RELEASE SAVEPOINT",
        DriverError::with_code("restart transaction", "40001"),
        5,
    );

    let err = runner.commit_transaction().await.unwrap_err();
    assert!(err.driver_error().unwrap().has_code("40001"));
}

#[tokio::test]
async fn test_postgres_does_not_buffer() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = runner(&driver);

    runner.start_transaction(None).await.unwrap();
    runner.execute("INSERT INTO a VALUES (1)").await.unwrap();
    assert!(runner.buffered_statements().is_empty());
    runner.rollback_transaction().await.unwrap();
}

#[tokio::test]
async fn test_busy_errors_are_retried() {
    let driver = MockDriver::new(SqliteDialect::new());
    driver.fail_on("INSERT", DriverError::with_code("database is locked", "5"), 2);
    let mut runner = QueryRunner::builder(Arc::new(driver.clone()))
        .options(RunnerOptions::default().with_busy_retry(1, 3))
        .build();

    runner.execute("INSERT INTO t VALUES (1)").await.unwrap();
    assert_eq!(driver.log().len(), 3);
}

#[tokio::test]
async fn test_busy_errors_fail_without_retry_delay() {
    let driver = MockDriver::new(SqliteDialect::new());
    driver.fail_on("INSERT", DriverError::with_code("database is locked", "5"), 1);
    let mut runner = runner(&driver);

    assert!(runner.execute("INSERT INTO t VALUES (1)").await.is_err());
    assert_eq!(driver.log().len(), 1);
}

#[tokio::test]
async fn test_statement_cache_only_on_sqlite() {
    let sqlite = MockDriver::new(SqliteDialect::new());
    let mut runner_a = runner(&sqlite);
    runner_a.execute("SELECT 1").await.unwrap();
    runner_a.execute("SELECT 1").await.unwrap();
    runner_a.execute("SELECT 2").await.unwrap();
    assert_eq!(runner_a.cached_statement_count(), 2);

    let postgres = MockDriver::new(PostgresDialect::postgres());
    let mut runner_b = runner(&postgres);
    runner_b.execute("SELECT 1").await.unwrap();
    assert_eq!(runner_b.cached_statement_count(), 0);
}

#[tokio::test]
async fn test_exclusion_on_sqlite_issues_no_sql() {
    let driver = MockDriver::new(SqliteDialect::new());
    let mut runner = runner(&driver);
    let table = Table::new("bookings").column(TableColumn::new("room", "integer"));

    let err = runner
        .create_exclusion_constraint(table, TableExclusion::new("USING gist (room WITH =)"))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::UnsupportedOperation { .. }));
    assert!(driver.log().is_empty());
    assert!(runner.get_memory_sql().is_empty());
}

#[tokio::test]
async fn test_exclusion_on_mysql_issues_no_sql() {
    let driver = MockDriver::new(MySqlDialect::new());
    let mut runner = runner(&driver);
    let table = Table::new("bookings")
        .column(TableColumn::new("room", "int"))
        .exclusion(TableExclusion::new("USING gist (room WITH =)"));

    let err = runner.create_table(table, false).await.unwrap_err();
    assert!(matches!(err, RunnerError::UnsupportedOperation { .. }));
    assert!(driver.log().is_empty());
}

#[tokio::test]
async fn test_existing_constraint_name_fails_before_sql() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = runner(&driver);
    let table = Table::new("t")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("email", "varchar").unique())
        .check(TableCheck::new("\"id\" > 0").named("CHK_positive"));
    runner.create_table(table, false).await.unwrap();
    driver.clear_log();

    let err = runner
        .create_unique_constraint("t", TableUnique::new(["email"]))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::InvalidSchema { .. }));
    let err = runner
        .create_check_constraint("t", TableCheck::new("\"id\" < 10").named("CHK_positive"))
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::InvalidSchema { .. }));
    assert!(driver.log().is_empty());

    let cached = runner.get_table(&"t".into()).await.unwrap().unwrap();
    assert_eq!(cached.uniques.len(), 1);
}

#[tokio::test]
async fn test_sql_memory_records_without_executing() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = runner(&driver);
    runner.enable_sql_memory();

    let table = Table::new("users")
        .column(TableColumn::new("id", "integer").primary())
        .column(TableColumn::new("email", "varchar").unique());
    runner.create_table(table, false).await.unwrap();

    assert!(driver.log().is_empty());
    let memory = runner.get_memory_sql();
    assert!(memory.up[0].sql.starts_with("CREATE TABLE \"users\""));
    assert!(memory.down.iter().any(|q| q.sql == "DROP TABLE \"users\""));

    runner.disable_sql_memory();
    assert!(runner.get_memory_sql().is_empty());
}

struct Recorder {
    events: Mutex<Vec<TransactionEvent>>,
}

#[async_trait]
impl TransactionListener for Recorder {
    async fn on_transaction_event(&self, event: TransactionEvent) -> Result<(), ListenerError> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

struct Veto;

#[async_trait]
impl TransactionListener for Veto {
    async fn on_transaction_event(&self, event: TransactionEvent) -> Result<(), ListenerError> {
        if event == TransactionEvent::BeforeCommit {
            return Err("commit vetoed".into());
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_listeners_see_events_in_order() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let recorder = Arc::new(Recorder {
        events: Mutex::new(Vec::new()),
    });
    let mut runner = QueryRunner::builder(Arc::new(driver.clone()))
        .listener(recorder.clone())
        .build();

    runner.start_transaction(None).await.unwrap();
    runner.commit_transaction().await.unwrap();
    runner.start_transaction(None).await.unwrap();
    runner.rollback_transaction().await.unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            TransactionEvent::BeforeStart,
            TransactionEvent::AfterStart,
            TransactionEvent::BeforeCommit,
            TransactionEvent::AfterCommit,
            TransactionEvent::BeforeRollback,
            TransactionEvent::AfterRollback,
        ]
    );
}

#[tokio::test]
async fn test_failing_listener_aborts_commit() {
    let driver = MockDriver::new(PostgresDialect::postgres());
    let mut runner = QueryRunner::builder(Arc::new(driver.clone()))
        .listener(Arc::new(Veto))
        .build();

    runner.start_transaction(None).await.unwrap();
    let err = runner.commit_transaction().await.unwrap_err();
    assert!(matches!(err, RunnerError::Listener { .. }));
    assert!(runner.is_transaction_active());
    assert!(!driver.log().contains(&"COMMIT".to_string()));
}
