//! Shared helpers: a scripted in-process driver and tracing setup.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use sqlx_schema_runner::{
    Connection, DialectStrategy, Driver, DriverError, QueryResult, ReplicationMode, Value,
};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A failure the mock returns when a statement starts with `prefix`.
struct Failure {
    prefix: String,
    error: DriverError,
    remaining: usize,
}

#[derive(Default)]
struct Script {
    log: Vec<String>,
    failures: VecDeque<Failure>,
    connects: usize,
    releases: usize,
}

/// Driver whose connections record every statement and answer with empty
/// results, except for scripted failures.
#[derive(Clone)]
pub struct MockDriver {
    dialect: Arc<dyn DialectStrategy>,
    script: Arc<Mutex<Script>>,
}

impl MockDriver {
    pub fn new(dialect: impl DialectStrategy + 'static) -> Self {
        Self {
            dialect: Arc::new(dialect),
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// The next `times` statements starting with `prefix` fail with `error`.
    pub fn fail_on(&self, prefix: &str, error: DriverError, times: usize) {
        self.script.lock().unwrap().failures.push_back(Failure {
            prefix: prefix.to_string(),
            error,
            remaining: times,
        });
    }

    pub fn log(&self) -> Vec<String> {
        self.script.lock().unwrap().log.clone()
    }

    pub fn clear_log(&self) {
        self.script.lock().unwrap().log.clear();
    }

    pub fn connects(&self) -> usize {
        self.script.lock().unwrap().connects
    }

    pub fn releases(&self) -> usize {
        self.script.lock().unwrap().releases
    }
}

struct MockConnection {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<QueryResult, DriverError> {
        let mut script = self.script.lock().unwrap();
        script.log.push(sql.to_string());
        let failed = script
            .failures
            .iter_mut()
            .find(|f| f.remaining > 0 && sql.starts_with(&f.prefix))
            .map(|f| {
                f.remaining -= 1;
                f.error.clone()
            });
        match failed {
            Some(err) => Err(err),
            None => Ok(QueryResult::default()),
        }
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> Arc<dyn DialectStrategy> {
        self.dialect.clone()
    }

    async fn connect(&self, _mode: ReplicationMode) -> Result<Box<dyn Connection>, DriverError> {
        self.script.lock().unwrap().connects += 1;
        Ok(Box::new(MockConnection {
            script: self.script.clone(),
        }))
    }

    async fn release(&self, _connection: Box<dyn Connection>) -> Result<(), DriverError> {
        self.script.lock().unwrap().releases += 1;
        Ok(())
    }
}
