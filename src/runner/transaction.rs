use std::time::Duration;

use tracing::Instrument;

use crate::broadcast::TransactionEvent;
use crate::dialect::IsolationLevel;
use crate::driver::QueryResult;
use crate::error::{DriverError, Result, RunnerError};
use crate::statement::Query;

use super::{QueryRunner, RunnerState};

/// Base delay before replaying a restarted transaction; doubles per attempt.
const RESTART_BACKOFF: Duration = Duration::from_millis(100);

fn restart_delay(attempt: u32) -> Duration {
    RESTART_BACKOFF * 2u32.pow(attempt.saturating_sub(1).min(6))
}

impl QueryRunner {
    /// Opens a transaction.
    ///
    /// The isolation level is checked against the dialect before anything
    /// runs; listeners see `BeforeStart` ahead of the begin statements and
    /// `AfterStart` once they went through.
    pub async fn start_transaction(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        self.ensure_usable()?;
        if self.is_transaction_active() {
            return Err(RunnerError::TransactionAlreadyStarted);
        }
        let statements = self.dialect.begin_transaction(isolation)?;
        self.connect().await?;

        let span = tracing::debug_span!("runner.transaction", action = "start", isolation = ?isolation);
        async {
            self.broadcaster.broadcast(TransactionEvent::BeforeStart).await?;
            for sql in &statements {
                self.run(sql, &[]).await.map_err(|err| self.failed(err, sql, Vec::new()))?;
            }
            self.state = RunnerState::InTransaction;
            self.replay_buffer.clear();
            self.restarts = 0;
            self.broadcaster.broadcast(TransactionEvent::AfterStart).await
        }
        .instrument(span)
        .await
    }

    /// Commits the active transaction.
    ///
    /// On a restart dialect a serialization failure while committing rolls
    /// back to the restart savepoint, replays the buffered statements and
    /// commits again, within `max_transaction_retries`.
    pub async fn commit_transaction(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if !self.is_transaction_active() {
            return Err(RunnerError::TransactionNotStarted);
        }
        let statements = self.dialect.commit_transaction();
        let restartable = self.dialect.restart_savepoint().is_some();

        let span = tracing::debug_span!("runner.transaction", action = "commit");
        async {
            self.broadcaster.broadcast(TransactionEvent::BeforeCommit).await?;
            'commit: loop {
                for sql in &statements {
                    match self.run(sql, &[]).await {
                        Ok(_) => {}
                        Err(err) if restartable && self.dialect.is_serialization_failure(&err) => {
                            self.restart_transaction(err, Query::new(sql.as_str())).await?;
                            continue 'commit;
                        }
                        Err(err) => return Err(self.failed(err, sql, Vec::new())),
                    }
                }
                break;
            }
            self.replay_buffer.clear();
            self.state = RunnerState::Connected;
            self.broadcaster.broadcast(TransactionEvent::AfterCommit).await
        }
        .instrument(span)
        .await
    }

    pub async fn rollback_transaction(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if !self.is_transaction_active() {
            return Err(RunnerError::TransactionNotStarted);
        }
        let statements = self.dialect.rollback_transaction();

        let span = tracing::debug_span!("runner.transaction", action = "rollback");
        async {
            self.broadcaster.broadcast(TransactionEvent::BeforeRollback).await?;
            for sql in &statements {
                self.run(sql, &[]).await.map_err(|err| self.failed(err, sql, Vec::new()))?;
            }
            self.replay_buffer.clear();
            self.state = RunnerState::Connected;
            self.broadcaster.broadcast(TransactionEvent::AfterRollback).await
        }
        .instrument(span)
        .await
    }

    /// Rolls back to the restart savepoint and replays the buffer.
    ///
    /// Returns the result of the last replayed statement. `failing` is the
    /// statement that hit the conflict, reported if the retry budget runs out.
    pub(super) async fn restart_transaction(
        &mut self,
        mut cause: DriverError,
        mut failing: Query,
    ) -> Result<Option<QueryResult>> {
        let Some(savepoint) = self.dialect.restart_savepoint() else {
            return Err(self.failed(cause, &failing.sql, failing.params));
        };
        let rollback = format!("ROLLBACK TO SAVEPOINT {}", savepoint);
        loop {
            if self.restarts >= self.options.max_transaction_retries {
                return Err(self.failed(cause, &failing.sql, failing.params));
            }
            self.restarts += 1;
            let attempt = self.restarts;

            self.run(&rollback, &[])
                .await
                .map_err(|err| self.failed(err, &rollback, Vec::new()))?;
            tokio::time::sleep(restart_delay(attempt)).await;

            let buffered = self.replay_buffer.clone();
            tracing::debug!(attempt, statements = buffered.len(), "replaying transaction after serialization failure");
            let mut last = None;
            let mut conflict = None;
            for query in buffered {
                match self.run(&query.sql, &query.params).await {
                    Ok(result) => last = Some(result),
                    Err(err) if self.dialect.is_serialization_failure(&err) => {
                        conflict = Some((err, query));
                        break;
                    }
                    Err(err) => return Err(self.failed(err, &query.sql, query.params)),
                }
            }
            match conflict {
                None => return Ok(last),
                Some((err, query)) => {
                    cause = err;
                    failing = query;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_delay_doubles() {
        assert_eq!(restart_delay(1), Duration::from_millis(100));
        assert_eq!(restart_delay(2), Duration::from_millis(200));
        assert_eq!(restart_delay(3), Duration::from_millis(400));
        assert_eq!(restart_delay(50), Duration::from_millis(6400));
    }
}
