//! Transaction hook points.
//!
//! Listeners are registered on the runner builder. Every listener sees every
//! event; the listeners for one event run concurrently and the runner waits
//! for all of them before it continues.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::error::{Result, RunnerError};

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionEvent {
    BeforeStart,
    AfterStart,
    BeforeCommit,
    AfterCommit,
    BeforeRollback,
    AfterRollback,
}

impl fmt::Display for TransactionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionEvent::BeforeStart => "before transaction start",
            TransactionEvent::AfterStart => "after transaction start",
            TransactionEvent::BeforeCommit => "before transaction commit",
            TransactionEvent::AfterCommit => "after transaction commit",
            TransactionEvent::BeforeRollback => "before transaction rollback",
            TransactionEvent::AfterRollback => "after transaction rollback",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait TransactionListener: Send + Sync {
    async fn on_transaction_event(&self, event: TransactionEvent) -> std::result::Result<(), ListenerError>;
}

#[derive(Clone, Default)]
pub(crate) struct Broadcaster {
    listeners: Vec<Arc<dyn TransactionListener>>,
}

impl Broadcaster {
    pub(crate) fn subscribe(&mut self, listener: Arc<dyn TransactionListener>) {
        self.listeners.push(listener);
    }

    pub(crate) async fn broadcast(&self, event: TransactionEvent) -> Result<()> {
        if self.listeners.is_empty() {
            return Ok(());
        }
        let calls = self.listeners.iter().map(|l| l.on_transaction_event(event));
        try_join_all(calls).await.map_err(|err| RunnerError::Listener {
            message: format!("{}: {}", event, err),
        })?;
        Ok(())
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Recorder {
        delay: u64,
        seen: Arc<Mutex<Vec<(u64, TransactionEvent)>>>,
    }

    #[async_trait]
    impl TransactionListener for Recorder {
        async fn on_transaction_event(&self, event: TransactionEvent) -> std::result::Result<(), ListenerError> {
            tokio::time::sleep(Duration::from_millis(self.delay)).await;
            self.seen.lock().unwrap().push((self.delay, event));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl TransactionListener for Failing {
        async fn on_transaction_event(&self, _event: TransactionEvent) -> std::result::Result<(), ListenerError> {
            Err("audit log unavailable".into())
        }
    }

    #[tokio::test]
    async fn test_all_listeners_are_awaited() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut broadcaster = Broadcaster::default();
        broadcaster.subscribe(Arc::new(Recorder { delay: 30, seen: seen.clone() }));
        broadcaster.subscribe(Arc::new(Recorder { delay: 1, seen: seen.clone() }));
        broadcaster.broadcast(TransactionEvent::BeforeCommit).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        // Concurrent: the short listener finishes first.
        assert_eq!(seen[0], (1, TransactionEvent::BeforeCommit));
    }

    #[test]
    fn test_no_listeners_is_a_no_op() {
        let broadcaster = Broadcaster::default();
        tokio_test::block_on(broadcaster.broadcast(TransactionEvent::BeforeStart)).unwrap();
    }

    #[tokio::test]
    async fn test_listener_failure_is_reported() {
        let mut broadcaster = Broadcaster::default();
        broadcaster.subscribe(Arc::new(Failing));
        let err = broadcaster.broadcast(TransactionEvent::AfterStart).await.unwrap_err();
        assert!(matches!(err, RunnerError::Listener { .. }));
        assert!(err.to_string().contains("audit log unavailable"));
    }
}
