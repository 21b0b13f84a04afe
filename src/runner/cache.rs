use indexmap::IndexMap;

use crate::driver::PreparedStatement;

/// Prepared statements keyed by SQL text.
///
/// Bounded by insertion order: once full, the oldest insertion goes first.
/// Lookups do not refresh an entry.
#[derive(Debug, Default)]
pub(crate) struct StatementCache {
    capacity: usize,
    entries: IndexMap<String, PreparedStatement>,
}

impl StatementCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: IndexMap::with_capacity(capacity.min(64)),
        }
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub(crate) fn get(&self, sql: &str) -> Option<PreparedStatement> {
        self.entries.get(sql).cloned()
    }

    pub(crate) fn insert(&mut self, statement: PreparedStatement) {
        if !self.is_enabled() {
            return;
        }
        if !self.entries.contains_key(&statement.sql) && self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(statement.sql.clone(), statement);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(sql: &str) -> PreparedStatement {
        PreparedStatement::new(sql, ())
    }

    #[test]
    fn test_oldest_insertion_is_evicted() {
        let mut cache = StatementCache::new(2);
        cache.insert(stmt("SELECT 1"));
        cache.insert(stmt("SELECT 2"));
        // A hit does not protect the entry.
        assert!(cache.get("SELECT 1").is_some());
        cache.insert(stmt("SELECT 3"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("SELECT 1").is_none());
        assert!(cache.get("SELECT 2").is_some());
        assert!(cache.get("SELECT 3").is_some());
    }

    #[test]
    fn test_reinsert_does_not_evict() {
        let mut cache = StatementCache::new(2);
        cache.insert(stmt("SELECT 1"));
        cache.insert(stmt("SELECT 2"));
        cache.insert(stmt("SELECT 2"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("SELECT 1").is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let mut cache = StatementCache::new(0);
        cache.insert(stmt("SELECT 1"));
        assert_eq!(cache.len(), 0);
        assert!(!cache.is_enabled());
    }
}
