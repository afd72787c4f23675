//! Session / SessionContext: the per-conversation state a generator instance
//! owns between turns — result-table registry, edit-mode flag, and the
//! timestamps the idle-eviction sweep keys off of.

use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;

use crate::models::result_table::ResultTable;

const DEFAULT_TABLE_CAPACITY: usize = 64;

/// Everything the Graph Orchestrator needs about the conversation this turn
/// belongs to, independent of any particular question. The result-table
/// registry is an LRU rather than an unbounded map so a long-lived session
/// asking hundreds of questions doesn't retain every row set forever.
pub struct SessionContext {
    pub session_id: String,
    pub edit_mode_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub tables: LruCache<String, ResultTable>,
    pub turn_count: u64,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, edit_mode_enabled: bool) -> Self {
        Self::with_table_capacity(session_id, edit_mode_enabled, DEFAULT_TABLE_CAPACITY)
    }

    pub fn with_table_capacity(session_id: impl Into<String>, edit_mode_enabled: bool, capacity: usize) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            edit_mode_enabled,
            created_at: now,
            last_active_at: now,
            tables: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            turn_count: 0,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
        self.turn_count += 1;
    }

    pub fn is_idle(&self, ttl: chrono::Duration) -> bool {
        Utc::now() - self.last_active_at > ttl
    }

    pub fn register_table(&mut self, table: ResultTable) {
        self.tables.put(table.table_id.clone(), table);
    }

    pub fn table(&mut self, table_id: &str) -> Option<&ResultTable> {
        self.tables.get(table_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_with_no_tables_and_zero_turns() {
        let ctx = SessionContext::new("s1", false);
        assert_eq!(ctx.turn_count, 0);
        assert!(ctx.tables.is_empty());
    }

    #[test]
    fn touch_advances_turn_count_and_last_active() {
        let mut ctx = SessionContext::new("s1", false);
        let before = ctx.last_active_at;
        ctx.touch();
        assert_eq!(ctx.turn_count, 1);
        assert!(ctx.last_active_at >= before);
    }

    #[test]
    fn idle_check_respects_ttl() {
        let ctx = SessionContext::new("s1", false);
        assert!(!ctx.is_idle(chrono::Duration::seconds(3600)));
        assert!(ctx.is_idle(chrono::Duration::seconds(-1)));
    }

    #[test]
    fn table_registry_evicts_least_recently_used_beyond_capacity() {
        let mut ctx = SessionContext::with_table_capacity("s1", false, 2);
        let table = |id: &str| ResultTable {
            table_id: id.to_string(),
            sql: "SELECT 1".into(),
            columns: vec![],
            rows: vec![],
            page_size: 10,
            generated_at: Utc::now(),
        };
        ctx.register_table(table("t1"));
        ctx.register_table(table("t2"));
        ctx.register_table(table("t3"));
        assert!(ctx.table("t1").is_none());
        assert!(ctx.table("t2").is_some());
        assert!(ctx.table("t3").is_some());
    }
}
