//! Session Registry: the process-wide map from session id to the generator
//! instance (§4.10) a turn attaches to — `SessionContext` (result-table
//! registry, edit-mode flag) plus, when memory is enabled, a per-session
//! `ConversationMemory`. Concurrent turns in the same session are serialized
//! by locking the session's own mutex for the turn's duration (§5); turns in
//! different sessions proceed independently.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::TurnError;
use crate::models::session::SessionContext;
use crate::services::llm::LlmClient;
use crate::services::memory::ConversationMemory;

/// Everything a turn needs from its session: the result-table/edit-mode
/// state plus (if memory is enabled) the conversation memory instance.
pub struct SessionEntry {
    pub context: SessionContext,
    pub memory: Option<ConversationMemory>,
}

pub struct SessionRegistry {
    entries: DashMap<String, Arc<Mutex<SessionEntry>>>,
    use_memory: bool,
    memory_persist_dir: String,
    edit_mode_default: bool,
    idle_ttl: chrono::Duration,
    table_capacity: usize,
    llm: Arc<LlmClient>,
}

impl SessionRegistry {
    pub fn new(config: &Config, llm: Arc<LlmClient>) -> Self {
        Self {
            entries: DashMap::new(),
            use_memory: config.engine.use_memory,
            memory_persist_dir: config.engine.memory_persist_dir.clone(),
            edit_mode_default: config.engine.edit_mode_enabled,
            idle_ttl: chrono::Duration::seconds(config.engine.session_idle_ttl_secs as i64),
            table_capacity: 64,
            llm,
        }
    }

    /// Fetch the session's entry, creating it (and its on-disk memory store,
    /// if enabled) on first use. A session rebuilt after idle-eviction starts
    /// with an empty result-table registry but its memory is reopened from
    /// disk — conversation history across an eviction survives, result
    /// tables do not (they are the cheaper, purely in-memory artifact).
    pub fn get_or_create(&self, session_id: &str, edit_mode_override: Option<bool>) -> Result<Arc<Mutex<SessionEntry>>, TurnError> {
        if let Some(existing) = self.entries.get(session_id) {
            return Ok(Arc::clone(&existing));
        }

        let edit_mode = edit_mode_override.unwrap_or(self.edit_mode_default);
        let memory = if self.use_memory {
            let dir = format!("{}/{}", self.memory_persist_dir.trim_end_matches('/'), session_id);
            std::fs::create_dir_all(&dir).map_err(|e| {
                TurnError::GenerationFailed(format!("could not create memory directory {dir}: {e}"))
            })?;
            Some(ConversationMemory::open(&dir, Arc::clone(&self.llm))?)
        } else {
            None
        };

        let entry = Arc::new(Mutex::new(SessionEntry {
            context: SessionContext::with_table_capacity(session_id, edit_mode, self.table_capacity),
            memory,
        }));

        self.entries.insert(session_id.to_string(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Explicit session deletion: drops in-memory state and removes all
    /// persisted memory records for the session.
    pub fn delete(&self, session_id: &str) -> Result<(), TurnError> {
        if self.use_memory {
            let dir = format!("{}/{}", self.memory_persist_dir.trim_end_matches('/'), session_id);
            if std::path::Path::new(&dir).exists() {
                let memory = ConversationMemory::open(&dir, Arc::clone(&self.llm))?;
                memory.delete_session(session_id)?;
            }
        }
        self.entries.remove(session_id);
        Ok(())
    }

    /// Idle-eviction sweep: drop sessions whose last activity exceeds the
    /// configured TTL. Evicted sessions rebuild lazily on next turn per the
    /// §4.10 lifecycle note; memory on disk is untouched (only explicit
    /// deletion removes it).
    pub async fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        let stale: Vec<String> = {
            let mut ids = Vec::new();
            for entry in self.entries.iter() {
                let guard = entry.value().lock().await;
                if guard.context.is_idle(self.idle_ttl) {
                    ids.push(entry.key().clone());
                }
            }
            ids
        };
        for id in stale {
            self.entries.remove(&id);
            evicted += 1;
        }
        evicted
    }

    pub fn session_count(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &str) -> Config {
        let mut config = Config::default();
        config.database.target_url = "mysql://u@h/shop".to_string();
        config.engine.use_memory = false;
        config.engine.memory_persist_dir = dir.to_string();
        config.engine.session_idle_ttl_secs = 3600;
        config
    }

    fn test_llm() -> Arc<LlmClient> {
        Arc::new(LlmClient::new(crate::config::LlmConfig {
            api_base: "http://localhost:1".to_string(),
            api_key: String::new(),
            chat_model: "gpt-test".to_string(),
            embeddings_model: "embed-test".to_string(),
            llm_timeout_secs: 1,
            max_tokens: 16,
            temperature: 0.0,
        }))
    }

    #[test]
    fn get_or_create_returns_the_same_entry_on_second_call() {
        let registry = SessionRegistry::new(&test_config("/tmp/does-not-matter"), test_llm());
        let a = registry.get_or_create("s1", None).unwrap();
        let b = registry.get_or_create("s1", None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn distinct_sessions_get_distinct_entries() {
        let registry = SessionRegistry::new(&test_config("/tmp/does-not-matter"), test_llm());
        registry.get_or_create("s1", None).unwrap();
        registry.get_or_create("s2", None).unwrap();
        assert_eq!(registry.session_count(), 2);
    }

    #[tokio::test]
    async fn evict_idle_removes_stale_sessions_only() {
        let mut config = test_config("/tmp/does-not-matter");
        config.engine.session_idle_ttl_secs = 0;
        let registry = SessionRegistry::new(&config, test_llm());
        registry.get_or_create("s1", None).unwrap();
        // is_idle() compares against "now", and a TTL of 0 means "idle
        // immediately" once any time at all has elapsed.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let evicted = registry.evict_idle().await;
        assert_eq!(evicted, 1);
        assert_eq!(registry.session_count(), 0);
    }
}
