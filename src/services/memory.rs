//! Conversation Memory: embeds and persists per-session turns in a sled tree,
//! retrieving the top-k nearest neighbors for a new question by cosine
//! similarity. Swappable behind this type's public methods per the
//! vector-store-coupling redesign note — callers never touch sled directly.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::TurnError;
use crate::models::memory::{MemoryMetadata, MemoryRecord, MemoryRole};
use crate::services::llm::LlmClient;

const RETRIEVAL_SEPARATOR: &str = "\n---\n";
const RETRIEVAL_CHAR_BUDGET: usize = 4000;

pub struct ConversationMemory {
    db: sled::Db,
    llm: Arc<LlmClient>,
}

impl ConversationMemory {
    pub fn open(persist_dir: &str, llm: Arc<LlmClient>) -> Result<Self, TurnError> {
        let db = sled::open(persist_dir)?;
        Ok(Self { db, llm })
    }

    pub async fn store(
        &self,
        session_id: &str,
        role: MemoryRole,
        text: &str,
        metadata: MemoryMetadata,
    ) -> Result<(), TurnError> {
        let embedding = self
            .llm
            .embed(&[text.to_string()])
            .await
            .map_err(TurnError::Llm)?
            .into_iter()
            .next()
            .unwrap_or_default();

        let record = MemoryRecord {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            text: text.to_string(),
            metadata,
            timestamp: chrono::Utc::now(),
            embedding,
        };

        let key = record_key(session_id, &record.id);
        let value = serde_json::to_vec(&record)?;
        self.db.insert(key, value)?;
        self.db.flush_async().await?;
        Ok(())
    }

    /// Top-k nearest neighbors to `query` within `session_id`, concatenated
    /// with a stable separator and truncated to a char budget (a crude stand-in
    /// for a token budget, matching the teacher's character-based truncation
    /// elsewhere in the corpus). Cold sessions return the empty string.
    pub async fn retrieve(&self, session_id: &str, query: &str, k: usize) -> Result<String, TurnError> {
        let records = self.session_records(session_id)?;
        if records.is_empty() {
            return Ok(String::new());
        }

        let query_embedding = self
            .llm
            .embed(&[query.to_string()])
            .await
            .map_err(TurnError::Llm)?
            .into_iter()
            .next()
            .unwrap_or_default();

        let mut scored: Vec<(f32, MemoryRecord)> = records
            .into_iter()
            .map(|r| (cosine_similarity(&query_embedding, &r.embedding), r))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut out = String::new();
        for (_, record) in scored.into_iter().take(k) {
            if !out.is_empty() {
                out.push_str(RETRIEVAL_SEPARATOR);
            }
            out.push_str(&format!("[{}] {}", role_label(&record.role), record.text));
            if out.len() > RETRIEVAL_CHAR_BUDGET {
                out.truncate(RETRIEVAL_CHAR_BUDGET);
                break;
            }
        }
        Ok(out)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), TurnError> {
        let prefix = format!("{session_id}\0");
        let keys: Vec<_> = self.db.scan_prefix(prefix.as_bytes()).keys().filter_map(Result::ok).collect();
        for key in keys {
            self.db.remove(key)?;
        }
        Ok(())
    }

    fn session_records(&self, session_id: &str) -> Result<Vec<MemoryRecord>, TurnError> {
        let prefix = format!("{session_id}\0");
        self.db
            .scan_prefix(prefix.as_bytes())
            .values()
            .map(|v| {
                let bytes = v?;
                serde_json::from_slice::<MemoryRecord>(&bytes).map_err(TurnError::from)
            })
            .collect()
    }
}

fn record_key(session_id: &str, record_id: &str) -> Vec<u8> {
    format!("{session_id}\0{record_id}").into_bytes()
}

fn role_label(role: &MemoryRole) -> &'static str {
    match role {
        MemoryRole::User => "user",
        MemoryRole::Assistant => "assistant",
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 { 0.0 } else { dot / (norm_a * norm_b) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn empty_vector_similarity_is_zero_not_nan() {
        let sim = cosine_similarity(&[], &[1.0]);
        assert_eq!(sim, 0.0);
    }

    #[test]
    fn record_key_namespaces_by_session() {
        let a = record_key("s1", "r1");
        let b = record_key("s2", "r1");
        assert_ne!(a, b);
    }
}
