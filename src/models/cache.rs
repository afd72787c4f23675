//! CacheEntry: one fingerprinted (question, schema_version) -> result pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub question: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub schema_version: u64,
}
