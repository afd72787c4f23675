//! MemoryRecord: one stored conversation turn in a session's vector memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub result_rowcount: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub session_id: String,
    pub role: MemoryRole,
    pub text: String,
    pub metadata: MemoryMetadata,
    pub timestamp: DateTime<Utc>,
    pub embedding: Vec<f32>,
}
