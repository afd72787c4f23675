//! Response-synthesis scenario: the conversational reply and the standard
//! path's post-execution narrative are the same shape of call — "write a
//! short user-facing message about this context" — so they share one prompt
//! and one request/response pair, distinguished by `mode`.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = include_str!("responder_prompt.md");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    Conversational,
    ResultSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponderRequest {
    pub question: String,
    pub mode: ResponseMode,
    #[serde(default)]
    pub memory_context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub sample_rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponderResponse {
    #[serde(default)]
    pub text: String,
}
