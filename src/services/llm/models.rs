//! LLM / embeddings wire types and the service-level error enum.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// Which prompt a request belongs to; used for structured logging only —
/// unlike the admin-tool precursor this crate has no per-scenario DB routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmScenario {
    Route,
    GenerateSql,
    PlanAnalytical,
    SynthesizeAnalytical,
    Verify,
}

impl LlmScenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::GenerateSql => "generate_sql",
            Self::PlanAnalytical => "plan_analytical",
            Self::SynthesizeAnalytical => "synthesize_analytical",
            Self::Verify => "verify",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::RateLimited(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ParseError(_) => ErrorKind::ParseFailed,
            _ => ErrorKind::GenerationFailed,
        }
    }
}

// ============================================================================
// OpenAI-compatible chat completion wire format
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResponseFormat {
    pub r#type: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Usage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
}

// ============================================================================
// OpenAI-compatible embeddings wire format
// ============================================================================

#[derive(Debug, Serialize)]
pub(crate) struct EmbeddingsRequest {
    pub model: String,
    pub input: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingsResponse {
    pub data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EmbeddingData {
    pub embedding: Vec<f32>,
    pub index: usize,
}
