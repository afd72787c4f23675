//! LLM HTTP client module.
//!
//! A thin, stateless wrapper around an OpenAI-compatible chat-completion and
//! embeddings endpoint. The Prompt Library (`crate::prompts`) owns the actual
//! prompt text and request/response shapes per scenario; this module only
//! knows how to make the HTTP call and parse the envelope.

mod client;
mod models;

pub use client::LlmClient;
pub use models::{LlmError, LlmScenario};
