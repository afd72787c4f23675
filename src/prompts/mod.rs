//! Prompt Library: versioned, parameterized prompt templates plus the
//! request/response shapes each LLM-backed graph node exchanges with
//! [`crate::services::llm::LlmClient`]. Each scenario gets its own module and
//! its own `.md` prompt file (`include_str!`'d, not reflected/rendered at
//! runtime) — mirroring how the analyzed-SQL diagnostics prompt lived
//! alongside its request/response types in the admin-tool precursor.

pub mod planner;
pub mod responder;
pub mod router;
pub mod sqlgen;
pub mod synthesizer;
pub mod verifier;

/// Bumped whenever a prompt's wording changes in a way that could affect
/// output shape; logged alongside each LLM call for audit purposes.
pub const PROMPT_LIBRARY_VERSION: u32 = 1;
