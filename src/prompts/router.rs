//! Routing scenario: classify a turn into conversational / standard / analytical.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = include_str!("router_prompt.md");

#[derive(Debug, Clone, Serialize)]
pub struct RouteRequest {
    pub question: String,
    pub memory_context: String,
    pub schema_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Conversational,
    Analytical,
    Standard,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteResponse {
    pub workflow_type: RouteDecision,
    #[serde(default)]
    pub reasoning: String,
}
