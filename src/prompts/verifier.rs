//! Verification scenario: assess a write statement's safety/correctness.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = include_str!("verifier_prompt.md");

#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest {
    pub sql: String,
    pub schema_context: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    SafeToExecute,
    RequiresReview,
    DoNotExecute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    #[serde(default)]
    pub is_safe: bool,
    #[serde(default)]
    pub is_correct: bool,
    #[serde(default)]
    pub safety_issues: Vec<String>,
    #[serde(default)]
    pub correctness_issues: Vec<String>,
    #[serde(default)]
    pub impact_assessment: String,
    #[serde(default)]
    pub estimated_affected_records: i64,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub verdict: Verdict,
    #[serde(default)]
    pub explanation: String,
}
