//! Analytical synthesis scenario: sub-results → narrative report.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = include_str!("synthesizer_prompt.md");

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisSubResult {
    pub sub_question: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    pub question: String,
    pub sub_results: Vec<SynthesisSubResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SynthesisFinding {
    pub sub_question: String,
    pub finding: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SynthesisResponse {
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub findings: Vec<SynthesisFinding>,
    #[serde(default)]
    pub cross_cutting_insights: Vec<String>,
}

impl SynthesisResponse {
    /// Render as the flat narrative text that becomes `TurnState.comprehensive_analysis`.
    pub fn to_narrative(&self) -> String {
        let mut out = String::new();
        out.push_str(&self.executive_summary);
        if !self.findings.is_empty() {
            out.push_str("\n\n");
            for f in &self.findings {
                out.push_str(&format!("- {}: {}\n", f.sub_question, f.finding));
            }
        }
        if !self.cross_cutting_insights.is_empty() {
            out.push_str("\nCross-cutting insights:\n");
            for insight in &self.cross_cutting_insights {
                out.push_str(&format!("- {}\n", insight));
            }
        }
        out
    }
}
