//! Analytical planning scenario: broad question → 4-6 sub-questions.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = include_str!("planner_prompt.md");

#[derive(Debug, Clone, Serialize)]
pub struct PlanRequest {
    pub question: String,
    pub schema_context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubQuestionPlan {
    pub question: String,
    #[serde(default = "default_intent")]
    pub intent: String,
    #[serde(default)]
    pub focus_columns: Vec<String>,
}

fn default_intent() -> String {
    "other".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanResponse {
    #[serde(default)]
    pub sub_questions: Vec<SubQuestionPlan>,
}

impl PlanResponse {
    /// Deduplicate sub-questions by normalized question text, preserving
    /// planner order. Per the Analytical Manager contract, duplicates are
    /// removed before the minimum-count check runs.
    pub fn deduplicated(&self) -> Vec<SubQuestionPlan> {
        crate::utils::collection_ext::unique_ordered_by(self.sub_questions.clone(), |q| {
            q.question.trim().to_lowercase()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(q: &str) -> SubQuestionPlan {
        SubQuestionPlan { question: q.to_string(), intent: "other".into(), focus_columns: vec![] }
    }

    #[test]
    fn deduplicates_case_and_whitespace_insensitively() {
        let resp = PlanResponse {
            sub_questions: vec![
                plan("Top suppliers by revenue"),
                plan("  top suppliers by revenue  "),
                plan("Revenue trend over time"),
            ],
        };
        let deduped = resp.deduplicated();
        assert_eq!(deduped.len(), 2);
    }
}
