//! Verifier: a deterministic pre-check that cannot be overridden by the LLM's
//! structured verdict, followed by the LLM call itself for the softer
//! safety/correctness narrative.

use std::sync::Arc;

use regex::Regex;

use crate::error::TurnError;
use crate::prompts::verifier::{self, VerifyRequest, VerifyResponse, Verdict};
use crate::services::llm::LlmClient;

pub struct Verifier {
    llm: Arc<LlmClient>,
    target_table: String,
}

impl Verifier {
    pub fn new(llm: Arc<LlmClient>, target_table: String) -> Self {
        Self { llm, target_table }
    }

    pub async fn verify(&self, sql: &str, schema_blob: &str) -> Result<VerifyResponse, TurnError> {
        if let Some(report) = deterministic_block(sql, &self.target_table) {
            return Ok(report);
        }

        let request = VerifyRequest { sql: sql.to_string(), schema_context: schema_blob.to_string() };
        let mut response: VerifyResponse =
            self.llm.chat_json(verifier::SYSTEM_PROMPT, &request).await.map_err(TurnError::Llm)?;

        // The deterministic floor cannot be downgraded by the model: if the
        // LLM somehow returns SAFE_TO_EXECUTE for a statement the pre-check
        // would have blocked, the pre-check already short-circuited above.
        // Here we only tighten REQUIRES_REVIEW when the estimate is large.
        if response.verdict == Verdict::SafeToExecute && response.estimated_affected_records > 10_000 {
            response.verdict = Verdict::RequiresReview;
        }

        Ok(response)
    }
}

/// Minimal deterministic safe set forcing `DO_NOT_EXECUTE` regardless of what
/// an LLM verdict would say: unrestricted UPDATE/DELETE, DROP/TRUNCATE of the
/// analyzed table, and constraint-disabling statements.
fn deterministic_block(sql: &str, target_table: &str) -> Option<VerifyResponse> {
    let normalized = sql.trim();
    let upper = normalized.to_ascii_uppercase();

    let unrestricted_write = (upper.starts_with("UPDATE") || upper.starts_with("DELETE"))
        && !upper.contains("WHERE");

    let table_name = target_table.rsplit('.').next().unwrap_or(target_table);
    let drop_or_truncate_target = {
        let re = Regex::new(&format!(
            r"(?i)^(DROP\s+TABLE|TRUNCATE\s+TABLE)\s+`?{}`?",
            regex::escape(table_name)
        ))
        .ok();
        re.map(|r| r.is_match(normalized)).unwrap_or(false)
    };

    let disables_constraints = upper.contains("DISABLE") || upper.contains("DROP CONSTRAINT");

    if unrestricted_write || drop_or_truncate_target || disables_constraints {
        let issue = if unrestricted_write {
            "statement would affect every row: no WHERE clause".to_string()
        } else if drop_or_truncate_target {
            format!("statement drops or truncates the analyzed table {target_table}")
        } else {
            "statement disables or drops a constraint".to_string()
        };

        return Some(VerifyResponse {
            is_safe: false,
            is_correct: true,
            safety_issues: vec![issue.clone()],
            correctness_issues: vec![],
            impact_assessment: "blocked by deterministic safety pre-check".to_string(),
            estimated_affected_records: -1,
            recommendations: vec!["add a WHERE clause scoping the affected rows".to_string()],
            verdict: Verdict::DoNotExecute,
            explanation: issue,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrestricted_delete_is_blocked() {
        let report = deterministic_block("DELETE FROM orders", "shop.orders").unwrap();
        assert_eq!(report.verdict, Verdict::DoNotExecute);
    }

    #[test]
    fn scoped_delete_passes_the_deterministic_check() {
        assert!(deterministic_block("DELETE FROM orders WHERE id = 5", "shop.orders").is_none());
    }

    #[test]
    fn drop_of_target_table_is_blocked() {
        let report = deterministic_block("DROP TABLE orders", "shop.orders").unwrap();
        assert_eq!(report.verdict, Verdict::DoNotExecute);
    }

    #[test]
    fn drop_of_unrelated_table_is_not_blocked_by_the_deterministic_check() {
        assert!(deterministic_block("DROP TABLE scratch_tmp", "shop.orders").is_none());
    }

    #[test]
    fn disabling_constraints_is_blocked() {
        let report = deterministic_block("ALTER TABLE orders DISABLE TRIGGER ALL", "shop.orders").unwrap();
        assert_eq!(report.verdict, Verdict::DoNotExecute);
    }
}
