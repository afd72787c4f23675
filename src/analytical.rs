//! Analytical Manager: decomposes a broad question into 4-6 strategic
//! sub-questions, explores relevant columns, generates and executes SQL per
//! sub-question, and synthesizes a narrative report. Sub-questions execute
//! strictly sequentially (§5 ordering guarantee), each independent of the
//! others' success or failure.

use std::sync::Arc;
use std::time::Instant;

use crate::error::TurnError;
use crate::models::schema::SchemaContext;
use crate::models::turn::AnalyticalSubResult;
use crate::prompts::planner::{self, PlanRequest, PlanResponse, SubQuestionPlan};
use crate::prompts::synthesizer::{self, SynthesisRequest, SynthesisResponse, SynthesisSubResult};
use crate::services::llm::LlmClient;
use crate::services::sqlgen::SqlGenerationManager;

/// One sub-question's execution attempt is capped at a single auto-fix retry
/// — tighter than the standard path's `MAX_VALIDATION_ATTEMPTS`, since a
/// stuck sub-question should not dominate the whole analytical turn's budget.
const SUBQUESTION_AUTOFIX_CAP: u32 = 1;

pub struct AnalyticalManager {
    llm: Arc<LlmClient>,
    sqlgen: Arc<SqlGenerationManager>,
    client: crate::services::mysql_client::MySQLClient,
    min_subquestions: usize,
    max_subquestions: usize,
}

pub struct AnalyticalReport {
    pub results: Vec<AnalyticalSubResult>,
    pub narrative: String,
}

impl AnalyticalManager {
    pub fn new(
        llm: Arc<LlmClient>,
        sqlgen: Arc<SqlGenerationManager>,
        client: crate::services::mysql_client::MySQLClient,
        min_subquestions: usize,
        max_subquestions: usize,
    ) -> Self {
        Self { llm, sqlgen, client, min_subquestions, max_subquestions }
    }

    /// Plans sub-questions for `question` against `schema`, deduplicating
    /// near-identical ones. The caller decides whether the deduped count
    /// clears `min_subquestions` (§4.3: if not, the turn degrades to the
    /// standard path) — this method just plans and dedupes.
    pub async fn plan(&self, question: &str, schema: &SchemaContext) -> Result<Vec<SubQuestionPlan>, TurnError> {
        let request = PlanRequest { question: question.to_string(), schema_context: schema.to_llm_blob() };
        let response: PlanResponse =
            self.llm.chat_json(planner::SYSTEM_PROMPT, &request).await.map_err(TurnError::Llm)?;

        let mut deduped = response.deduplicated();
        if deduped.len() > self.max_subquestions {
            deduped.truncate(self.max_subquestions);
        }
        Ok(deduped)
    }

    pub fn has_enough_subquestions(&self, plan: &[SubQuestionPlan]) -> bool {
        plan.len() >= self.min_subquestions
    }

    /// Runs each planned sub-question in order (exploration → generation →
    /// one execution attempt with a single auto-fix retry), then synthesizes
    /// a narrative over whatever results came back. If every sub-question
    /// failed, returns `analytical_all_failed` with the first error.
    pub async fn run(
        &self,
        question: &str,
        schema: &SchemaContext,
        memory_context: &str,
        plan: &[SubQuestionPlan],
    ) -> Result<AnalyticalReport, TurnError> {
        let mut results = Vec::with_capacity(plan.len());

        for sub in plan {
            results.push(self.run_one(sub, schema, memory_context).await);
        }

        if results.iter().all(|r| r.error.is_some()) {
            let first_error = results
                .first()
                .and_then(|r| r.error.clone())
                .unwrap_or_else(|| "no sub-question produced a result".to_string());
            return Err(TurnError::AnalyticalAllFailed { first_error });
        }

        let narrative = self.synthesize(question, &results).await?;
        Ok(AnalyticalReport { results, narrative })
    }

    async fn run_one(
        &self,
        sub: &SubQuestionPlan,
        schema: &SchemaContext,
        memory_context: &str,
    ) -> AnalyticalSubResult {
        let start = Instant::now();
        let mut prior_error: Option<String> = None;

        for attempt in 0..=SUBQUESTION_AUTOFIX_CAP {
            let generated =
                match self.sqlgen.generate(&sub.question, schema, memory_context, &sub.focus_columns, prior_error.as_deref()).await {
                    Ok(g) => g,
                    Err(e) => {
                        if attempt == SUBQUESTION_AUTOFIX_CAP {
                            return AnalyticalSubResult {
                                sub_question: sub.question.clone(),
                                sql: None,
                                columns: vec![],
                                rows: vec![],
                                elapsed_ms: start.elapsed().as_millis(),
                                error: Some(e.to_string()),
                            };
                        }
                        prior_error = Some(e.to_string());
                        continue;
                    },
                };

            let sql = generated.statements.first().cloned().unwrap_or_default();
            match self.client.query(&sql).await {
                Ok((columns, rows)) => {
                    return AnalyticalSubResult {
                        sub_question: sub.question.clone(),
                        sql: Some(sql),
                        columns,
                        rows,
                        elapsed_ms: start.elapsed().as_millis(),
                        error: None,
                    };
                },
                Err(e) => {
                    if attempt == SUBQUESTION_AUTOFIX_CAP {
                        return AnalyticalSubResult {
                            sub_question: sub.question.clone(),
                            sql: Some(sql),
                            columns: vec![],
                            rows: vec![],
                            elapsed_ms: start.elapsed().as_millis(),
                            error: Some(e.to_string()),
                        };
                    }
                    prior_error = Some(e.to_string());
                },
            }
        }

        unreachable!("loop always returns within the autofix cap")
    }

    async fn synthesize(&self, question: &str, results: &[AnalyticalSubResult]) -> Result<String, TurnError> {
        let sub_results = results
            .iter()
            .filter(|r| r.error.is_none())
            .map(|r| SynthesisSubResult {
                sub_question: r.sub_question.clone(),
                sql: r.sql.clone().unwrap_or_default(),
                columns: r.columns.clone(),
                rows: r.rows.clone(),
            })
            .collect();

        let request = SynthesisRequest { question: question.to_string(), sub_results };
        let response: SynthesisResponse =
            self.llm.chat_json(synthesizer::SYSTEM_PROMPT, &request).await.map_err(TurnError::Llm)?;
        Ok(response.to_narrative())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> SchemaContext {
        SchemaContext {
            database: "shop".into(),
            table: "orders".into(),
            columns: vec![],
            indexes: vec![],
            row_count: 100,
            sample_rows: vec![],
            probes: Default::default(),
            schema_version: 1,
            analyzed_at: chrono::Utc::now(),
        }
    }

    fn llm() -> Arc<LlmClient> {
        Arc::new(LlmClient::new(crate::config::LlmConfig {
            api_base: "http://127.0.0.1:1".to_string(),
            api_key: String::new(),
            chat_model: "gpt-test".to_string(),
            embeddings_model: "embed-test".to_string(),
            llm_timeout_secs: 1,
            max_tokens: 16,
            temperature: 0.0,
        }))
    }

    fn client() -> crate::services::mysql_client::MySQLClient {
        let opts = mysql_async::Opts::from_url("mysql://u@h/shop").unwrap();
        crate::services::mysql_client::MySQLClient::new(mysql_async::Pool::new(opts))
    }

    #[test]
    fn has_enough_subquestions_respects_minimum() {
        let manager = AnalyticalManager::new(llm(), Arc::new(SqlGenerationManager::new(llm(), client())), client(), 2, 6);
        assert!(!manager.has_enough_subquestions(&[SubQuestionPlan {
            question: "only one".into(),
            intent: "other".into(),
            focus_columns: vec![],
        }]));
    }

    #[test]
    fn all_failed_results_have_no_successful_sub_question() {
        let results = vec![
            AnalyticalSubResult {
                sub_question: "a".into(),
                sql: None,
                columns: vec![],
                rows: vec![],
                elapsed_ms: 1,
                error: Some("boom".into()),
            },
            AnalyticalSubResult {
                sub_question: "b".into(),
                sql: None,
                columns: vec![],
                rows: vec![],
                elapsed_ms: 1,
                error: Some("boom again".into()),
            },
        ];
        assert!(results.iter().all(|r| r.error.is_some()));
        let _ = schema();
    }
}
