//! Graph Orchestrator: the state machine wiring every other component into
//! `process_turn`. Per the redesign note on coroutine-based graphs with
//! mutable state, node functions here are plain `async fn(&self, &TurnState,
//! ...) -> Result<TurnState, TurnError>` free methods, composed by an
//! explicit `match` over `workflow_type` in `try_process_turn` rather than a
//! generic graph-library DSL — the node set is small and fixed. Side effects
//! that don't belong on the turn's own record (result-table registration,
//! pagination, the Query Cache, chart recommendation) live in
//! `render_response`, the step that converts a finished `TurnState` into the
//! external `QueryResponse` envelope.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::analytical::AnalyticalManager;
use crate::error::TurnError;
use crate::models::envelope::{AnalysisTable, QueryResponse, QueryType, TableResult, TransactionMode};
use crate::models::memory::{MemoryMetadata, MemoryRole};
use crate::models::result_table::ResultTable;
use crate::models::schema::{ColumnInfo, SchemaContext};
use crate::models::session::SessionContext;
use crate::models::turn::{SqlPlan, TurnState, WorkflowType};
use crate::prompts::responder::{self, ResponderRequest, ResponderResponse, ResponseMode};
use crate::prompts::router::{self, RouteDecision, RouteRequest, RouteResponse};
use crate::prompts::verifier::{Verdict, VerifyResponse};
use crate::services::cache::QueryCache;
use crate::services::chart::ChartRecommender;
use crate::services::execution::{EditMode, ExecutionEngine};
use crate::services::llm::LlmClient;
use crate::services::schema_analyzer::SchemaAnalyzer;
use crate::services::sqlgen::{GeneratedSql, SqlGenerationManager};
use crate::services::verifier::Verifier;
use crate::session::SessionRegistry;

pub struct GraphOrchestrator {
    sessions: Arc<SessionRegistry>,
    schema_analyzer: Arc<SchemaAnalyzer>,
    sqlgen: Arc<SqlGenerationManager>,
    execution: Arc<ExecutionEngine>,
    verifier: Arc<Verifier>,
    cache: Arc<QueryCache>,
    analytical: Arc<AnalyticalManager>,
    llm: Arc<LlmClient>,
    use_memory: bool,
    use_cache: bool,
    max_validation_attempts: u32,
    page_size_default: u32,
}

impl GraphOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: Arc<SessionRegistry>,
        schema_analyzer: Arc<SchemaAnalyzer>,
        sqlgen: Arc<SqlGenerationManager>,
        execution: Arc<ExecutionEngine>,
        verifier: Arc<Verifier>,
        cache: Arc<QueryCache>,
        analytical: Arc<AnalyticalManager>,
        llm: Arc<LlmClient>,
        use_memory: bool,
        use_cache: bool,
        max_validation_attempts: u32,
        page_size_default: u32,
    ) -> Self {
        Self {
            sessions,
            schema_analyzer,
            sqlgen,
            execution,
            verifier,
            cache,
            analytical,
            llm,
            use_memory,
            use_cache,
            max_validation_attempts,
            page_size_default,
        }
    }

    /// Entry point for one user turn. Never returns an error-shaped `Result`
    /// to the caller: every failure is rendered into an error-flavored
    /// `QueryResponse` by `handle_error` before it crosses this boundary.
    pub async fn process_turn(&self, session_id: &str, question: &str, edit_mode_override: Option<bool>) -> QueryResponse {
        match self.try_process_turn(session_id, question, edit_mode_override).await {
            Ok(resp) => resp,
            Err(e) => self.handle_error(session_id, question, &e),
        }
    }

    /// Re-submits generated statements for actual execution, per the
    /// edit-mode confirmation contract — a caller that received
    /// `query_type=edit_sql, requires_confirmation=true` calls this to run them.
    /// Not part of the per-turn `TurnState` graph: §6 treats confirmation and
    /// pagination as separate public contracts, not additional nodes.
    pub async fn confirm_edit(&self, session_id: &str, sqls: &[String], transactional: bool) -> QueryResponse {
        match self.try_confirm_edit(session_id, sqls, transactional).await {
            Ok(resp) => resp,
            Err(e) => Self::operation_error(&e),
        }
    }

    pub async fn get_page(&self, session_id: &str, table_id: &str, page: u32, page_size: u32) -> QueryResponse {
        match self.try_get_page(session_id, table_id, page, page_size).await {
            Ok(resp) => resp,
            Err(e) => Self::operation_error(&e),
        }
    }

    async fn try_process_turn(
        &self,
        session_id: &str,
        question: &str,
        edit_mode_override: Option<bool>,
    ) -> Result<QueryResponse, TurnError> {
        let entry = self.sessions.get_or_create(session_id, edit_mode_override)?;
        let mut guard = entry.lock().await;
        guard.context.touch();
        let edit_mode_enabled = guard.context.edit_mode_enabled;

        let schema = self.schema_analyzer.get_or_analyze().await?;

        let memory_context = match &guard.memory {
            Some(memory) if self.use_memory => memory.retrieve(session_id, question, 3).await?,
            _ => String::new(),
        };

        let mut state = TurnState::new(session_id, question);
        state.schema_context = Some(schema.to_llm_blob());
        state.memory_context = memory_context;

        state = self.node_route(&state, &schema).await?;

        state = if state.requires_analysis {
            let attempted = self.node_analytical(&state, &schema).await?;
            if attempted.workflow_type == WorkflowType::Analytical {
                attempted
            } else {
                self.node_standard(&attempted, &schema, edit_mode_enabled).await?
            }
        } else {
            match state.workflow_type {
                WorkflowType::Conversational => self.node_conversational(&state).await?,
                WorkflowType::Standard | WorkflowType::Analytical | WorkflowType::Error => {
                    self.node_standard(&state, &schema, edit_mode_enabled).await?
                },
            }
        };

        let response = self.render_response(&state, &schema, &mut guard.context).await?;

        if self.use_memory {
            if let Some(memory) = &guard.memory {
                let metadata = MemoryMetadata {
                    question: Some(question.to_string()),
                    sql: response.sql.clone(),
                    result_rowcount: response.pagination.as_ref().map(|p| p.total_rows),
                };
                memory.store(session_id, MemoryRole::User, question, metadata).await?;
                memory.store(session_id, MemoryRole::Assistant, &response.text, MemoryMetadata::default()).await?;
            }
        }

        Ok(response)
    }

    /// Node: ask the router LLM which workflow this turn belongs to.
    async fn node_route(&self, state: &TurnState, schema: &SchemaContext) -> Result<TurnState, TurnError> {
        let mut next = state.clone();
        let request = RouteRequest {
            question: state.question.clone(),
            memory_context: state.memory_context.clone(),
            schema_summary: schema.to_summary(),
        };
        let response: RouteResponse =
            self.llm.chat_json(router::SYSTEM_PROMPT, &request).await.map_err(|e| TurnError::RoutingFailed(e.to_string()))?;

        next.workflow_type = match response.workflow_type {
            RouteDecision::Conversational => WorkflowType::Conversational,
            RouteDecision::Analytical => WorkflowType::Analytical,
            RouteDecision::Standard => WorkflowType::Standard,
        };
        next.requires_analysis = response.workflow_type == RouteDecision::Analytical;
        Ok(next)
    }

    /// Node: answer a conversational turn directly, no SQL involved.
    async fn node_conversational(&self, state: &TurnState) -> Result<TurnState, TurnError> {
        let mut next = state.clone();
        let request = ResponderRequest {
            question: state.question.clone(),
            mode: ResponseMode::Conversational,
            memory_context: state.memory_context.clone(),
            sql: None,
            row_count: None,
            sample_rows: vec![],
        };
        let response: ResponderResponse =
            self.llm.chat_json(responder::SYSTEM_PROMPT, &request).await.map_err(TurnError::Llm)?;
        next.is_conversational = true;
        next.response_text = Some(response.text);
        Ok(next)
    }

    /// Node: plan and run a multi-sub-question analytical report. If the plan
    /// doesn't clear `min_subquestions`, degrades by handing back `state`
    /// with `workflow_type` reset to `Standard` so the caller falls through
    /// to `node_standard` instead.
    async fn node_analytical(&self, state: &TurnState, schema: &SchemaContext) -> Result<TurnState, TurnError> {
        let mut next = state.clone();
        let plan = self.analytical.plan(&state.question, schema).await?;
        if !self.analytical.has_enough_subquestions(&plan) {
            next.workflow_type = WorkflowType::Standard;
            return Ok(next);
        }

        let report = self.analytical.run(&state.question, schema, &state.memory_context, &plan).await?;
        next.analytical_questions = plan;
        next.analytical_results = report.results;
        next.comprehensive_analysis = Some(report.narrative);
        Ok(next)
    }

    /// Node: the standard SELECT path — cache lookup, then a
    /// generate/execute loop with up to `max_validation_attempts` auto-fix
    /// retries fed by the execution error, handing off to
    /// `node_edit_generation` the moment the model produces a
    /// multi-statement or edit-kind plan.
    async fn node_standard(&self, state: &TurnState, schema: &SchemaContext, edit_mode_enabled: bool) -> Result<TurnState, TurnError> {
        let mut next = state.clone();
        next.workflow_type = WorkflowType::Standard;

        if self.use_cache {
            if let Some(hit) = self.cache.get(&state.session_id, &state.question, schema.schema_version).await? {
                next.sql = Some(SqlPlan::Single(hit.sql));
                next.columns = hit.columns;
                next.results = hit.rows;
                next.from_cache = true;
                return self.node_generate_response(&next).await;
            }
        }

        let mut prior_error: Option<String> = None;
        let mut attempts: u32 = 0;

        loop {
            let generated = self.sqlgen.generate(&state.question, schema, &state.memory_context, &[], prior_error.as_deref()).await?;

            if generated.needs_edit_confirmation || generated.statements.len() > 1 {
                return self.node_edit_generation(&next, schema, edit_mode_enabled, generated).await;
            }

            let sql = generated.statements.into_iter().next().unwrap_or_default();
            match self.execution.execute_select(&sql).await {
                Ok(outcome) => {
                    next.sql = Some(SqlPlan::Single(sql));
                    next.columns = outcome.columns;
                    next.results = outcome.rows;
                    next.validation_attempts = attempts;
                    next.error = None;
                    return self.node_generate_response(&next).await;
                },
                Err(e) => {
                    attempts += 1;
                    if attempts > self.max_validation_attempts {
                        return Err(e);
                    }
                    prior_error = Some(e.to_string());
                    next.validation_attempts = attempts;
                },
            }
        }
    }

    /// Node: either decline (edit mode off) or verify the generated
    /// statement(s) and hand back a turn awaiting confirmation.
    async fn node_edit_generation(
        &self,
        state: &TurnState,
        schema: &SchemaContext,
        edit_mode_enabled: bool,
        generated: GeneratedSql,
    ) -> Result<TurnState, TurnError> {
        let mut next = state.clone();

        if !edit_mode_enabled {
            next.is_conversational = true;
            next.response_text =
                Some(format!("This session does not have edit mode enabled, so I can't make changes for: {}", state.question));
            return Ok(next);
        }

        let schema_blob = state.schema_context.clone().unwrap_or_else(|| schema.to_llm_blob());
        let verification = self.verify_statements(&generated.statements, &schema_blob).await?;

        let statements = generated.statements;
        next.sql = Some(if statements.len() > 1 {
            SqlPlan::Multi(statements)
        } else {
            SqlPlan::Single(statements.into_iter().next().unwrap_or_default())
        });
        next.response_text =
            Some(generated.explanation.unwrap_or_else(|| "Review the generated statement before it runs.".to_string()));
        next.needs_edit_confirmation = true;
        next.verification = Some(verification);
        Ok(next)
    }

    async fn verify_statements(&self, statements: &[String], schema_blob: &str) -> Result<VerifyResponse, TurnError> {
        let mut worst: Option<VerifyResponse> = None;
        for stmt in statements {
            let v = self.verifier.verify(stmt, schema_blob).await?;
            worst = Some(match worst {
                None => v,
                Some(prev) => merge_verify(prev, v),
            });
        }
        Ok(worst.unwrap_or(VerifyResponse {
            is_safe: true,
            is_correct: true,
            safety_issues: vec![],
            correctness_issues: vec![],
            impact_assessment: String::new(),
            estimated_affected_records: 0,
            recommendations: vec![],
            verdict: Verdict::SafeToExecute,
            explanation: String::new(),
        }))
    }

    /// Node: summarize a successful SELECT's results in natural language.
    /// Terminal for the standard path — `render_response` takes it from here.
    async fn node_generate_response(&self, state: &TurnState) -> Result<TurnState, TurnError> {
        let mut next = state.clone();
        let sql = next.sql.as_ref().map(SqlPlan::joined).unwrap_or_default();
        let total_rows = next.results.len() as u64;
        let sample: Vec<_> = next.results.iter().take(5).cloned().collect();

        let request = ResponderRequest {
            question: state.question.clone(),
            mode: ResponseMode::ResultSummary,
            memory_context: String::new(),
            sql: Some(sql),
            row_count: Some(total_rows),
            sample_rows: sample,
        };
        let response: ResponderResponse =
            self.llm.chat_json(responder::SYSTEM_PROMPT, &request).await.map_err(TurnError::Llm)?;
        next.response_text = Some(response.text);
        Ok(next)
    }

    /// Converts a finished `TurnState` into the external envelope. Owns every
    /// side effect that isn't part of the turn's own record: result-table
    /// registration, pagination, the Query Cache write-back, and chart
    /// recommendation.
    async fn render_response(
        &self,
        state: &TurnState,
        schema: &SchemaContext,
        ctx: &mut SessionContext,
    ) -> Result<QueryResponse, TurnError> {
        if state.needs_edit_confirmation {
            let mut resp = QueryResponse::conversational(state.response_text.clone().unwrap_or_default());
            resp.query_type = QueryType::EditSql;
            resp.sql = state.sql.as_ref().map(SqlPlan::joined);
            resp.requires_confirmation = Some(true);
            resp.verification_result = state.verification.clone();
            return Ok(resp);
        }

        if state.is_conversational {
            return Ok(QueryResponse::conversational(state.response_text.clone().unwrap_or_default()));
        }

        match state.workflow_type {
            WorkflowType::Analytical => self.render_analytical(state, ctx),
            _ => self.render_select(state, schema, ctx).await,
        }
    }

    fn render_analytical(&self, state: &TurnState, ctx: &mut SessionContext) -> Result<QueryResponse, TurnError> {
        let mut tables = Vec::with_capacity(state.analytical_results.len());

        for sub in &state.analytical_results {
            if let Some(err) = &sub.error {
                tables.push(AnalysisTable {
                    name: sub.sub_question.clone(),
                    description: sub.sub_question.clone(),
                    sql: sub.sql.clone(),
                    columns: vec![],
                    results: vec![],
                    row_count: 0,
                    table_id: None,
                    pagination: None,
                    error: Some(err.clone()),
                });
                continue;
            }

            let table = ResultTable {
                table_id: Uuid::new_v4().to_string(),
                sql: sub.sql.clone().unwrap_or_default(),
                columns: sub.columns.clone(),
                rows: sub.rows.clone(),
                page_size: self.page_size_default,
                generated_at: Utc::now(),
            };
            let row_count = table.total_rows();
            let (page_rows, pagination) = self.execution.get_page(&table, 1, self.page_size_default)?;
            let table_id = table.table_id.clone();
            ctx.register_table(table);

            tables.push(AnalysisTable {
                name: sub.sub_question.clone(),
                description: sub.sub_question.clone(),
                sql: sub.sql.clone(),
                columns: sub.columns.clone(),
                results: page_rows,
                row_count,
                table_id: Some(table_id),
                pagination: Some(pagination),
                error: None,
            });
        }

        let mut resp = QueryResponse::conversational(state.comprehensive_analysis.clone().unwrap_or_default());
        resp.query_type = QueryType::Analysis;
        resp.tables = Some(tables);
        resp.analysis_type = Some("multi_query".to_string());
        Ok(resp)
    }

    async fn render_select(&self, state: &TurnState, schema: &SchemaContext, ctx: &mut SessionContext) -> Result<QueryResponse, TurnError> {
        let sql = state.sql.as_ref().map(SqlPlan::joined).unwrap_or_default();
        let table = ResultTable {
            table_id: Uuid::new_v4().to_string(),
            sql: sql.clone(),
            columns: state.columns.clone(),
            rows: state.results.clone(),
            page_size: self.page_size_default,
            generated_at: Utc::now(),
        };
        let (page_rows, pagination) = self.execution.get_page(&table, 1, self.page_size_default)?;

        if !state.from_cache && self.use_cache {
            self.cache.put(&state.session_id, &state.question, &sql, &state.columns, &table.rows, schema.schema_version).await?;
        }
        ctx.register_table(table);

        let relevant_columns: Vec<ColumnInfo> = schema.columns.iter().filter(|c| state.columns.contains(&c.name)).cloned().collect();
        let chart = ChartRecommender::recommend(&relevant_columns, &page_rows);

        let mut resp = QueryResponse::conversational(state.response_text.clone().unwrap_or_default());
        resp.query_type = QueryType::Sql;
        resp.sql = Some(sql.clone());
        resp.results = Some(TableResult {
            table_id: pagination.table_id.clone(),
            sql,
            columns: state.columns.clone(),
            rows: page_rows,
            pagination: pagination.clone(),
        });
        resp.pagination = Some(pagination);
        if chart.is_visualizable {
            resp.visualization_recommendations = Some(chart.recommendations);
        }
        Ok(resp)
    }

    async fn try_confirm_edit(&self, session_id: &str, sqls: &[String], transactional: bool) -> Result<QueryResponse, TurnError> {
        let entry = self.sessions.get_or_create(session_id, None)?;
        let mut guard = entry.lock().await;
        guard.context.touch();

        let mode = if transactional { EditMode::Transaction } else { EditMode::Auto };
        let outcome = self.execution.execute_edit(sqls, mode).await?;

        let text = if outcome.rollback_performed {
            "The transaction was rolled back after a statement failed.".to_string()
        } else {
            "The edit completed.".to_string()
        };

        let mut resp = QueryResponse::conversational(text);
        resp.query_type = QueryType::EditExecution;
        resp.transaction_mode = Some(if outcome.transaction { TransactionMode::AllOrNothing } else { TransactionMode::AutoCommit });
        resp.rollback_performed = Some(outcome.rollback_performed);
        resp.failed_at_query = outcome.failed_at_query;
        resp.query_results = Some(
            outcome
                .per_statement
                .iter()
                .map(|s| serde_json::json!({ "sql": s.sql, "success": s.success, "affected_rows": s.affected_rows, "error": s.error }))
                .collect(),
        );
        Ok(resp)
    }

    async fn try_get_page(&self, session_id: &str, table_id: &str, page: u32, page_size: u32) -> Result<QueryResponse, TurnError> {
        let entry = self.sessions.get_or_create(session_id, None)?;
        let mut guard = entry.lock().await;
        guard.context.touch();

        let table = guard
            .context
            .table(table_id)
            .cloned()
            .ok_or(TurnError::InvalidPage { requested: page, total_pages: 0 })?;
        let (rows, pagination) = self.execution.get_page(&table, page, page_size)?;

        let mut resp = QueryResponse::conversational(String::new());
        resp.query_type = QueryType::Sql;
        resp.sql = Some(table.sql.clone());
        resp.results = Some(TableResult {
            table_id: pagination.table_id.clone(),
            sql: table.sql.clone(),
            columns: table.columns.clone(),
            rows,
            pagination: pagination.clone(),
        });
        resp.pagination = Some(pagination);
        Ok(resp)
    }

    /// Terminal node for `process_turn`: builds an `Error`-tagged `TurnState`
    /// (the fourth `workflow_type`, reached whenever a node function's error
    /// propagates past the orchestrator's own recovery) and renders it.
    fn handle_error(&self, session_id: &str, question: &str, err: &TurnError) -> QueryResponse {
        tracing::warn!(kind = ?err.kind(), error = %err, "turn ended in error");
        let state = TurnState::new(session_id, question).with_error(err);
        let message = state.error.as_ref().map(|e| e.message.clone()).unwrap_or_else(|| err.to_string());
        Self::error_response(err, &message)
    }

    /// `confirm_edit`/`get_page` sit outside the `TurnState` graph (§6), so
    /// their failures format directly from the `TurnError` rather than
    /// round-tripping through a turn record.
    fn operation_error(err: &TurnError) -> QueryResponse {
        tracing::warn!(kind = ?err.kind(), error = %err, "operation ended in error");
        Self::error_response(err, &err.to_string())
    }

    fn error_response(err: &TurnError, message: &str) -> QueryResponse {
        let mut resp = QueryResponse::error(format!("Something went wrong: {message}"));
        if let TurnError::TransactionFailed { failed_at_query, .. } = err {
            resp.transaction_mode = Some(TransactionMode::AllOrNothing);
            resp.rollback_performed = Some(true);
            resp.failed_at_query = Some(*failed_at_query);
        }
        resp
    }
}

fn merge_verify(a: VerifyResponse, b: VerifyResponse) -> VerifyResponse {
    let verdict = worse_verdict(a.verdict, b.verdict);
    VerifyResponse {
        is_safe: a.is_safe && b.is_safe,
        is_correct: a.is_correct && b.is_correct,
        safety_issues: [a.safety_issues, b.safety_issues].concat(),
        correctness_issues: [a.correctness_issues, b.correctness_issues].concat(),
        impact_assessment: if a.impact_assessment.is_empty() { b.impact_assessment } else { format!("{}; {}", a.impact_assessment, b.impact_assessment) },
        estimated_affected_records: a.estimated_affected_records.max(b.estimated_affected_records),
        recommendations: [a.recommendations, b.recommendations].concat(),
        verdict,
        explanation: if a.explanation.is_empty() { b.explanation } else { format!("{}; {}", a.explanation, b.explanation) },
    }
}

fn worse_verdict(a: Verdict, b: Verdict) -> Verdict {
    fn rank(v: Verdict) -> u8 {
        match v {
            Verdict::SafeToExecute => 0,
            Verdict::RequiresReview => 1,
            Verdict::DoNotExecute => 2,
        }
    }
    if rank(a) >= rank(b) { a } else { b }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worse_verdict_prefers_do_not_execute() {
        assert_eq!(worse_verdict(Verdict::SafeToExecute, Verdict::DoNotExecute), Verdict::DoNotExecute);
        assert_eq!(worse_verdict(Verdict::RequiresReview, Verdict::SafeToExecute), Verdict::RequiresReview);
    }

    #[test]
    fn merge_verify_concatenates_issue_lists() {
        let a = VerifyResponse {
            is_safe: true,
            is_correct: true,
            safety_issues: vec!["a".into()],
            correctness_issues: vec![],
            impact_assessment: "fine".into(),
            estimated_affected_records: 10,
            recommendations: vec![],
            verdict: Verdict::SafeToExecute,
            explanation: "ok".into(),
        };
        let b = VerifyResponse {
            is_safe: false,
            is_correct: true,
            safety_issues: vec!["b".into()],
            correctness_issues: vec![],
            impact_assessment: "risky".into(),
            estimated_affected_records: 500,
            recommendations: vec![],
            verdict: Verdict::RequiresReview,
            explanation: "careful".into(),
        };
        let merged = merge_verify(a, b);
        assert_eq!(merged.safety_issues, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(merged.verdict, Verdict::RequiresReview);
        assert_eq!(merged.estimated_affected_records, 500);
        assert!(!merged.is_safe);
    }

    #[test]
    fn with_error_tags_the_turn_as_the_error_workflow() {
        let state = TurnState::new("s1", "drop everything")
            .with_error(&TurnError::GenerationFailed("no sql produced".to_string()));
        assert_eq!(state.workflow_type, WorkflowType::Error);
        assert_eq!(state.error.as_ref().unwrap().kind, crate::error::ErrorKind::GenerationFailed);
    }
}
