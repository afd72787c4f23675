//! TurnState: the immutable record threaded through the Graph Orchestrator's
//! node functions. Per the redesign note on coroutine-based graphs with
//! mutable `TypedDict` state, node functions are pure `(&TurnState) ->
//! Result<TurnState, TurnError>`; the orchestrator owns the current state and
//! replaces it wholesale on each transition.

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;
use crate::prompts::planner::SubQuestionPlan;
use crate::prompts::verifier::VerifyResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    Conversational,
    Standard,
    Analytical,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticalSubResult {
    pub sub_question: String,
    pub sql: Option<String>,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub elapsed_ms: u128,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&crate::error::TurnError> for TurnErrorInfo {
    fn from(e: &crate::error::TurnError) -> Self {
        Self { kind: e.kind(), message: e.to_string() }
    }
}

/// One or more SQL statements, generated together (multi-statement = transaction).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SqlPlan {
    Single(String),
    Multi(Vec<String>),
}

impl SqlPlan {
    pub fn statements(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::Multi(v) => v.clone(),
        }
    }

    pub fn joined(&self) -> String {
        self.statements().join(crate::prompts::sqlgen::MULTI_STATEMENT_SEPARATOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnState {
    pub session_id: String,
    pub question: String,
    pub schema_context: Option<String>,
    pub memory_context: String,
    pub workflow_type: WorkflowType,
    pub sql: Option<SqlPlan>,
    pub results: Vec<serde_json::Value>,
    pub columns: Vec<String>,
    pub error: Option<TurnErrorInfo>,
    pub validation_attempts: u32,
    pub is_conversational: bool,
    pub requires_analysis: bool,
    pub needs_edit_confirmation: bool,
    pub analytical_questions: Vec<SubQuestionPlan>,
    pub analytical_results: Vec<AnalyticalSubResult>,
    pub comprehensive_analysis: Option<String>,
    pub response_text: Option<String>,
    /// Set on the edit-confirmation branch so `render_response` can carry the
    /// Verifier's merged verdict into the envelope without re-deriving it.
    pub verification: Option<VerifyResponse>,
    /// Set when `sql`/`results`/`columns` came from the Query Cache rather
    /// than a fresh execution, so the response assembly step knows not to
    /// write the same row straight back into the cache.
    pub from_cache: bool,
}

impl TurnState {
    pub fn new(session_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            question: question.into(),
            schema_context: None,
            memory_context: String::new(),
            workflow_type: WorkflowType::Standard,
            sql: None,
            results: Vec::new(),
            columns: Vec::new(),
            error: None,
            validation_attempts: 0,
            is_conversational: false,
            requires_analysis: false,
            needs_edit_confirmation: false,
            analytical_questions: Vec::new(),
            analytical_results: Vec::new(),
            comprehensive_analysis: None,
            response_text: None,
            verification: None,
            from_cache: false,
        }
    }

    pub fn with_error(mut self, err: &crate::error::TurnError) -> Self {
        self.workflow_type = WorkflowType::Error;
        self.error = Some(err.into());
        self
    }
}
