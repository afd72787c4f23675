//! Crate-wide error taxonomy.
//!
//! `TurnError` never crosses the public `process_turn` boundary as an `Err` —
//! the Graph Orchestrator catches every variant at `handle_error` and renders
//! it into a `QueryResponse` envelope. It is the `Result<T, E>` plumbing used
//! between node functions and the services they call.

use serde::{Deserialize, Serialize};

/// The taxonomy a `TurnError` is tagged with. Mirrors the error kinds a
/// caller needs to branch on; `TurnError::kind()` projects onto this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RoutingFailed,
    GenerationFailed,
    ParseFailed,
    SqlExecutionFailed,
    TransactionFailed,
    InvalidPage,
    SchemaRefreshFailed,
    AnalyticalAllFailed,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoutingFailed => "routing_failed",
            Self::GenerationFailed => "generation_failed",
            Self::ParseFailed => "parse_failed",
            Self::SqlExecutionFailed => "sql_execution_failed",
            Self::TransactionFailed => "transaction_failed",
            Self::InvalidPage => "invalid_page",
            Self::SchemaRefreshFailed => "schema_refresh_failed",
            Self::AnalyticalAllFailed => "analytical_all_failed",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("routing failed: {0}")]
    RoutingFailed(String),

    #[error("SQL generation failed: {0}")]
    GenerationFailed(String),

    #[error("could not parse LLM response: {0}")]
    ParseFailed(String),

    #[error("SQL execution failed: {sql}: {message}")]
    SqlExecutionFailed { sql: String, message: String },

    #[error("transaction aborted at statement {failed_at_query}: {message}")]
    TransactionFailed { failed_at_query: usize, message: String },

    #[error("invalid page {requested}, valid range is 1..={total_pages}")]
    InvalidPage { requested: u32, total_pages: u32 },

    #[error("schema refresh failed: {0}")]
    SchemaRefreshFailed(String),

    #[error("all analytical sub-questions failed: {first_error}")]
    AnalyticalAllFailed { first_error: String },

    #[error("{stage} timed out after {elapsed_ms}ms")]
    Timeout { stage: String, elapsed_ms: u128 },

    #[error("turn cancelled")]
    Cancelled,

    #[error("target database error: {0}")]
    TargetDb(#[from] mysql_async::Error),

    #[error("metadata store error: {0}")]
    MetadataDb(#[from] sqlx::Error),

    #[error("embedded store error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("LLM request error: {0}")]
    Llm(#[from] crate::services::llm::LlmError),
}

impl TurnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RoutingFailed(_) => ErrorKind::RoutingFailed,
            Self::GenerationFailed(_) => ErrorKind::GenerationFailed,
            Self::ParseFailed(_) => ErrorKind::ParseFailed,
            Self::SqlExecutionFailed { .. } => ErrorKind::SqlExecutionFailed,
            Self::TransactionFailed { .. } => ErrorKind::TransactionFailed,
            Self::InvalidPage { .. } => ErrorKind::InvalidPage,
            Self::SchemaRefreshFailed(_) => ErrorKind::SchemaRefreshFailed,
            Self::AnalyticalAllFailed { .. } => ErrorKind::AnalyticalAllFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TargetDb(_) => ErrorKind::SqlExecutionFailed,
            Self::MetadataDb(_) => ErrorKind::SqlExecutionFailed,
            Self::Sled(_) => ErrorKind::GenerationFailed,
            Self::Serde(_) => ErrorKind::ParseFailed,
            Self::Llm(e) => e.kind(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Llm(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type TurnResult<T> = Result<T, TurnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_as_str() {
        let err = TurnError::InvalidPage { requested: 9, total_pages: 3 };
        assert_eq!(err.kind().as_str(), "invalid_page");
    }

    #[test]
    fn sql_error_maps_to_sql_execution_failed() {
        let err = TurnError::SqlExecutionFailed { sql: "SELECT 1".into(), message: "boom".into() };
        assert_eq!(err.kind(), ErrorKind::SqlExecutionFailed);
    }
}
