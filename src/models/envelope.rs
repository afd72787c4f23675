//! QueryResponse: the external-facing envelope `process_turn` renders a
//! `TurnState` into. Shaped for a CLI/library consumer, not bound to any HTTP
//! framing — see the note under External Interfaces.

use serde::{Deserialize, Serialize};

use crate::models::result_table::Pagination;
use crate::prompts::verifier::VerifyResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    Conversational,
    Sql,
    EditSql,
    Analysis,
    EditExecution,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableResult {
    pub table_id: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub pagination: Pagination,
}

/// One row in the `analysis`-typed envelope's `tables` array: a sub-question's
/// materialized, paginated result, per the External Interfaces table shape
/// (`name`, `description`, `sql`, `results`, `row_count`, `table_id`, `pagination`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTable {
    pub name: String,
    pub description: String,
    pub sql: Option<String>,
    pub columns: Vec<String>,
    pub results: Vec<serde_json::Value>,
    pub row_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    /// Set when this sub-question's generation/execution failed; the
    /// analytical report degrades gracefully rather than aborting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualizationRecommendation {
    pub chart_type: String,
    pub title: String,
    pub description: String,
    pub x_axis: Option<String>,
    pub y_axis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_y_axis: Option<String>,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    AutoCommit,
    AllOrNothing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_type: QueryType,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<TableResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<AnalysisTable>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_confirmation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_result: Option<VerifyResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization_recommendations: Option<Vec<VisualizationRecommendation>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_mode: Option<TransactionMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_performed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at_query: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_results: Option<Vec<serde_json::Value>>,
}

impl QueryResponse {
    pub fn conversational(text: impl Into<String>) -> Self {
        Self {
            query_type: QueryType::Conversational,
            text: text.into(),
            sql: None,
            results: None,
            pagination: None,
            tables: None,
            analysis_type: None,
            requires_confirmation: None,
            verification_result: None,
            visualization_recommendations: None,
            transaction_mode: None,
            rollback_performed: None,
            failed_at_query: None,
            query_results: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let mut resp = Self::conversational(message);
        resp.query_type = QueryType::Conversational;
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted_from_serialization_when_absent() {
        let resp = QueryResponse::conversational("hi there");
        let value = serde_json::to_value(&resp).unwrap();
        let obj = value.as_object().unwrap();
        assert!(!obj.contains_key("sql"));
        assert!(!obj.contains_key("results"));
        assert_eq!(obj["query_type"], "conversational");
    }
}
