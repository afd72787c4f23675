//! SQL Generation Manager: turns (question, schema, memory, exploration) into
//! one or more SQL statements, with an auto-fix loop driven by the
//! Execution Engine's error text.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::TurnError;
use crate::models::schema::{ColumnProbe, SchemaContext};
use crate::prompts::sqlgen::{self, SqlGenKind, SqlGenRequest, SqlGenResponse};
use crate::services::llm::LlmClient;
use crate::services::mysql_client::MySQLClient;

const DEFAULT_PROBE_LIMIT: u32 = 30;

pub struct GeneratedSql {
    pub statements: Vec<String>,
    pub needs_edit_confirmation: bool,
    pub explanation: Option<String>,
}

pub struct SqlGenerationManager {
    llm: Arc<LlmClient>,
    client: MySQLClient,
    /// Per-(schema_version, column) probe cache, since exploration is
    /// explicitly cacheable "for the session's schema_version" per the contract.
    probe_cache: Mutex<HashMap<(u64, String), ColumnProbe>>,
}

impl SqlGenerationManager {
    pub fn new(llm: Arc<LlmClient>, client: MySQLClient) -> Self {
        Self { llm, client, probe_cache: Mutex::new(HashMap::new()) }
    }

    pub async fn generate(
        &self,
        question: &str,
        schema: &SchemaContext,
        memory_context: &str,
        focus_columns: &[String],
        prior_error: Option<&str>,
    ) -> Result<GeneratedSql, TurnError> {
        let exploration = if focus_columns.is_empty() {
            None
        } else {
            Some(self.explore(schema, focus_columns).await?)
        };

        let request = SqlGenRequest {
            question: question.to_string(),
            schema_context: schema.to_llm_blob(),
            memory_context: memory_context.to_string(),
            exploration,
            prior_error: prior_error.map(|s| s.to_string()),
        };

        let response: SqlGenResponse =
            self.llm.chat_json(sqlgen::SYSTEM_PROMPT, &request).await.map_err(TurnError::Llm)?;

        if response.sql.trim().is_empty() {
            return Err(TurnError::GenerationFailed(format!(
                "LLM returned no SQL for question: {question}"
            )));
        }

        Ok(GeneratedSql {
            statements: response.statements(),
            needs_edit_confirmation: response.needs_edit_confirmation(),
            explanation: response.explanation.clone(),
        })
    }

    /// Probe `focus_columns` for their observed values, using the schema's
    /// own probes where present and falling back to a fresh `DISTINCT` query
    /// (cached per schema_version) otherwise.
    async fn explore(&self, schema: &SchemaContext, focus_columns: &[String]) -> Result<String, TurnError> {
        if let Some(section) = schema.exploration_section(focus_columns) {
            return Ok(section);
        }

        let mut out = String::from("Observed values:\n");
        for column in focus_columns {
            let probe = self.probe_for(schema, column).await?;
            match probe {
                ColumnProbe::DistinctValues(values) => {
                    out.push_str(&format!("  {}: {}\n", column, values.join(", ")));
                },
                ColumnProbe::Range { min, max } => {
                    out.push_str(&format!("  {}: range [{}, {}]\n", column, min, max));
                },
            }
        }
        Ok(out)
    }

    /// Drops cached probes keyed to a schema_version other than the current
    /// one. Called by the periodic cleanup task rather than on every schema
    /// refresh, since a probe for a stale version is simply never looked up
    /// again (the key includes the version) and costs nothing to leave
    /// behind between sweeps.
    pub async fn prune_stale_probes(&self, current_schema_version: u64) {
        self.probe_cache.lock().await.retain(|(version, _), _| *version == current_schema_version);
    }

    async fn probe_for(&self, schema: &SchemaContext, column: &str) -> Result<ColumnProbe, TurnError> {
        let key = (schema.schema_version, column.to_string());
        if let Some(cached) = self.probe_cache.lock().await.get(&key) {
            return Ok(cached.clone());
        }

        let limit = if column.to_ascii_lowercase().contains("country") { 50 } else { DEFAULT_PROBE_LIMIT };
        let sql = format!("SELECT DISTINCT {} AS v FROM {} LIMIT {}", column, schema.qualified_name(), limit);
        let (_, rows) = self.client.query(&sql).await?;
        let values: Vec<String> =
            rows.into_iter().filter_map(|r| r.get("v").and_then(|v| v.as_str().map(str::to_string))).collect();

        let probe = ColumnProbe::DistinctValues(values);
        self.probe_cache.lock().await.insert(key, probe.clone());
        Ok(probe)
    }
}

pub fn needs_verification(kind: Option<SqlGenKind>) -> bool {
    matches!(kind, Some(SqlGenKind::Edit) | Some(SqlGenKind::Multi))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_and_multi_kinds_require_verification() {
        assert!(needs_verification(Some(SqlGenKind::Edit)));
        assert!(needs_verification(Some(SqlGenKind::Multi)));
        assert!(!needs_verification(Some(SqlGenKind::Select)));
        assert!(!needs_verification(None));
    }
}
