//! Execution Engine: runs single or batched SQL against the target database,
//! owns pagination of completed SELECTs, and detects schema-changing DDL so
//! the Schema Analyzer can be asked to refresh.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::TurnError;
use crate::models::result_table::{Pagination, ResultTable};
use crate::services::mysql_client::{is_ddl_statement, MySQLClient};
use crate::services::schema_analyzer::SchemaAnalyzer;

#[derive(Debug, Clone)]
pub struct SelectOutcome {
    pub table_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub total_rows: u64,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    Auto,
    Transaction,
}

#[derive(Debug, Clone)]
pub struct StatementOutcome {
    pub sql: String,
    pub success: bool,
    pub affected_rows: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EditOutcome {
    pub per_statement: Vec<StatementOutcome>,
    pub transaction: bool,
    pub rollback_performed: bool,
    pub failed_at_query: Option<usize>,
    pub schema_changed: bool,
}

pub struct ExecutionEngine {
    client: MySQLClient,
    schema_analyzer: Arc<SchemaAnalyzer>,
    statement_timeout: std::time::Duration,
}

impl ExecutionEngine {
    pub fn new(client: MySQLClient, schema_analyzer: Arc<SchemaAnalyzer>, statement_timeout_secs: u64) -> Self {
        Self { client, schema_analyzer, statement_timeout: std::time::Duration::from_secs(statement_timeout_secs) }
    }

    pub async fn execute_select(&self, sql: &str) -> Result<SelectOutcome, TurnError> {
        let start = std::time::Instant::now();
        let (columns, rows) = tokio::time::timeout(self.statement_timeout, self.client.query(sql))
            .await
            .map_err(|_| TurnError::Timeout { stage: "execute_select".into(), elapsed_ms: self.statement_timeout.as_millis() })??;
        let elapsed_ms = start.elapsed().as_millis();

        Ok(SelectOutcome {
            table_id: Uuid::new_v4().to_string(),
            total_rows: rows.len() as u64,
            columns,
            rows,
            elapsed_ms,
        })
    }

    /// Runs `sqls` either auto-committing each independently, or — when
    /// `mode = Transaction` or more than one statement is given — as a single
    /// transaction that rolls back in full on the first failure.
    pub async fn execute_edit(&self, sqls: &[String], mode: EditMode) -> Result<EditOutcome, TurnError> {
        let transactional = mode == EditMode::Transaction || sqls.len() > 1;

        let outcome = if transactional {
            self.execute_transactional(sqls).await?
        } else {
            self.execute_autocommit(sqls).await
        };

        if outcome.schema_changed {
            if let Err(e) = self.schema_analyzer.refresh().await {
                tracing::warn!(error = %e, "schema refresh after DDL did not complete cleanly");
            }
        }

        Ok(outcome)
    }

    async fn execute_autocommit(&self, sqls: &[String]) -> EditOutcome {
        let mut per_statement = Vec::with_capacity(sqls.len());
        let mut schema_changed = false;

        for sql in sqls {
            match self.client.execute(sql).await {
                Ok(affected) => {
                    schema_changed |= is_ddl_statement(sql);
                    per_statement.push(StatementOutcome { sql: sql.clone(), success: true, affected_rows: affected, error: None });
                },
                Err(e) => {
                    per_statement.push(StatementOutcome { sql: sql.clone(), success: false, affected_rows: 0, error: Some(e.to_string()) });
                },
            }
        }

        EditOutcome { per_statement, transaction: false, rollback_performed: false, failed_at_query: None, schema_changed }
    }

    async fn execute_transactional(&self, sqls: &[String]) -> Result<EditOutcome, TurnError> {
        use mysql_async::prelude::Queryable;

        let mut txn = self.client.begin_transaction().await?;
        let mut per_statement = Vec::with_capacity(sqls.len());
        let mut failed_at: Option<usize> = None;
        let mut schema_changed = false;

        for (idx, sql) in sqls.iter().enumerate() {
            if failed_at.is_some() {
                per_statement.push(StatementOutcome {
                    sql: sql.clone(),
                    success: false,
                    affected_rows: 0,
                    error: Some("skipped after earlier failure in the same transaction".to_string()),
                });
                continue;
            }

            match txn.query_iter(sql.as_str()).await {
                Ok(result) => {
                    let affected = result.affected_rows();
                    drop(result);
                    schema_changed |= is_ddl_statement(sql);
                    per_statement.push(StatementOutcome { sql: sql.clone(), success: true, affected_rows: affected, error: None });
                },
                Err(e) => {
                    failed_at = Some(idx + 1);
                    per_statement.push(StatementOutcome { sql: sql.clone(), success: false, affected_rows: 0, error: Some(e.to_string()) });
                },
            }
        }

        let rollback_performed = failed_at.is_some();
        if rollback_performed {
            txn.rollback().await?;
        } else {
            txn.commit().await?;
        }

        Ok(EditOutcome {
            per_statement,
            transaction: true,
            rollback_performed,
            failed_at_query: failed_at,
            schema_changed: schema_changed && !rollback_performed,
        })
    }

    /// Pages a previously executed SELECT. The caller (Graph Orchestrator /
    /// Session Context) owns the `ResultTable` registry; this just computes
    /// the slice and pagination metadata.
    pub fn get_page(
        &self,
        table: &ResultTable,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<serde_json::Value>, Pagination), TurnError> {
        let page_size = page_size.clamp(1, 200);
        match table.page(page, page_size) {
            Ok(pagination) => Ok((table.rows_for_page(page, page_size), pagination)),
            Err((_, total_pages)) => Err(TurnError::InvalidPage { requested: page, total_pages }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_statement_transaction_flag_matches_mode() {
        assert_eq!(EditMode::Auto, EditMode::Auto);
        assert_ne!(EditMode::Auto, EditMode::Transaction);
    }

    #[test]
    fn get_page_rejects_out_of_range_with_valid_bounds() {
        let opts = mysql_async::Opts::from_url("mysql://u@h/shop").unwrap();
        let engine = ExecutionEngine::new(
            MySQLClient::new(mysql_async::Pool::new(opts)),
            Arc::new(SchemaAnalyzer::new(
                MySQLClient::new(mysql_async::Pool::new(mysql_async::Opts::from_url("mysql://u@h/shop").unwrap())),
                "shop.orders",
            )),
            60,
        );
        let table = ResultTable {
            table_id: "t1".into(),
            sql: "SELECT * FROM orders".into(),
            columns: vec!["id".into()],
            rows: (0..10).map(|i| serde_json::json!({"id": i})).collect(),
            page_size: 5,
            generated_at: chrono::Utc::now(),
        };
        let err = engine.get_page(&table, 99, 5).unwrap_err();
        assert!(matches!(err, TurnError::InvalidPage { requested: 99, total_pages: 2 }));
    }
}
