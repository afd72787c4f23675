//! SQL generation scenario, used both by the standard path and — restricted
//! to a single sub-question — by the Analytical Manager.

use serde::{Deserialize, Serialize};

pub const SYSTEM_PROMPT: &str = include_str!("sqlgen_prompt.md");

pub const MULTI_STATEMENT_SEPARATOR: &str = "<----->";

#[derive(Debug, Clone, Serialize)]
pub struct SqlGenRequest {
    pub question: String,
    pub schema_context: String,
    #[serde(default)]
    pub memory_context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exploration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlGenKind {
    Select,
    Edit,
    Multi,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SqlGenResponse {
    #[serde(default)]
    pub kind: Option<SqlGenKind>,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
}

impl SqlGenResponse {
    /// Split `sql` on the multi-statement separator when `kind == multi`,
    /// otherwise return it as a single-element list.
    pub fn statements(&self) -> Vec<String> {
        if self.kind == Some(SqlGenKind::Multi) {
            self.sql
                .split(MULTI_STATEMENT_SEPARATOR)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        } else {
            vec![self.sql.trim().to_string()]
        }
    }

    pub fn needs_edit_confirmation(&self) -> bool {
        self.kind == Some(SqlGenKind::Edit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_multi_statement_sql_on_separator() {
        let resp = SqlGenResponse {
            kind: Some(SqlGenKind::Multi),
            sql: "CREATE TABLE t (id INT) <-----> INSERT INTO t VALUES (1)".into(),
            explanation: None,
        };
        assert_eq!(resp.statements(), vec!["CREATE TABLE t (id INT)", "INSERT INTO t VALUES (1)"]);
    }

    #[test]
    fn single_select_is_one_statement() {
        let resp = SqlGenResponse { kind: Some(SqlGenKind::Select), sql: "SELECT 1".into(), explanation: None };
        assert_eq!(resp.statements(), vec!["SELECT 1"]);
    }
}
