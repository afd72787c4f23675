//! Thin wrapper over a `mysql_async::Pool` for the target database: raw
//! query/execute plus the row-to-JSON conversion the Execution Engine and
//! Schema Analyzer both depend on.

use mysql_async::{prelude::Queryable, Pool};

use crate::error::TurnError;

#[derive(Clone)]
pub struct MySQLClient {
    pool: Pool,
}

impl MySQLClient {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Run a single statement and return (columns, rows-as-JSON-objects).
    pub async fn query(&self, sql: &str) -> Result<(Vec<String>, Vec<serde_json::Value>), TurnError> {
        let mut conn = self.pool.get_conn().await.map_err(TurnError::TargetDb)?;

        let rows: Vec<mysql_async::Row> = conn.query(sql).await.map_err(|e| {
            TurnError::SqlExecutionFailed { sql: sql.to_string(), message: e.to_string() }
        })?;

        drop(conn);
        Ok(process_query_result(sql, &rows))
    }

    /// Run a statement with no meaningful result set (DDL, or a write whose
    /// affected-row count is all the caller needs).
    pub async fn execute(&self, sql: &str) -> Result<u64, TurnError> {
        let mut conn = self.pool.get_conn().await.map_err(TurnError::TargetDb)?;
        let result = conn.query_iter(sql).await.map_err(|e| {
            TurnError::SqlExecutionFailed { sql: sql.to_string(), message: e.to_string() }
        })?;
        let affected = result.affected_rows();
        drop(result);
        Ok(affected)
    }

    /// Acquire a dedicated connection for transactional multi-statement edits.
    pub async fn begin_transaction(&self) -> Result<mysql_async::Transaction<'static>, TurnError> {
        let conn = self.pool.get_conn().await.map_err(TurnError::TargetDb)?;
        conn.start_transaction(mysql_async::TxOpts::default())
            .await
            .map_err(TurnError::TargetDb)
    }
}

/// Leading `-- line` and `/* block */` comments, stripped before DDL
/// detection since the statement "begins (after whitespace/comments) with"
/// one of the tracked keywords.
static LEADING_COMMENT: once_cell::sync::Lazy<regex::Regex> = once_cell::sync::Lazy::new(|| {
    regex::Regex::new(r"^(\s*(--[^\n]*\n|/\*.*?\*/))*\s*").unwrap()
});

/// True for statements that alter schema shape — DDL bumps the schema
/// version so cached queries written against the old shape are evicted.
/// Matches the exact statement set this system tracks: CREATE/DROP of
/// TABLE/INDEX/VIEW/SCHEMA/SEQUENCE, ALTER TABLE, TRUNCATE TABLE, RENAME.
pub fn is_ddl_statement(sql: &str) -> bool {
    let stripped = LEADING_COMMENT.replace(sql, "");
    let upper = stripped.trim_start().to_ascii_uppercase();

    const OBJECTS: [&str; 5] = ["TABLE", "INDEX", "VIEW", "SCHEMA", "SEQUENCE"];

    let create_or_drop = ["CREATE", "DROP"].iter().any(|verb| {
        OBJECTS.iter().any(|obj| upper.starts_with(&format!("{verb} {obj}")))
    });

    create_or_drop
        || upper.starts_with("ALTER TABLE")
        || upper.starts_with("TRUNCATE TABLE")
        || upper.starts_with("RENAME ")
        || upper.starts_with("RENAME TABLE")
}

fn process_query_result(sql: &str, rows: &[mysql_async::Row]) -> (Vec<String>, Vec<serde_json::Value>) {
    if rows.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let columns: Vec<String> = rows[0].columns_ref().iter().map(|c| c.name_str().to_string()).collect();
    tracing::debug!(sql, rows = rows.len(), cols = columns.len(), "query executed");

    let json_rows = rows
        .iter()
        .map(|row| {
            let mut obj = serde_json::Map::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value = row.as_ref(idx).map(value_to_json).unwrap_or(serde_json::Value::Null);
                obj.insert(name.clone(), value);
            }
            serde_json::Value::Object(obj)
        })
        .collect();

    (columns, json_rows)
}

fn value_to_json(value: &mysql_async::Value) -> serde_json::Value {
    match value {
        mysql_async::Value::NULL => serde_json::Value::Null,
        mysql_async::Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => serde_json::Value::String(s.to_string()),
            Err(_) => serde_json::Value::String(String::from_utf8_lossy(bytes).to_string()),
        },
        mysql_async::Value::Int(i) => serde_json::Value::Number((*i).into()),
        mysql_async::Value::UInt(u) => serde_json::Value::Number((*u).into()),
        mysql_async::Value::Float(f) => serde_json::Number::from_f64(*f as f64)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        mysql_async::Value::Double(d) => serde_json::Number::from_f64(*d)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        mysql_async::Value::Date(year, month, day, hour, minute, second, micro) => {
            serde_json::Value::String(if *hour == 0 && *minute == 0 && *second == 0 && *micro == 0 {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}")
            })
        },
        mysql_async::Value::Time(neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + (*hours as u32);
            serde_json::Value::String(format!(
                "{}{}:{:02}:{:02}",
                if *neg { "-" } else { "" },
                total_hours,
                minutes,
                seconds
            ))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_ddl_case_insensitively() {
        assert!(is_ddl_statement("alter table orders add column x int"));
        assert!(is_ddl_statement("  DROP TABLE orders"));
        assert!(!is_ddl_statement("SELECT * FROM orders"));
        assert!(!is_ddl_statement("UPDATE orders SET status = 'x'"));
    }

    #[test]
    fn recognizes_statements_after_a_leading_comment() {
        assert!(is_ddl_statement("-- bump the schema\nCREATE INDEX idx_x ON orders (x)"));
    }

    #[test]
    fn statements_outside_the_tracked_set_are_not_ddl() {
        assert!(!is_ddl_statement("CREATE USER 'x'@'%'"));
        assert!(!is_ddl_statement("INSERT INTO orders VALUES (1)"));
    }

    #[test]
    fn null_value_converts_to_json_null() {
        assert_eq!(value_to_json(&mysql_async::Value::NULL), serde_json::Value::Null);
    }

    #[test]
    fn integer_value_converts_to_json_number() {
        assert_eq!(value_to_json(&mysql_async::Value::Int(-42)), serde_json::json!(-42));
    }
}
