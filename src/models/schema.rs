//! SchemaContext: the derived, process-scoped artifact Schema Analyzer
//! produces for one target table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub is_primary_key: bool,
    pub foreign_key_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
}

/// A probe's observed values: either a small enumerated set (low cardinality)
/// or a min/max bound (numeric/date columns).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ColumnProbe {
    DistinctValues(Vec<String>),
    Range { min: String, max: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaContext {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub row_count: u64,
    /// Up to 10 representative rows, column name -> stringified value.
    pub sample_rows: Vec<HashMap<String, String>>,
    pub probes: HashMap<String, ColumnProbe>,
    /// Monotonic counter bumped by the Execution Engine on any detected DDL.
    pub schema_version: u64,
    pub analyzed_at: DateTime<Utc>,
}

impl SchemaContext {
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.database, self.table)
    }

    /// Render the LLM-ready context blob per the external-interface layout:
    /// a header, column list, row-count/size summary, constraints, sample
    /// rows, and a closing recommendations line.
    pub fn to_llm_blob(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("DATABASE TABLE ANALYSIS: {}\n", self.qualified_name()));
        out.push_str(&format!(
            "BASIC INFORMATION: db={}, table={}, analysis_date={}\n",
            self.database,
            self.table,
            self.analyzed_at.to_rfc3339()
        ));
        out.push_str(&format!(
            "TABLE STRUCTURE: {} columns, types: {}\n",
            self.columns.len(),
            self.columns.iter().map(|c| c.data_type.as_str()).collect::<Vec<_>>().join(", ")
        ));
        out.push_str("COLUMNS:\n");
        for col in &self.columns {
            let mut flags = Vec::new();
            if col.is_primary_key {
                flags.push("pk".to_string());
            }
            if let Some(fk) = &col.foreign_key_to {
                flags.push(format!("fk→{}", fk));
            }
            let flag_str = if flags.is_empty() { String::new() } else { format!(" [{}]", flags.join(", ")) };
            out.push_str(&format!(
                "  {}: {} (Nullable: {}){}\n",
                col.name, col.data_type, col.nullable, flag_str
            ));
        }
        out.push_str(&format!("DATA ANALYSIS: row_count={}\n", self.row_count));
        out.push_str("CONSTRAINTS AND INDEXES:\n");
        for idx in &self.indexes {
            out.push_str(&format!(
                "  {} ({}){}\n",
                idx.name,
                idx.columns.join(", "),
                if idx.is_unique { " UNIQUE" } else { "" }
            ));
        }
        out.push_str("RELATIONSHIPS:\n");
        for col in self.columns.iter().filter(|c| c.foreign_key_to.is_some()) {
            out.push_str(&format!("  {} -> {}\n", col.name, col.foreign_key_to.as_ref().unwrap()));
        }
        out.push_str(&format!("SAMPLE DATA: {} rows shown\n", self.sample_rows.len()));
        for row in self.sample_rows.iter().take(10) {
            out.push_str(&format!("  {:?}\n", row));
        }
        out.push_str("RECOMMENDATIONS: prefer indexed columns in WHERE clauses; use LIMIT for exploratory queries.\n");
        out
    }

    /// One-line summary used by the router, which only needs a gist of the
    /// schema rather than the full blob.
    pub fn to_summary(&self) -> String {
        format!(
            "{} ({} columns, {} rows): {}",
            self.qualified_name(),
            self.columns.len(),
            self.row_count,
            self.columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ")
        )
    }

    /// Render the "Observed values" prompt section from column exploration probes.
    pub fn exploration_section(&self, focus_columns: &[String]) -> Option<String> {
        if focus_columns.is_empty() {
            return None;
        }
        let mut out = String::from("Observed values:\n");
        let mut any = false;
        for col in focus_columns {
            if let Some(probe) = self.probes.get(col) {
                any = true;
                match probe {
                    ColumnProbe::DistinctValues(values) => {
                        out.push_str(&format!("  {}: {}\n", col, values.join(", ")));
                    },
                    ColumnProbe::Range { min, max } => {
                        out.push_str(&format!("  {}: range [{}, {}]\n", col, min, max));
                    },
                }
            }
        }
        any.then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_context() -> SchemaContext {
        SchemaContext {
            database: "shop".into(),
            table: "orders".into(),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    data_type: "BIGINT".into(),
                    nullable: false,
                    default: None,
                    is_primary_key: true,
                    foreign_key_to: None,
                },
                ColumnInfo {
                    name: "country".into(),
                    data_type: "VARCHAR".into(),
                    nullable: true,
                    default: None,
                    is_primary_key: false,
                    foreign_key_to: None,
                },
            ],
            indexes: vec![],
            row_count: 5000,
            sample_rows: vec![],
            probes: HashMap::from([(
                "country".to_string(),
                ColumnProbe::DistinctValues(vec!["US".into(), "DE".into()]),
            )]),
            schema_version: 1,
            analyzed_at: Utc::now(),
        }
    }

    #[test]
    fn llm_blob_contains_required_sections() {
        let ctx = sample_context();
        let blob = ctx.to_llm_blob();
        for marker in [
            "DATABASE TABLE ANALYSIS",
            "BASIC INFORMATION",
            "TABLE STRUCTURE",
            "COLUMNS:",
            "DATA ANALYSIS",
            "CONSTRAINTS AND INDEXES",
            "RELATIONSHIPS",
            "SAMPLE DATA",
            "RECOMMENDATIONS",
        ] {
            assert!(blob.contains(marker), "missing section: {marker}");
        }
        assert!(blob.contains("[pk]"));
    }

    #[test]
    fn exploration_section_only_for_probed_columns() {
        let ctx = sample_context();
        assert!(ctx.exploration_section(&["country".to_string()]).unwrap().contains("US, DE"));
        assert!(ctx.exploration_section(&["missing".to_string()]).is_none());
        assert!(ctx.exploration_section(&[]).is_none());
    }
}
