//! Chart Recommender: a deterministic, rule-based advisor over a result
//! set's shape — no LLM call, matching the contract's description of fixed
//! heuristics rather than a generative recommendation.

use serde::{Deserialize, Serialize};

use crate::models::envelope::VisualizationRecommendation;
use crate::models::schema::ColumnInfo;

const MAX_PIE_CATEGORIES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum ColumnShape {
    Numeric,
    Temporal,
    Categorical,
}

#[derive(Debug, Clone)]
pub struct ChartRecommendation {
    pub is_visualizable: bool,
    pub reason: Option<String>,
    pub recommendations: Vec<VisualizationRecommendation>,
}

pub struct ChartRecommender;

impl ChartRecommender {
    pub fn recommend(columns: &[ColumnInfo], sample_rows: &[serde_json::Value]) -> ChartRecommendation {
        if sample_rows.is_empty() || columns.len() < 2 {
            return ChartRecommendation {
                is_visualizable: false,
                reason: Some("not enough columns or rows to chart".to_string()),
                recommendations: vec![],
            };
        }

        let shapes: Vec<(String, ColumnShape)> =
            columns.iter().map(|c| (c.name.clone(), classify(&c.data_type))).collect();

        let temporal = shapes.iter().find(|(_, s)| *s == ColumnShape::Temporal);
        let numeric: Vec<&(String, ColumnShape)> = shapes.iter().filter(|(_, s)| *s == ColumnShape::Numeric).collect();
        let categorical: Vec<&(String, ColumnShape)> =
            shapes.iter().filter(|(_, s)| *s == ColumnShape::Categorical).collect();

        let mut recommendations = Vec::new();

        if let (Some((time_col, _)), Some((value_col, _))) = (temporal, numeric.first()) {
            recommendations.push(VisualizationRecommendation {
                chart_type: "line".to_string(),
                title: format!("{value_col} over {time_col}"),
                description: "a time column is present; trends read best as a line chart".to_string(),
                x_axis: Some(time_col.clone()),
                y_axis: Some(value_col.clone()),
                secondary_y_axis: numeric.get(1).map(|(col, _)| col.clone()),
                confidence_score: 0.9,
            });
        }

        if numeric.len() >= 2 {
            recommendations.push(VisualizationRecommendation {
                chart_type: "scatter".to_string(),
                title: format!("{} vs {}", numeric[0].0, numeric[1].0),
                description: "two numeric columns suggest a correlation view".to_string(),
                x_axis: Some(numeric[0].0.clone()),
                y_axis: Some(numeric[1].0.clone()),
                secondary_y_axis: None,
                confidence_score: 0.6,
            });
        }

        if let (Some((cat_col, _)), Some((value_col, _))) = (categorical.first(), numeric.first()) {
            let distinct_categories = distinct_count(sample_rows, cat_col);
            if distinct_categories <= MAX_PIE_CATEGORIES {
                // fewer distinct slices read more cleanly as a pie/donut, so
                // confidence scales down as the category count climbs toward the cap.
                let confidence = 0.5 + 0.5 * (1.0 - distinct_categories as f64 / MAX_PIE_CATEGORIES as f64);
                recommendations.push(VisualizationRecommendation {
                    chart_type: "pie".to_string(),
                    title: format!("{value_col} by {cat_col}"),
                    description: format!("{distinct_categories} categories fit a pie/donut breakdown"),
                    x_axis: Some(cat_col.clone()),
                    y_axis: Some(value_col.clone()),
                    secondary_y_axis: None,
                    confidence_score: confidence,
                });
            } else {
                recommendations.push(VisualizationRecommendation {
                    chart_type: "bar".to_string(),
                    title: format!("{value_col} by {cat_col}"),
                    description: format!("{distinct_categories} categories is too many for pie/donut; a bar chart reads better"),
                    x_axis: Some(cat_col.clone()),
                    y_axis: Some(value_col.clone()),
                    secondary_y_axis: None,
                    confidence_score: 0.7,
                });
            }
        }

        if recommendations.is_empty() {
            return ChartRecommendation {
                is_visualizable: false,
                reason: Some("no recognizable numeric/categorical/temporal combination".to_string()),
                recommendations: vec![],
            };
        }

        ChartRecommendation { is_visualizable: true, reason: None, recommendations }
    }
}

fn classify(data_type: &str) -> ColumnShape {
    let t = data_type.to_ascii_uppercase();
    if ["DATE", "DATETIME", "TIMESTAMP", "TIME"].iter().any(|k| t.contains(k)) {
        ColumnShape::Temporal
    } else if ["INT", "BIGINT", "DECIMAL", "FLOAT", "DOUBLE", "SMALLINT", "TINYINT"].iter().any(|k| t.contains(k)) {
        ColumnShape::Numeric
    } else {
        ColumnShape::Categorical
    }
}

fn distinct_count(rows: &[serde_json::Value], column: &str) -> usize {
    use std::collections::HashSet;
    rows.iter()
        .filter_map(|row| row.get(column).map(|v| v.to_string()))
        .collect::<HashSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, data_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            default: None,
            is_primary_key: false,
            foreign_key_to: None,
        }
    }

    #[test]
    fn empty_rows_are_not_visualizable() {
        let rec = ChartRecommender::recommend(&[col("a", "INT"), col("b", "INT")], &[]);
        assert!(!rec.is_visualizable);
    }

    #[test]
    fn time_plus_numeric_recommends_line_chart() {
        let rows = vec![serde_json::json!({"day": "2024-01-01", "revenue": 100})];
        let rec = ChartRecommender::recommend(&[col("day", "DATE"), col("revenue", "DECIMAL")], &rows);
        assert!(rec.recommendations.iter().any(|r| r.chart_type == "line"));
    }

    #[test]
    fn many_categories_prefers_bar_over_pie() {
        let rows: Vec<_> = (0..20)
            .map(|i| serde_json::json!({"supplier": format!("supplier-{i}"), "total": i}))
            .collect();
        let rec = ChartRecommender::recommend(&[col("supplier", "VARCHAR"), col("total", "INT")], &rows);
        assert!(rec.recommendations.iter().any(|r| r.chart_type == "bar"));
        assert!(!rec.recommendations.iter().any(|r| r.chart_type == "pie"));
    }

    #[test]
    fn few_categories_prefers_pie() {
        let rows = vec![
            serde_json::json!({"region": "EU", "total": 10}),
            serde_json::json!({"region": "US", "total": 20}),
        ];
        let rec = ChartRecommender::recommend(&[col("region", "VARCHAR"), col("total", "INT")], &rows);
        assert!(rec.recommendations.iter().any(|r| r.chart_type == "pie"));
    }
}
