//! ResultTable: the stable, paginated handle a completed SELECT is stored
//! under in a session's result-table registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultTable {
    pub table_id: String,
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
    pub page_size: u32,
    pub generated_at: DateTime<Utc>,
}

impl ResultTable {
    pub fn total_rows(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn total_pages(&self, page_size: u32) -> u32 {
        let page_size = page_size.max(1) as u64;
        let total = self.total_rows();
        if total == 0 { 0 } else { total.div_ceil(page_size) as u32 }
    }

    /// 1-indexed page retrieval. `Err` with the valid range when out of bounds.
    pub fn page(&self, page: u32, page_size: u32) -> Result<Pagination, (u32, u32)> {
        let total_pages = self.total_pages(page_size);
        if self.rows.is_empty() {
            return Ok(Pagination {
                table_id: self.table_id.clone(),
                current_page: 1,
                total_pages: 0,
                total_rows: 0,
                page_size,
                has_next: false,
                has_prev: false,
            });
        }
        if page == 0 || page > total_pages {
            return Err((1, total_pages));
        }
        Ok(Pagination {
            table_id: self.table_id.clone(),
            current_page: page,
            total_pages,
            total_rows: self.total_rows(),
            page_size,
            has_next: page < total_pages,
            has_prev: page > 1,
        })
    }

    pub fn rows_for_page(&self, page: u32, page_size: u32) -> Vec<serde_json::Value> {
        let page_size = page_size.max(1) as usize;
        let start = ((page.saturating_sub(1)) as usize) * page_size;
        let end = (start + page_size).min(self.rows.len());
        if start >= self.rows.len() { Vec::new() } else { self.rows[start..end].to_vec() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub table_id: String,
    pub current_page: u32,
    pub total_pages: u32,
    pub total_rows: u64,
    pub page_size: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(n: usize) -> ResultTable {
        ResultTable {
            table_id: "t1".into(),
            sql: "SELECT * FROM orders".into(),
            columns: vec!["id".into()],
            rows: (0..n).map(|i| serde_json::json!({"id": i})).collect(),
            page_size: 50,
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn page_three_of_237_rows_at_50_per_page() {
        let table = table_with(237);
        let pagination = table.page(3, 50).unwrap();
        assert_eq!(pagination.total_pages, 5);
        assert!(pagination.has_next);
        assert!(pagination.has_prev);
        let rows = table.rows_for_page(3, 50);
        assert_eq!(rows.len(), 50);
        assert_eq!(rows[0]["id"], 100);
        assert_eq!(rows[49]["id"], 149);
    }

    #[test]
    fn page_zero_and_overflow_are_invalid() {
        let table = table_with(10);
        assert!(table.page(0, 5).is_err());
        assert!(table.page(100, 5).is_err());
    }

    #[test]
    fn empty_result_set_has_zero_pages_not_an_error() {
        let table = table_with(0);
        let pagination = table.page(1, 10).unwrap();
        assert_eq!(pagination.total_rows, 0);
        assert_eq!(pagination.total_pages, 0);
    }

    #[test]
    fn single_statement_page_matches_first_n_rows_in_original_order() {
        let table = table_with(20);
        let rows = table.rows_for_page(1, 5);
        assert_eq!(rows, vec![serde_json::json!({"id": 0}), serde_json::json!({"id": 1}), serde_json::json!({"id": 2}), serde_json::json!({"id": 3}), serde_json::json!({"id": 4})]);
    }
}
