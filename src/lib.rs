//! Smart SQL Generator library crate.
//!
//! Everything the process entry point needs to drive turns lives behind
//! [`AppContext`]: the Schema Analyzer, Prompt Library, Conversation Memory,
//! Query Cache, Execution Engine, SQL Generation Manager, Analytical Manager,
//! Verifier, Chart Recommender, and Session Registry, all wired together by
//! the [`graph::GraphOrchestrator`].

use std::sync::Arc;

use sqlx::SqlitePool;

pub mod analytical;
pub mod config;
pub mod error;
pub mod graph;
pub mod models;
pub mod prompts;
pub mod services;
pub mod session;
pub mod utils;

pub use config::Config;
pub use error::{ErrorKind, TurnError, TurnResult};
pub use graph::GraphOrchestrator;
pub use session::SessionRegistry;

use services::cache::QueryCache;
use services::execution::ExecutionEngine;
use services::llm::LlmClient;
use services::mysql_client::MySQLClient;
use services::schema_analyzer::SchemaAnalyzer;
use services::sqlgen::SqlGenerationManager;
use services::verifier::Verifier;

use analytical::AnalyticalManager;

/// Everything one running process needs, already wired together. Kept as
/// plain `Arc` fields rather than a service-locator trait object — the
/// component set is fixed and known at construction time.
#[derive(Clone)]
pub struct AppContext {
    pub metadata_db: SqlitePool,
    pub llm: Arc<LlmClient>,
    pub schema_analyzer: Arc<SchemaAnalyzer>,
    pub sqlgen: Arc<SqlGenerationManager>,
    pub execution: Arc<ExecutionEngine>,
    pub verifier: Arc<Verifier>,
    pub cache: Arc<QueryCache>,
    pub analytical: Arc<AnalyticalManager>,
    pub sessions: Arc<SessionRegistry>,
    pub orchestrator: Arc<GraphOrchestrator>,
}

impl AppContext {
    /// Wires the full component graph from a loaded [`Config`] plus the two
    /// already-opened pools (metadata sqlite, target mysql). Chart
    /// recommendation has no state to own; it is called directly from
    /// [`graph::GraphOrchestrator`] as an associated function.
    pub fn new(config: &Config, metadata_db: SqlitePool, target_pool: mysql_async::Pool) -> Self {
        let llm = Arc::new(LlmClient::new(config.llm.clone()));
        let client = MySQLClient::new(target_pool);

        let schema_analyzer = Arc::new(SchemaAnalyzer::new(client.clone(), &config.database.target_table));
        let sqlgen = Arc::new(SqlGenerationManager::new(Arc::clone(&llm), client.clone()));
        let execution = Arc::new(ExecutionEngine::new(client.clone(), Arc::clone(&schema_analyzer), config.engine.db_timeout_secs));
        let verifier = Arc::new(Verifier::new(Arc::clone(&llm), config.database.target_table.clone()));
        let cache = Arc::new(QueryCache::new(metadata_db.clone(), config.engine.cache_capacity_per_session));
        let analytical = Arc::new(AnalyticalManager::new(
            Arc::clone(&llm),
            Arc::clone(&sqlgen),
            client,
            config.engine.analytical_subquestions_min,
            config.engine.analytical_subquestions_max,
        ));
        let sessions = Arc::new(SessionRegistry::new(config, Arc::clone(&llm)));

        let orchestrator = Arc::new(GraphOrchestrator::new(
            Arc::clone(&sessions),
            Arc::clone(&schema_analyzer),
            Arc::clone(&sqlgen),
            Arc::clone(&execution),
            Arc::clone(&verifier),
            Arc::clone(&cache),
            Arc::clone(&analytical),
            Arc::clone(&llm),
            config.engine.use_memory,
            config.engine.use_cache,
            config.engine.max_validation_attempts,
            config.engine.page_size_default,
        ));

        Self { metadata_db, llm, schema_analyzer, sqlgen, execution, verifier, cache, analytical, sessions, orchestrator }
    }
}

/// Periodic sweep dropping sessions idle past the configured TTL.
pub struct SessionEvictionTask {
    pub sessions: Arc<SessionRegistry>,
}

impl utils::ScheduledTask for SessionEvictionTask {
    fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let evicted = self.sessions.evict_idle().await;
            if evicted > 0 {
                tracing::info!(evicted, "evicted idle sessions");
            }
            Ok(())
        })
    }
}

/// Periodic sweep dropping query-cache rows and schema-exploration probes
/// keyed to a schema_version older than the analyzer's current one.
pub struct CacheCleanupTask {
    pub schema_analyzer: Arc<SchemaAnalyzer>,
    pub cache: Arc<QueryCache>,
    pub sqlgen: Arc<SqlGenerationManager>,
}

impl utils::ScheduledTask for CacheCleanupTask {
    fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let current_version = self.schema_analyzer.schema_version();
            let evicted = self.cache.cleanup_stale(current_version).await?;
            self.sqlgen.prune_stale_probes(current_version).await;
            if evicted > 0 {
                tracing::info!(evicted, "evicted stale cache rows");
            }
            Ok(())
        })
    }
}
