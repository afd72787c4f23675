pub mod cache;
pub mod chart;
pub mod execution;
pub mod llm;
pub mod memory;
pub mod mysql_client;
pub mod mysql_pool_manager;
pub mod schema_analyzer;
pub mod sqlgen;
pub mod verifier;

pub use cache::QueryCache;
pub use chart::ChartRecommender;
pub use execution::ExecutionEngine;
pub use llm::{LlmClient, LlmError};
pub use memory::ConversationMemory;
pub use mysql_client::MySQLClient;
pub use mysql_pool_manager::build_target_pool;
pub use schema_analyzer::SchemaAnalyzer;
pub use sqlgen::SqlGenerationManager;
pub use verifier::Verifier;
