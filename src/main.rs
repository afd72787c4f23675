use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smart_sql_gen::config::Config;
use smart_sql_gen::services::{build_target_pool, MySQLClient};
use smart_sql_gen::utils::ScheduledExecutor;
use smart_sql_gen::{AppContext, CacheCleanupTask, SessionEvictionTask};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let (config, cli_args) = Config::load()?;

    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("smart-sql-gen.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
        // leak the guard: it must outlive the process for the non-blocking
        // writer to flush, and main() never returns early from here on.
        std::mem::forget(_guard);
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("smart-sql-gen starting up");

    std::fs::create_dir_all(&config.server.data_dir)?;

    let metadata_pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(config.database.metadata_url.trim_start_matches("sqlite://"))
                .create_if_missing(true),
        )
        .await?;
    tracing::info!("metadata store ready");

    let target_pool = build_target_pool(&config.database)?;
    // fail fast on a bad connection string rather than surfacing it on the first turn.
    MySQLClient::new(target_pool.clone()).query("SELECT 1").await?;
    tracing::info!(table = %config.database.target_table, "target database connected");

    let ctx = AppContext::new(&config, metadata_pool, target_pool);
    ctx.cache.migrate().await?;

    {
        let executor = ScheduledExecutor::new("session-eviction", Duration::from_secs(300));
        let task = SessionEvictionTask { sessions: Arc::clone(&ctx.sessions) };
        tokio::spawn(async move { executor.start(task).await });
    }
    {
        let executor = ScheduledExecutor::new("cache-cleanup", Duration::from_secs(600));
        let task = CacheCleanupTask {
            schema_analyzer: Arc::clone(&ctx.schema_analyzer),
            cache: Arc::clone(&ctx.cache),
            sqlgen: Arc::clone(&ctx.sqlgen),
        };
        tokio::spawn(async move { executor.start(task).await });
    }

    let session_id = cli_args.session.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(question) = &cli_args.ask {
        let response = ctx.orchestrator.process_turn(&session_id, question, None).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    run_repl(&ctx, &session_id).await
}

async fn run_repl(ctx: &AppContext, session_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("smart-sql-gen ready. session={session_id}. Ctrl-D to exit.");
    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        let response = ctx.orchestrator.process_turn(session_id, question, None).await;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}
