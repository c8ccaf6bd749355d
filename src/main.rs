use anyhow::Result;
use dotenvy::dotenv;
use std::sync::Arc;
use teloxide::prelude::*;

use lumora::core::cooldown::CooldownGate;
use lumora::core::{config, init_logger};
use lumora::generation::fetch::{HttpFileStore, ResultFetcher};
use lumora::generation::inference::{HttpInferenceProvider, InferenceClient};
use lumora::generation::limits::{ConcurrencyLimiter, PerUserSerializer};
use lumora::generation::queue::JobQueue;
use lumora::generation::service::GenerationService;
use lumora::generation::worker::{WorkerContext, WorkerPool};
use lumora::storage::create_pool;
use lumora::storage::ledger::SqliteLedger;
use lumora::storage::model_cache::{ModelCache, SqliteModelStore};
use lumora::telegram::{create_bot, handle_command, setup_bot_commands, Command, HandlerDeps, TelegramNotifier};

/// Main entry point for the Telegram bot
///
/// # Errors
/// Returns an error if initialization fails (logging, database, bot creation).
#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    let _ = dotenv();

    // Initialize logger (console + file)
    init_logger(&config::LOG_FILE_PATH)?;

    run_bot().await
}

async fn run_bot() -> Result<()> {
    log::info!("Starting bot...");

    let bot = create_bot()?;

    let bot_info = bot.get_me().await?;
    log::info!("Bot username: {:?}, Bot ID: {}", bot_info.username, bot_info.id);

    setup_bot_commands(&bot).await?;

    // Create database connection pool
    let db_pool = Arc::new(
        create_pool(&config::DATABASE_PATH).map_err(|e| anyhow::anyhow!("Failed to create database pool: {}", e))?,
    );
    let ledger = Arc::new(SqliteLedger::new(Arc::clone(&db_pool)));
    let model_store = Arc::new(SqliteModelStore::new(Arc::clone(&db_pool)));
    let model_cache = Arc::new(ModelCache::new(model_store, config::model_cache::ttl()));

    // Concurrency machinery shared by the whole pipeline
    let limits = Arc::new(ConcurrencyLimiter::from_config());
    let serializer = Arc::new(PerUserSerializer::new());

    let cooldown = Arc::new(CooldownGate::new(config::cooldown::duration()));
    // Start periodic cleanup of expired cooldown marks
    Arc::clone(&cooldown).spawn_cleanup_task(config::cooldown::cleanup_interval());

    // External collaborators: inference provider and artifact store
    let provider = Arc::new(HttpInferenceProvider::from_config().map_err(|e| anyhow::anyhow!("{}", e))?);
    let inference = Arc::new(InferenceClient::new(
        provider,
        Arc::clone(&limits),
        lumora::core::retry::RetryConfig::provider(),
    ));
    let file_store = Arc::new(HttpFileStore::new().map_err(|e| anyhow::anyhow!("{}", e))?);
    let fetcher = Arc::new(ResultFetcher::new(
        file_store,
        Arc::clone(&limits),
        lumora::core::retry::RetryConfig::download(),
    ));

    let notifier = Arc::new(TelegramNotifier::new(bot.clone()));

    // Job queue and worker pool
    let queue = Arc::new(JobQueue::new(config::queue::MAX_QUEUE_SIZE));
    let ctx = Arc::new(WorkerContext {
        ledger: ledger.clone(),
        audit: ledger.clone(),
        model_cache: Arc::clone(&model_cache),
        inference,
        fetcher,
        notifier,
        limits,
        serializer,
    });
    let pool = WorkerPool::start(config::queue::WORKER_COUNT, Arc::clone(&queue), ctx);
    log::info!("Started {} generation workers", pool.size());

    let service = Arc::new(GenerationService::new(queue, cooldown, ledger.clone(), model_cache));
    let deps = Arc::new(HandlerDeps { service, ledger });

    let handler = Update::filter_message()
        .filter_command::<Command>()
        .endpoint(handle_command);

    log::info!("Ready to receive updates");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    // Drain and stop the worker pool; jobs already queued still run.
    log::info!("Shutting down gracefully...");
    pool.shutdown().await;

    Ok(())
}
