use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::Connection;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, ConnectionFactory, StoreMode};
use memstore::MemoryBackend;
use pool::ConnectionPool;
use runtime::{
    EngineTimings, ExitReason, PositionGateway, Registrar, StoreSignalSource, StrategyEngine,
    TerminationCache,
};
use store::SqlStoreFactory;

/// One strategy instance against the shared store. Run one process per
/// configuration id.
#[derive(Parser, Debug)]
#[command(name = "strategyd")]
struct Args {
    /// Strategy configuration id to register and run.
    #[arg(long)]
    config_id: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    let cfg = Config::from_env();
    info!(config_id = args.config_id, store = %cfg.store_mode, "strategyd starting");

    // ── Store backend ────────────────────────────────────────────────────────
    let factory: Arc<dyn ConnectionFactory> = match cfg.store_mode {
        StoreMode::Sql => {
            let url = cfg
                .database_url
                .clone()
                .context("DATABASE_URL is required in sql mode")?;
            let mut conn = sqlx::SqliteConnection::connect(&url)
                .await
                .context("Failed to connect to database")?;
            store::MIGRATOR
                .run(&mut conn)
                .await
                .context("Database migration failed")?;
            conn.close().await.ok();
            info!("Database ready");
            Arc::new(SqlStoreFactory::new(url))
        }
        StoreMode::Memory => {
            let backend = MemoryBackend::new();
            backend.seed_default(args.config_id).await;
            info!("Memory store ready, instructions fill instantly");
            backend.factory()
        }
    };

    let pool = Arc::new(ConnectionPool::new(
        factory,
        cfg.pool_size,
        cfg.pool_max_overflow,
    ));

    // ── Registration ─────────────────────────────────────────────────────────
    let strategy_cfg = Registrar::new(pool.clone())
        .register(args.config_id)
        .await
        .context("Strategy registration failed")?;
    info!(
        config = %serde_json::to_string(&strategy_cfg).unwrap_or_else(|_| "<unserializable>".into()),
        "Configuration loaded"
    );
    let strategy_cfg = Arc::new(strategy_cfg);

    // ── Interrupt handling ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(true);
        }
    });

    // ── Engine ───────────────────────────────────────────────────────────────
    let gateway = PositionGateway::new(pool.clone(), strategy_cfg.clone());
    let signals = Box::new(StoreSignalSource::new(pool.clone(), &strategy_cfg));
    let terminations = Arc::new(TerminationCache::new(
        pool.clone(),
        cfg.termination_cache_ttl,
    ));

    let mut engine = StrategyEngine::new(
        strategy_cfg,
        EngineTimings::from_config(&cfg),
        cfg.reflatten_on_match,
        gateway,
        signals,
        terminations,
        shutdown_rx,
    );

    engine.start().await.context("Strategy startup failed")?;
    let reason = engine.run().await.context("Execution loop failed")?;
    match reason {
        ExitReason::WindowClosed => info!("Trading window closed, exiting"),
        ExitReason::TerminationRequested => info!("Termination request honored, exiting"),
        ExitReason::Interrupted => warn!("Interrupted, exiting"),
    }

    pool.drain().await;
    Ok(())
}
