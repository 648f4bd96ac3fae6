//! Etherwatch - Ethereum address watcher and balance aggregator
//!
//! This is the main entry point for the watcher service.
//! It wires the poll scheduler, notification transport, and signal handlers.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

use etherwatch::aggregator::BalanceAggregator;
use etherwatch::config::AppConfig;
use etherwatch::cursor::SqliteCursorStore;
use etherwatch::db;
use etherwatch::detector::TransferDetector;
use etherwatch::discovery::AlchemyDiscovery;
use etherwatch::dispatch::{LogTransport, NotificationDispatcher, TelegramTransport, Transport};
use etherwatch::ledger::rpc::HttpLedgerClient;
use etherwatch::prices::CoinGeckoOracle;
use etherwatch::registry::RegistrySnapshot;
use etherwatch::scheduler::PollScheduler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Etherwatch v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    tracing::info!(
        rpc_url = %config.ledger.rpc_url,
        interval_secs = config.poll.interval_secs,
        "Configuration loaded"
    );

    // Initialize database
    let db_pool = db::init_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;
    tracing::info!("Database initialized");

    // Ledger client shared by the detector, aggregator, and dispatcher
    let ledger: Arc<HttpLedgerClient> = Arc::new(HttpLedgerClient::new(&config.ledger)?);

    // Notification transport
    let transport: Arc<dyn Transport> = if config.telegram.enabled {
        tracing::info!("Telegram transport enabled");
        Arc::new(TelegramTransport::new(config.telegram.bot_token.clone())?)
    } else {
        tracing::warn!("Telegram disabled, notifications go to the log");
        Arc::new(LogTransport)
    };

    let dispatcher = Arc::new(NotificationDispatcher::new(transport, ledger.clone()));

    // On-demand balance pipeline
    let oracle = Arc::new(CoinGeckoOracle::new(&config.prices)?);
    let discovery = AlchemyDiscovery::from_config(
        &config.discovery,
        &config.ledger.rpc_url,
        config.ledger.timeout_ms,
    )?
    .map(Arc::new);
    if discovery.is_some() {
        tracing::info!("Token discovery enabled");
    }
    let aggregator = Arc::new(BalanceAggregator::new(
        ledger.clone(),
        oracle,
        discovery,
        config.ledger.max_concurrency,
    ));

    // Poll scheduler
    let detector = TransferDetector::new(ledger.clone(), config.ledger.max_concurrency);
    let cursor = Arc::new(SqliteCursorStore::new(db_pool.clone()));
    let scheduler = PollScheduler::new(
        ledger.clone(),
        cursor,
        detector,
        dispatcher.clone(),
        db_pool.clone(),
        config.poll.clone(),
    );
    let handle = scheduler.handle();

    let cancel = CancellationToken::new();
    let scheduler_cancel = cancel.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_cancel).await;
    });
    tracing::info!("Poll scheduler started");

    // SIGHUP triggers an immediate scan, SIGUSR1 pushes balance summaries
    #[cfg(unix)]
    {
        let sighup_handle = handle.clone();
        tokio::spawn(async move {
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to register SIGHUP handler");
                    return;
                }
            };
            loop {
                sighup.recv().await;
                tracing::info!("Received SIGHUP, requesting immediate scan");
                sighup_handle.trigger_scan();
            }
        });

        let summary_pool = db_pool.clone();
        let summary_aggregator = aggregator.clone();
        let summary_dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let mut sigusr1 = match signal(SignalKind::user_defined1()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to register SIGUSR1 handler");
                    return;
                }
            };
            loop {
                sigusr1.recv().await;
                tracing::info!("Received SIGUSR1, sending balance summaries");
                if let Err(e) = send_balance_summaries(
                    &summary_pool,
                    &summary_aggregator,
                    &summary_dispatcher,
                )
                .await
                {
                    tracing::error!(error = %e, "Balance summary pass failed");
                }
            }
        });
        tracing::info!("Signal handlers registered");
    }

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    cancel.cancel();
    let _ = scheduler_task.await;
    db_pool.close().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Aggregate and deliver a balance summary for every watched wallet to each
/// of its owners. Failures for one wallet never block the rest.
async fn send_balance_summaries(
    pool: &db::DbPool,
    aggregator: &BalanceAggregator,
    dispatcher: &NotificationDispatcher,
) -> anyhow::Result<()> {
    let snapshot = RegistrySnapshot::load(pool).await?;

    for address in snapshot.addresses() {
        let balance = match aggregator.get_balance(*address, None).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(address = %address, error = %e, "Balance aggregation failed");
                continue;
            }
        };
        if let Some(owners) = snapshot.owners_of(address) {
            for owner in owners {
                dispatcher.dispatch_balance(owner.user_id, &balance).await;
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "etherwatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load and validate configuration
fn load_config() -> anyhow::Result<AppConfig> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    Ok(config)
}
