//! Signal Engine Binary
//!
//! Starts the signal-to-position lifecycle engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin signal-engine
//! ```
//!
//! Parsed signals arrive as newline-delimited JSON on stdin (the free-text
//! parser is an external collaborator); each line is executed as one signal.
//!
//! # Environment Variables
//!
//! - `SIGNAL_ENGINE_CONFIG`: Config file path (default: `config.yaml`)
//! - `RUST_LOG`: Log level (default: info)

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use signal_engine::application::services::{
    BreakevenEngine, OrderPlacementOrchestrator, PositionMonitor, RealtimeSyncBroadcaster,
};
use signal_engine::application::{EventBus, TradeRepository};
use signal_engine::infrastructure::broker::{PaperBroker, RetryingGateway, build_gateway};
use signal_engine::infrastructure::persistence::SqliteTradeStore;
use signal_engine::{BrokerGateway, EngineConfig, Signal, load_config};

type Gateway = RetryingGateway<PaperBroker>;
type Repository = TradeRepository<SqliteTradeStore>;
type Orchestrator = OrderPlacementOrchestrator<Gateway, SqliteTradeStore>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting signal engine");

    let config = load_config(None)?;
    log_config(&config);

    let store = Arc::new(SqliteTradeStore::open(&config.persistence.database_path).await?);
    let gateway = Arc::new(build_gateway(
        &config.broker,
        config.retry.to_retry_policy(),
    ));
    let events = EventBus::new(256);
    let repository = Arc::new(TradeRepository::new(Arc::clone(&store)));

    restore_state(&config, &gateway, &repository).await?;

    let shutdown = CancellationToken::new();
    let (monitor_handle, broadcaster_handle) = spawn_services(
        &config,
        Arc::clone(&gateway),
        Arc::clone(&repository),
        Arc::clone(&store),
        events.clone(),
        &shutdown,
    );

    let orchestrator = Arc::new(OrderPlacementOrchestrator::new(
        config.orchestrator.to_orchestrator_config(),
        Arc::clone(&gateway),
        Arc::clone(&repository),
        events,
    ));
    spawn_signal_feed(orchestrator, shutdown.clone());

    tracing::info!(broker = gateway.name(), "Signal engine ready");

    wait_for_shutdown().await;

    // Shutdown order: stop the loops (the broadcaster flushes one final
    // forced snapshot on its way out), then one final repository write.
    shutdown.cancel();
    let _ = monitor_handle.await;
    let _ = broadcaster_handle.await;
    repository.persist_now().await;

    tracing::info!("Signal engine stopped");
    Ok(())
}

/// Initialize the tracing subscriber with environment filter.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("signal_engine=info")),
        )
        .init();
}

/// Log the loaded configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        backend = ?config.broker.backend,
        monitor_interval_secs = config.monitor.tick_interval_secs,
        sync_interval_secs = config.sync.tick_interval_secs,
        order_pacing_ms = config.orchestrator.order_pacing_ms,
        database_path = %config.persistence.database_path,
        "Configuration loaded"
    );
}

/// Restore the persisted trade set and reconcile it against the broker's
/// live open positions before monitoring resumes.
async fn restore_state(
    config: &EngineConfig,
    gateway: &Arc<Gateway>,
    repository: &Arc<Repository>,
) -> anyhow::Result<()> {
    let restored = repository.restore().await?;

    if restored > 0 {
        match gateway.get_open_positions().await {
            Ok(positions) => {
                let live: HashSet<String> = positions.into_iter().map(|p| p.ticket).collect();
                repository
                    .reconcile(&live, config.monitor.contract_size)
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Startup reconciliation skipped, the first monitor tick will catch up"
                );
            }
        }
    }

    Ok(())
}

/// Spawn the monitor and broadcaster tick loops.
fn spawn_services(
    config: &EngineConfig,
    gateway: Arc<Gateway>,
    repository: Arc<Repository>,
    store: Arc<SqliteTradeStore>,
    events: EventBus,
    shutdown: &CancellationToken,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let breakeven = BreakevenEngine::new(
        config.breakeven.to_breakeven_config(),
        Arc::clone(&gateway),
        Arc::clone(&repository),
        events.clone(),
    );
    let monitor = PositionMonitor::new(
        config.monitor.to_monitor_config(),
        Arc::clone(&gateway),
        Arc::clone(&repository),
        breakeven,
        events.clone(),
    );
    let broadcaster = RealtimeSyncBroadcaster::new(
        config.sync.to_sync_config(),
        gateway,
        repository,
        store,
        events,
    );

    let monitor_shutdown = shutdown.clone();
    let monitor_handle = tokio::spawn(async move {
        monitor.run(monitor_shutdown).await;
    });

    let broadcaster_shutdown = shutdown.clone();
    let broadcaster_handle = tokio::spawn(async move {
        broadcaster.run(broadcaster_shutdown).await;
    });

    (monitor_handle, broadcaster_handle)
}

/// Consume newline-delimited signal JSON from stdin.
fn spawn_signal_feed(orchestrator: Arc<Orchestrator>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<Signal>(line) {
                                Ok(signal) => {
                                    let outcome = orchestrator.execute(signal).await;
                                    tracing::info!(
                                        placed = outcome.placed,
                                        requested = outcome.requested,
                                        "Signal processed"
                                    );
                                }
                                Err(e) => {
                                    tracing::warn!(error = %e, "Unparseable signal line, skipping");
                                }
                            }
                        }
                        Ok(None) => {
                            tracing::info!("Signal feed closed");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Signal feed read error");
                            break;
                        }
                    }
                }
                () = shutdown.cancelled() => break,
            }
        }
    });
}

/// Wait for SIGTERM or Ctrl+C.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals is better failed at startup.
#[allow(clippy::expect_used)]
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
