//! Realtime sync broadcaster.
//!
//! Periodically captures account, position and stats snapshots and pushes
//! them to observers and the durable store. Pushes happen when any tracked
//! field moved beyond its threshold, and unconditionally on a heartbeat
//! cadence so observers can tell "no changes" from "unresponsive process".

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::application::events::{EngineEvent, EventBus};
use crate::application::ports::broker_gateway::BrokerGateway;
use crate::application::ports::trade_store::TradeStore;
use crate::application::repository::TradeRepository;
use crate::application::snapshot::{PositionSnapshot, SyncSnapshot, SyncThresholds};
use rust_decimal::Decimal;

/// Broadcaster tuning.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Interval between capture ticks.
    pub tick_interval: Duration,
    /// Force a full push every this many ticks, changed or not.
    pub heartbeat_every: u64,
    /// Per-field change-detection thresholds.
    pub thresholds: SyncThresholds,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            heartbeat_every: 12,
            thresholds: SyncThresholds {
                monetary: Decimal::new(1, 2),
                price: Decimal::new(1, 5),
            },
        }
    }
}

/// Captures snapshots and keeps observers and the durable store in sync.
pub struct RealtimeSyncBroadcaster<G, S> {
    config: SyncConfig,
    gateway: Arc<G>,
    repository: Arc<TradeRepository<S>>,
    store: Arc<S>,
    events: EventBus,
}

impl<G, S> RealtimeSyncBroadcaster<G, S>
where
    G: BrokerGateway + 'static,
    S: TradeStore + 'static,
{
    /// Create a new broadcaster.
    #[must_use]
    pub fn new(
        config: SyncConfig,
        gateway: Arc<G>,
        repository: Arc<TradeRepository<S>>,
        store: Arc<S>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            gateway,
            repository,
            store,
            events,
        }
    }

    /// Run the tick loop until shutdown. Shutdown flushes one final forced
    /// snapshot before exiting.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.tick_interval.as_secs(),
            heartbeat_every = self.config.heartbeat_every,
            "Sync broadcaster started"
        );
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut last_pushed: Option<SyncSnapshot> = None;
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    ticks += 1;
                    let heartbeat =
                        self.config.heartbeat_every > 0 && ticks % self.config.heartbeat_every == 0;
                    if let Some(pushed) = self.tick(last_pushed.as_ref(), heartbeat).await {
                        last_pushed = Some(pushed);
                    }
                }
                () = shutdown.cancelled() => {
                    tracing::info!("Sync broadcaster shutting down, flushing final snapshot");
                    self.tick(None, true).await;
                    break;
                }
            }
        }
    }

    /// One capture-compare-push pass.
    ///
    /// Returns the snapshot if it was pushed. A failed capture skips the
    /// pass entirely.
    pub async fn tick(
        &self,
        last_pushed: Option<&SyncSnapshot>,
        force: bool,
    ) -> Option<SyncSnapshot> {
        let snapshot = self.capture().await?;

        let changed = last_pushed
            .is_none_or(|previous| snapshot.differs_from(previous, &self.config.thresholds));
        if !changed && !force {
            return None;
        }

        // Observers first, durable store second: the low-latency channel must
        // not wait behind the slower write.
        self.events
            .publish(EngineEvent::AccountUpdate(snapshot.account.clone()));
        self.events
            .publish(EngineEvent::PositionsUpdate(snapshot.positions.clone()));
        self.events
            .publish(EngineEvent::StatsUpdate(snapshot.stats.clone()));

        if let Err(e) = self.store.record_snapshot(&snapshot).await {
            tracing::warn!(error = %e, "Snapshot persistence failed");
        }

        tracing::debug!(
            forced = force,
            positions = snapshot.positions.len(),
            "Snapshot pushed"
        );
        Some(snapshot)
    }

    async fn capture(&self) -> Option<SyncSnapshot> {
        let account = match self.gateway.get_account_info().await {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!(error = %e, "Account fetch failed, skipping sync tick");
                return None;
            }
        };

        let trades = self.repository.active_trades().await;
        let mut positions: Vec<PositionSnapshot> = trades
            .iter()
            .flat_map(|trade| {
                trade
                    .open_legs()
                    .map(|leg| PositionSnapshot::from_leg(trade, leg))
            })
            .collect();
        // Stable ordering so change detection compares like with like.
        positions.sort_by(|a, b| a.ticket.cmp(&b.ticket));

        let stats = self.repository.stats().await;

        Some(SyncSnapshot {
            account,
            positions,
            stats,
            captured_at: Utc::now(),
        })
    }
}
