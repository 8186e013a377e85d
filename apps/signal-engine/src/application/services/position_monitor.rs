//! Position monitor.
//!
//! Periodic reconciliation of the broker's live open-position set against the
//! trade repository. A ticket absent from the live set is interpreted as a
//! closure; the close reason is inferred from the last observed price because
//! the gateway does not reliably report one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

use super::breakeven::BreakevenEngine;
use crate::application::events::{EventBus, TradeEvent};
use crate::application::ports::broker_gateway::{BrokerGateway, OpenPosition};
use crate::application::ports::trade_store::TradeStore;
use crate::application::repository::TradeRepository;
use crate::domain::{PositionRecord, Trade};

/// Position monitor tuning.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Interval between reconciliation ticks.
    pub tick_interval: Duration,
    /// Units per lot, used to scale per-price P&L into account currency.
    pub contract_size: Decimal,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(2),
            contract_size: Decimal::new(100_000, 0),
        }
    }
}

/// Detects leg closures and drives the per-trade lifecycle forward.
pub struct PositionMonitor<G, S> {
    config: MonitorConfig,
    gateway: Arc<G>,
    repository: Arc<TradeRepository<S>>,
    breakeven: BreakevenEngine<G, S>,
    events: EventBus,
}

impl<G, S> PositionMonitor<G, S>
where
    G: BrokerGateway + 'static,
    S: TradeStore + 'static,
{
    /// Create a new monitor.
    #[must_use]
    pub fn new(
        config: MonitorConfig,
        gateway: Arc<G>,
        repository: Arc<TradeRepository<S>>,
        breakeven: BreakevenEngine<G, S>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            gateway,
            repository,
            breakeven,
            events,
        }
    }

    /// Run the tick loop until shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(
            interval_secs = self.config.tick_interval.as_secs(),
            "Position monitor started"
        );
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                () = shutdown.cancelled() => {
                    tracing::info!("Position monitor shutting down");
                    break;
                }
            }
        }
    }

    /// One reconciliation pass over every active trade.
    ///
    /// A failed open-position fetch skips the pass; the next tick retries.
    pub async fn tick(&self) {
        let live: HashMap<String, OpenPosition> = match self.gateway.get_open_positions().await {
            Ok(positions) => positions
                .into_iter()
                .map(|p| (p.ticket.clone(), p))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Open-position fetch failed, retrying next tick");
                return;
            }
        };

        for trade in self.repository.active_trades().await {
            self.process_trade(&trade, &live).await;
        }
    }

    async fn process_trade(&self, trade: &Trade, live: &HashMap<String, OpenPosition>) {
        // First pass: refresh observations on legs the broker still reports,
        // and retry stop modifications left pending by earlier failures.
        // Stop-losses themselves are never mutated here.
        for leg in trade.open_legs() {
            if let Some(position) = live.get(&leg.ticket) {
                self.repository
                    .observe_leg(
                        trade.id,
                        &leg.ticket,
                        position.current_price,
                        position.unrealized_pnl,
                    )
                    .await;
                if let Some(desired) = leg.pending_stop_loss {
                    self.breakeven
                        .retry_pending(trade, leg, desired, position.current_price)
                        .await;
                }
            }
        }

        // Second pass: legs absent from the live set closed since last tick.
        // Re-read the trade so classification sees this tick's observations.
        let Some(current) = self.repository.get(trade.id).await else {
            return;
        };
        let vanished: Vec<PositionRecord> = current
            .open_legs()
            .filter(|leg| !live.contains_key(&leg.ticket))
            .cloned()
            .collect();

        for leg in vanished {
            self.handle_closure(&current, &leg).await;
        }
    }

    async fn handle_closure(&self, trade: &Trade, leg: &PositionRecord) {
        let reason = leg.classify_close(trade.direction);
        let pnl = leg.exit_reference(reason).map_or(Decimal::ZERO, |exit| {
            leg.pnl_at(exit, trade.direction, self.config.contract_size)
        });

        let Some(outcome) = self
            .repository
            .close_leg(trade.id, &leg.ticket, reason, pnl)
            .await
        else {
            return;
        };

        tracing::info!(
            trade_id = %trade.id,
            ticket = %leg.ticket,
            tp_index = outcome.tp_index,
            reason = %reason,
            pnl = %pnl,
            "Leg closure detected"
        );
        self.events.publish_trade(TradeEvent::LegClosed {
            trade_id: trade.id,
            ticket: leg.ticket.clone(),
            tp_index: outcome.tp_index,
            reason,
            realized_pnl: outcome.realized_pnl,
        });

        // First closure with survivors: breakeven runs in the same tick,
        // after the closure is recorded.
        if outcome.should_apply_breakeven {
            self.breakeven.apply(trade.id).await;
        }

        if outcome.fully_closed {
            self.repository.archive(trade.id).await;
            self.events.publish_trade(TradeEvent::Closed {
                trade_id: trade.id,
                realized_pnl: outcome.realized_pnl,
            });
            tracing::info!(
                trade_id = %trade.id,
                realized_pnl = %outcome.realized_pnl,
                "Trade fully closed and archived"
            );
        }
    }
}
