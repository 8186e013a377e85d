//! Breakeven transition engine.
//!
//! When the first leg of a trade closes while siblings remain open, every
//! surviving leg's stop-loss moves to its own entry fill plus a small offset,
//! locking in a token profit. The transition runs at most once per trade.

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::events::{EventBus, TradeEvent};
use crate::application::ports::broker_gateway::BrokerGateway;
use crate::application::ports::trade_store::TradeStore;
use crate::application::repository::TradeRepository;
use crate::domain::{Direction, PositionRecord, Trade};

/// Breakeven engine tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakevenConfig {
    /// Offset added beyond the entry fill, in the profitable direction.
    pub offset: Decimal,
    /// Minimum distance a new stop must keep from the observed market price.
    /// Candidates closer than this are pushed further away from price so the
    /// stop does not trip on ordinary noise one tick later.
    pub min_stop_distance: Decimal,
}

impl Default for BreakevenConfig {
    fn default() -> Self {
        Self {
            // One pip-equivalent on 5-digit FX quotes.
            offset: Decimal::new(1, 4),
            min_stop_distance: Decimal::new(5, 4),
        }
    }
}

/// Moves surviving legs' stops to breakeven after a trade's first closure.
pub struct BreakevenEngine<G, S> {
    config: BreakevenConfig,
    gateway: Arc<G>,
    repository: Arc<TradeRepository<S>>,
    events: EventBus,
}

impl<G, S> BreakevenEngine<G, S>
where
    G: BrokerGateway,
    S: TradeStore,
{
    /// Create a new engine.
    #[must_use]
    pub fn new(
        config: BreakevenConfig,
        gateway: Arc<G>,
        repository: Arc<TradeRepository<S>>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            gateway,
            repository,
            events,
        }
    }

    /// Apply the breakeven transition to a trade's surviving legs.
    ///
    /// Issues one modify call per open leg. A failed modification is stashed
    /// on the leg for retry on later monitor ticks; it does not abort the
    /// other legs. The trade's flag latches once every survivor has had an
    /// attempt, successful or not.
    pub async fn apply(&self, trade_id: Uuid) {
        let Some(trade) = self.repository.get(trade_id).await else {
            return;
        };
        if trade.breakeven_applied {
            return;
        }
        let survivors: Vec<PositionRecord> = trade.open_legs().cloned().collect();
        if survivors.is_empty() {
            return;
        }

        let mut adjusted = 0usize;
        for leg in &survivors {
            // Each leg re-prices from its own fill: sequentially placed legs
            // fill at different prices under slippage.
            let candidate = self.candidate(leg.entry_fill_price, trade.direction);
            let target = self.clamp(candidate, leg.current_price, trade.direction);

            match self.gateway.modify_position(&leg.ticket, target).await {
                Ok(()) => {
                    self.repository
                        .apply_leg_stop(trade.id, &leg.ticket, target)
                        .await;
                    adjusted += 1;
                    tracing::info!(
                        trade_id = %trade.id,
                        ticket = %leg.ticket,
                        entry_fill = %leg.entry_fill_price,
                        new_stop = %target,
                        "Breakeven stop applied"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        trade_id = %trade.id,
                        ticket = %leg.ticket,
                        error = %e,
                        "Breakeven stop modification failed, retrying on a later tick"
                    );
                    self.repository
                        .set_leg_pending_stop(trade.id, &leg.ticket, target)
                        .await;
                }
            }
        }

        self.repository.mark_breakeven_applied(trade.id).await;
        self.events.publish_trade(TradeEvent::BreakevenApplied {
            trade_id: trade.id,
            adjusted,
        });
    }

    /// Retry a previously failed stop modification for one leg.
    ///
    /// Called by the monitor on ticks where the leg is still open and carries
    /// a pending stop. The desired value is re-clamped against the fresh
    /// price before the attempt.
    pub async fn retry_pending(
        &self,
        trade: &Trade,
        leg: &PositionRecord,
        desired: Decimal,
        current_price: Decimal,
    ) {
        let target = self.clamp(desired, Some(current_price), trade.direction);
        match self.gateway.modify_position(&leg.ticket, target).await {
            Ok(()) => {
                self.repository
                    .apply_leg_stop(trade.id, &leg.ticket, target)
                    .await;
                tracing::info!(
                    trade_id = %trade.id,
                    ticket = %leg.ticket,
                    new_stop = %target,
                    "Pending stop modification succeeded"
                );
            }
            Err(e) => {
                tracing::warn!(
                    trade_id = %trade.id,
                    ticket = %leg.ticket,
                    error = %e,
                    "Pending stop modification failed again"
                );
            }
        }
    }

    fn candidate(&self, entry_fill: Decimal, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => entry_fill + self.config.offset,
            Direction::Short => entry_fill - self.config.offset,
        }
    }

    /// Enforce the minimum buffer between a stop candidate and the market
    /// price, moving the candidate away from price, never closer.
    fn clamp(&self, candidate: Decimal, current: Option<Decimal>, direction: Direction) -> Decimal {
        let Some(price) = current else {
            return candidate;
        };
        match direction {
            Direction::Long => {
                let limit = price - self.config.min_stop_distance;
                if candidate > limit { limit } else { candidate }
            }
            Direction::Short => {
                let limit = price + self.config.min_stop_distance;
                if candidate < limit { limit } else { candidate }
            }
        }
    }
}
