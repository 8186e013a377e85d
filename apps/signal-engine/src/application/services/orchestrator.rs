//! Order placement orchestrator.
//!
//! Converts one accepted signal into one brokerage order per take-profit
//! level. Legs are placed sequentially with a pacing delay to stay under
//! broker-side rate limits; each placement's outcome is independent, and a
//! rejected leg is omitted rather than retried.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::application::events::{EventBus, TradeEvent};
use crate::application::ports::broker_gateway::{BrokerGateway, PlaceOrderRequest};
use crate::application::ports::trade_store::TradeStore;
use crate::application::repository::TradeRepository;
use crate::domain::{PositionRecord, Signal, Trade};

/// Orchestrator tuning.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Delay between consecutive order submissions.
    pub order_pacing: Duration,
    /// Lot size used when the signal does not specify one.
    pub default_lot_size: Decimal,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            order_pacing: Duration::from_millis(500),
            default_lot_size: Decimal::new(10, 2),
        }
    }
}

/// Result of executing a signal.
#[derive(Debug, Clone, Copy)]
pub struct PlacementOutcome {
    /// Identity of the persisted trade, if at least one leg was placed.
    pub trade_id: Option<Uuid>,
    /// Number of legs the signal asked for.
    pub requested: usize,
    /// Number of legs actually placed.
    pub placed: usize,
}

/// Turns accepted signals into tracked trades.
pub struct OrderPlacementOrchestrator<G, S> {
    config: OrchestratorConfig,
    gateway: Arc<G>,
    repository: Arc<TradeRepository<S>>,
    events: EventBus,
}

impl<G, S> OrderPlacementOrchestrator<G, S>
where
    G: BrokerGateway,
    S: TradeStore,
{
    /// Create a new orchestrator.
    #[must_use]
    pub fn new(
        config: OrchestratorConfig,
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

    /// Execute a signal: place one order per take-profit level, in order.
    ///
    /// The trade is persisted once after the full attempt sequence, with
    /// however many legs succeeded. A trade with zero legs is discarded and
    /// not retried.
    pub async fn execute(&self, signal: Signal) -> PlacementOutcome {
        let entry = signal.entry.reference();
        let lot_size = signal.lot_size.unwrap_or(self.config.default_lot_size);
        let requested = signal.take_profits.len();
        let mut trade = Trade::new(signal.clone());

        tracing::info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            direction = %signal.direction,
            entry = %entry,
            legs = requested,
            "Executing signal"
        );

        for (tp_index, take_profit) in signal.take_profits.iter().copied().enumerate() {
            if tp_index > 0 && !self.config.order_pacing.is_zero() {
                tokio::time::sleep(self.config.order_pacing).await;
            }

            let request = PlaceOrderRequest {
                symbol: signal.symbol.clone(),
                direction: signal.direction,
                entry,
                stop_loss: signal.stop_loss,
                take_profit,
                lot_size,
            };

            match self.gateway.place_order(request).await {
                Ok(fill) => {
                    tracing::info!(
                        symbol = %signal.symbol,
                        tp_index,
                        ticket = %fill.ticket,
                        fill_price = %fill.fill_price,
                        "Leg placed"
                    );
                    trade.add_leg(PositionRecord::new(
                        fill.ticket,
                        tp_index,
                        take_profit,
                        signal.stop_loss,
                        lot_size,
                        fill.fill_price,
                    ));
                }
                Err(e) => {
                    tracing::warn!(
                        symbol = %signal.symbol,
                        tp_index,
                        error = %e,
                        "Leg placement failed, omitting leg"
                    );
                }
            }
        }

        let placed = trade.legs.len();
        if placed == 0 {
            tracing::warn!(
                signal_id = %signal.id,
                symbol = %signal.symbol,
                "Every leg placement failed, discarding trade"
            );
            return PlacementOutcome {
                trade_id: None,
                requested,
                placed,
            };
        }

        let trade_id = trade.id;
        self.repository.insert(trade).await;
        self.events.publish_trade(TradeEvent::Opened {
            trade_id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            legs: placed,
        });

        PlacementOutcome {
            trade_id: Some(trade_id),
            requested,
            placed,
        }
    }
}
