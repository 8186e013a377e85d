//! Engine event stream for live observers.
//!
//! Events ride a `tokio::sync::broadcast` channel: publishing never blocks,
//! and a lagged observer loses old events rather than slowing the engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::ports::broker_gateway::AccountInfo;
use super::snapshot::{PositionSnapshot, StatsSnapshot};
use crate::domain::{CloseReason, Direction};

/// Trade lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TradeEvent {
    /// A trade was opened with at least one placed leg.
    Opened {
        /// Trade identity.
        trade_id: Uuid,
        /// Symbol traded.
        symbol: String,
        /// Trade direction.
        direction: Direction,
        /// Number of legs successfully placed.
        legs: usize,
    },
    /// One leg of a trade closed.
    LegClosed {
        /// Trade identity.
        trade_id: Uuid,
        /// Broker ticket of the closed leg.
        ticket: String,
        /// Take-profit index of the closed leg.
        tp_index: usize,
        /// Inferred close reason.
        reason: CloseReason,
        /// Trade realized P&L after this closure.
        realized_pnl: Decimal,
    },
    /// Protective stops were moved to breakeven on the surviving legs.
    BreakevenApplied {
        /// Trade identity.
        trade_id: Uuid,
        /// Number of legs whose stop modification succeeded immediately.
        adjusted: usize,
    },
    /// Every leg of the trade has closed.
    Closed {
        /// Trade identity.
        trade_id: Uuid,
        /// Final realized P&L of the trade.
        realized_pnl: Decimal,
    },
}

/// Event pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Account state changed.
    AccountUpdate(AccountInfo),
    /// Open position set changed.
    PositionsUpdate(Vec<PositionSnapshot>),
    /// Aggregate statistics changed.
    StatsUpdate(StatsSnapshot),
    /// Trade lifecycle event.
    Trade(TradeEvent),
}

/// Handle for publishing and subscribing to engine events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Succeeds whether or not anyone is listening.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a trade lifecycle event.
    pub fn publish_trade(&self, event: TradeEvent) {
        self.publish(EngineEvent::Trade(event));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        let trade_id = Uuid::new_v4();
        bus.publish_trade(TradeEvent::Opened {
            trade_id,
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            legs: 3,
        });

        let event = rx.recv().await.unwrap();
        match event {
            EngineEvent::Trade(TradeEvent::Opened { trade_id: id, legs, .. }) => {
                assert_eq!(id, trade_id);
                assert_eq!(legs, 3);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = EventBus::new(8);
        bus.publish_trade(TradeEvent::Closed {
            trade_id: Uuid::new_v4(),
            realized_pnl: dec!(510),
        });
    }

    #[test]
    fn trade_event_serializes_with_tag() {
        let event = TradeEvent::BreakevenApplied {
            trade_id: Uuid::new_v4(),
            adjusted: 2,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"breakeven_applied\""));
    }
}
