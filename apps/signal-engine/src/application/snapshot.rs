//! Point-in-time state snapshots pushed by the realtime sync broadcaster.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ports::broker_gateway::AccountInfo;
use crate::domain::{Direction, PositionRecord, Trade};

/// One open leg, flattened for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Owning trade identity.
    pub trade_id: Uuid,
    /// Symbol traded.
    pub symbol: String,
    /// Trade direction.
    pub direction: Direction,
    /// Broker ticket of the leg.
    pub ticket: String,
    /// Take-profit index the leg targets.
    pub tp_index: usize,
    /// Entry fill price of the leg.
    pub entry_fill_price: Decimal,
    /// Current stop-loss level.
    pub stop_loss: Decimal,
    /// Take-profit level.
    pub take_profit: Decimal,
    /// Lot size.
    pub lot_size: Decimal,
    /// Last observed market price, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    /// Last observed unrealized P&L, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<Decimal>,
}

impl PositionSnapshot {
    /// Flatten one open leg of a trade.
    #[must_use]
    pub fn from_leg(trade: &Trade, leg: &PositionRecord) -> Self {
        Self {
            trade_id: trade.id,
            symbol: trade.symbol.clone(),
            direction: trade.direction,
            ticket: leg.ticket.clone(),
            tp_index: leg.tp_index,
            entry_fill_price: leg.entry_fill_price,
            stop_loss: leg.stop_loss,
            take_profit: leg.take_profit,
            lot_size: leg.lot_size,
            current_price: leg.current_price,
            unrealized_pnl: leg.unrealized_pnl,
        }
    }
}

/// Aggregate statistics over the trade set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Number of active (not yet archived) trades.
    pub active_trades: usize,
    /// Number of open legs across all active trades.
    pub open_positions: usize,
    /// Number of archived (fully closed) trades.
    pub closed_trades: u64,
    /// Realized P&L across active and archived trades.
    pub realized_pnl: Decimal,
    /// Sum of last observed unrealized P&L across open legs.
    pub unrealized_pnl: Decimal,
}

/// Full snapshot captured on a broadcaster tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSnapshot {
    /// Account state.
    pub account: AccountInfo,
    /// Open legs, flattened across all active trades.
    pub positions: Vec<PositionSnapshot>,
    /// Aggregate statistics.
    pub stats: StatsSnapshot,
    /// When the snapshot was captured.
    pub captured_at: DateTime<Utc>,
}

/// Per-field thresholds for snapshot change detection.
///
/// Monetary fields move in account-currency units; price fields move in
/// quote units, so they get separate granularities.
#[derive(Debug, Clone, Copy)]
pub struct SyncThresholds {
    /// Minimum move on monetary fields (balance, equity, P&L) to count as a
    /// change.
    pub monetary: Decimal,
    /// Minimum move on price fields (prices, stops) to count as a change.
    pub price: Decimal,
}

impl SyncSnapshot {
    /// Whether any tracked field moved beyond its threshold since `previous`.
    #[must_use]
    pub fn differs_from(&self, previous: &Self, thresholds: &SyncThresholds) -> bool {
        if account_changed(&self.account, &previous.account, thresholds.monetary) {
            return true;
        }
        if stats_changed(&self.stats, &previous.stats, thresholds.monetary) {
            return true;
        }
        if self.positions.len() != previous.positions.len() {
            return true;
        }
        self.positions
            .iter()
            .zip(previous.positions.iter())
            .any(|(new, old)| position_changed(new, old, thresholds))
    }
}

fn beyond(new: Decimal, old: Decimal, threshold: Decimal) -> bool {
    (new - old).abs() >= threshold
}

fn opt_beyond(new: Option<Decimal>, old: Option<Decimal>, threshold: Decimal) -> bool {
    match (new, old) {
        (Some(a), Some(b)) => beyond(a, b, threshold),
        (None, None) => false,
        _ => true,
    }
}

fn account_changed(new: &AccountInfo, old: &AccountInfo, threshold: Decimal) -> bool {
    beyond(new.balance, old.balance, threshold)
        || beyond(new.equity, old.equity, threshold)
        || beyond(new.margin, old.margin, threshold)
}

fn stats_changed(new: &StatsSnapshot, old: &StatsSnapshot, threshold: Decimal) -> bool {
    new.active_trades != old.active_trades
        || new.open_positions != old.open_positions
        || new.closed_trades != old.closed_trades
        || beyond(new.realized_pnl, old.realized_pnl, threshold)
        || beyond(new.unrealized_pnl, old.unrealized_pnl, threshold)
}

fn position_changed(new: &PositionSnapshot, old: &PositionSnapshot, t: &SyncThresholds) -> bool {
    new.ticket != old.ticket
        || beyond(new.stop_loss, old.stop_loss, t.price)
        || opt_beyond(new.current_price, old.current_price, t.price)
        || opt_beyond(new.unrealized_pnl, old.unrealized_pnl, t.monetary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn thresholds() -> SyncThresholds {
        SyncThresholds {
            monetary: dec!(0.01),
            price: dec!(0.00001),
        }
    }

    fn base_snapshot() -> SyncSnapshot {
        SyncSnapshot {
            account: AccountInfo {
                balance: dec!(10000),
                equity: dec!(10000),
                margin: dec!(0),
            },
            positions: vec![],
            stats: StatsSnapshot {
                active_trades: 0,
                open_positions: 0,
                closed_trades: 0,
                realized_pnl: dec!(0),
                unrealized_pnl: dec!(0),
            },
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn identical_snapshots_do_not_differ() {
        let snapshot = base_snapshot();
        assert!(!snapshot.differs_from(&snapshot.clone(), &thresholds()));
    }

    #[test]
    fn sub_threshold_monetary_move_is_ignored() {
        let old = base_snapshot();
        let mut new = old.clone();
        new.account.equity = dec!(10000.005);
        assert!(!new.differs_from(&old, &thresholds()));

        new.account.equity = dec!(10000.02);
        assert!(new.differs_from(&old, &thresholds()));
    }

    #[test]
    fn position_count_change_differs() {
        let old = base_snapshot();
        let mut new = old.clone();
        new.positions.push(PositionSnapshot {
            trade_id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            ticket: "t1".to_string(),
            tp_index: 0,
            entry_fill_price: dec!(1.0850),
            stop_loss: dec!(1.0800),
            take_profit: dec!(1.0900),
            lot_size: dec!(1.0),
            current_price: None,
            unrealized_pnl: None,
        });
        assert!(new.differs_from(&old, &thresholds()));
    }

    #[test]
    fn price_move_beyond_threshold_differs() {
        let mut old = base_snapshot();
        old.positions.push(PositionSnapshot {
            trade_id: Uuid::new_v4(),
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            ticket: "t1".to_string(),
            tp_index: 0,
            entry_fill_price: dec!(1.0850),
            stop_loss: dec!(1.0800),
            take_profit: dec!(1.0900),
            lot_size: dec!(1.0),
            current_price: Some(dec!(1.0860)),
            unrealized_pnl: Some(dec!(100)),
        });

        let mut new = old.clone();
        new.positions[0].current_price = Some(dec!(1.08601));
        assert!(new.differs_from(&old, &thresholds()));
    }

    #[test]
    fn stats_count_change_differs() {
        let old = base_snapshot();
        let mut new = old.clone();
        new.stats.closed_trades = 1;
        assert!(new.differs_from(&old, &thresholds()));
    }
}
