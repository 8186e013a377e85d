//! Trade aggregate and per-leg position records.
//!
//! One [`Trade`] is created per accepted signal. Each take-profit level that
//! was successfully placed becomes one [`PositionRecord`] ("leg") with its own
//! broker ticket and its own entry fill price. Legs close independently; the
//! trade is terminal once every leg has closed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::signal::{Direction, Signal};

/// Why a leg closed.
///
/// The gateway does not reliably report a close reason, so this is inferred
/// from the last observed market price relative to the leg's levels.
/// Best-effort: a manual close at or beyond a level classifies as that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Price reached the leg's take-profit.
    TargetHit,
    /// Price reached the leg's stop-loss.
    StopHit,
    /// Closed by an operator outside this engine.
    Manual,
    /// Could not be classified.
    Unknown,
}

impl CloseReason {
    /// Stable string form used in logs and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TargetHit => "target_hit",
            Self::StopHit => "stop_hit",
            Self::Manual => "manual",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Created, no legs placed yet.
    Pending,
    /// At least one leg placed, none closed.
    Active,
    /// Some but not all legs closed.
    Partial,
    /// All legs closed. Terminal.
    Closed,
}

impl TradeStatus {
    /// Stable string form used in logs and storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Partial => "partial",
            Self::Closed => "closed",
        }
    }

    /// Whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One brokerage position backing one take-profit level of a trade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Broker-assigned ticket ID.
    pub ticket: String,
    /// Index into the signal's ordered take-profit list.
    pub tp_index: usize,
    /// Take-profit level this leg targets.
    pub take_profit: Decimal,
    /// Current protective stop-loss level.
    pub stop_loss: Decimal,
    /// Desired stop-loss not yet acknowledged by the gateway. Retried on
    /// later monitor ticks until the modify call succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_stop_loss: Option<Decimal>,
    /// Lot size of this leg.
    pub lot_size: Decimal,
    /// Entry fill price as reported by the gateway at placement time.
    /// Sequentially placed legs fill at different prices; stop computations
    /// use this leg's own fill, never a sibling's or the signal's nominal
    /// entry.
    pub entry_fill_price: Decimal,
    /// Last observed market price for this leg.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    /// Last observed unrealized P&L for this leg.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<Decimal>,
    /// Whether the leg has closed. Closed records are immutable.
    pub closed: bool,
    /// Inferred close reason, once closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    /// When the closure was detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl PositionRecord {
    /// Create a new open leg.
    #[must_use]
    pub fn new(
        ticket: impl Into<String>,
        tp_index: usize,
        take_profit: Decimal,
        stop_loss: Decimal,
        lot_size: Decimal,
        entry_fill_price: Decimal,
    ) -> Self {
        Self {
            ticket: ticket.into(),
            tp_index,
            take_profit,
            stop_loss,
            pending_stop_loss: None,
            lot_size,
            entry_fill_price,
            current_price: None,
            unrealized_pnl: None,
            closed: false,
            close_reason: None,
            closed_at: None,
        }
    }

    /// Record an observed market price and unrealized P&L. No-op once closed.
    pub fn observe(&mut self, price: Decimal, unrealized_pnl: Decimal) {
        if self.closed {
            return;
        }
        self.current_price = Some(price);
        self.unrealized_pnl = Some(unrealized_pnl);
    }

    /// Apply a gateway-acknowledged stop-loss. Clears any pending value.
    /// No-op once closed.
    pub fn apply_stop(&mut self, stop_loss: Decimal) {
        if self.closed {
            return;
        }
        self.stop_loss = stop_loss;
        self.pending_stop_loss = None;
    }

    /// Mark the leg closed. Further mutation is refused.
    pub fn close(&mut self, reason: CloseReason, at: DateTime<Utc>) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.close_reason = Some(reason);
        self.closed_at = Some(at);
        self.pending_stop_loss = None;
        self.unrealized_pnl = None;
    }

    /// Infer why this leg closed from its last observed price.
    ///
    /// Best-effort (see [`CloseReason`]): with no observed price the result
    /// is [`CloseReason::Unknown`].
    #[must_use]
    pub fn classify_close(&self, direction: Direction) -> CloseReason {
        let Some(price) = self.current_price else {
            return CloseReason::Unknown;
        };
        match direction {
            Direction::Long => {
                if price >= self.take_profit {
                    CloseReason::TargetHit
                } else if price <= self.stop_loss {
                    CloseReason::StopHit
                } else {
                    CloseReason::Unknown
                }
            }
            Direction::Short => {
                if price <= self.take_profit {
                    CloseReason::TargetHit
                } else if price >= self.stop_loss {
                    CloseReason::StopHit
                } else {
                    CloseReason::Unknown
                }
            }
        }
    }

    /// The price the leg is assumed to have exited at for a given reason.
    #[must_use]
    pub fn exit_reference(&self, reason: CloseReason) -> Option<Decimal> {
        match reason {
            CloseReason::TargetHit => Some(self.take_profit),
            CloseReason::StopHit => Some(self.stop_loss),
            CloseReason::Manual | CloseReason::Unknown => self.current_price,
        }
    }

    /// Realized P&L of this leg against an exit price, from its own fill.
    #[must_use]
    pub fn pnl_at(&self, exit: Decimal, direction: Direction, contract_size: Decimal) -> Decimal {
        let per_unit = match direction {
            Direction::Long => exit - self.entry_fill_price,
            Direction::Short => self.entry_fill_price - exit,
        };
        per_unit * self.lot_size * contract_size
    }
}

/// Outcome of closing a leg, used to drive the breakeven transition and
/// archival without re-reading the trade.
#[derive(Debug, Clone, Copy)]
pub struct LegCloseOutcome {
    /// Take-profit index of the closed leg.
    pub tp_index: usize,
    /// This was the trade's first closure, siblings remain open, and the
    /// breakeven transition has not run yet.
    pub should_apply_breakeven: bool,
    /// Every leg of the trade is now closed.
    pub fully_closed: bool,
    /// Trade realized P&L after accumulating this leg.
    pub realized_pnl: Decimal,
}

/// A signal's execution: one or more legs tracked through their lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Trade identity.
    pub id: Uuid,
    /// Symbol traded.
    pub symbol: String,
    /// Trade direction.
    pub direction: Direction,
    /// The originating signal, embedded read-only.
    pub signal: Signal,
    /// Lifecycle status.
    pub status: TradeStatus,
    /// Legs in take-profit order. May be fewer than the signal's levels if
    /// some placements were rejected.
    pub legs: Vec<PositionRecord>,
    /// Whether the breakeven transition has run. False-to-true at most once.
    pub breakeven_applied: bool,
    /// Take-profit index of the most recently closed leg. Observability only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_closed_tp: Option<usize>,
    /// Realized P&L accumulated from closed legs.
    pub realized_pnl: Decimal,
    /// When the trade was created.
    pub created_at: DateTime<Utc>,
    /// When the last leg closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// Create a pending trade for a signal.
    #[must_use]
    pub fn new(signal: Signal) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            signal,
            status: TradeStatus::Pending,
            legs: Vec::new(),
            breakeven_applied: false,
            last_closed_tp: None,
            realized_pnl: Decimal::ZERO,
            created_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Append a successfully placed leg.
    pub fn add_leg(&mut self, leg: PositionRecord) {
        self.legs.push(leg);
        if self.status == TradeStatus::Pending {
            self.status = TradeStatus::Active;
        }
    }

    /// Legs that have not closed.
    pub fn open_legs(&self) -> impl Iterator<Item = &PositionRecord> {
        self.legs.iter().filter(|leg| !leg.closed)
    }

    /// Number of closed legs.
    #[must_use]
    pub fn closed_leg_count(&self) -> usize {
        self.legs.iter().filter(|leg| leg.closed).count()
    }

    /// Whether every leg has closed.
    #[must_use]
    pub fn is_fully_closed(&self) -> bool {
        !self.legs.is_empty() && self.legs.iter().all(|leg| leg.closed)
    }

    /// Find an open leg by ticket.
    #[must_use]
    pub fn open_leg(&self, ticket: &str) -> Option<&PositionRecord> {
        self.legs
            .iter()
            .find(|leg| !leg.closed && leg.ticket == ticket)
    }

    /// Find an open leg by ticket, mutably.
    pub fn open_leg_mut(&mut self, ticket: &str) -> Option<&mut PositionRecord> {
        self.legs
            .iter_mut()
            .find(|leg| !leg.closed && leg.ticket == ticket)
    }

    /// Close a leg, accumulate its realized P&L and advance the status
    /// machine. Returns `None` if no open leg carries the ticket.
    pub fn close_leg(
        &mut self,
        ticket: &str,
        reason: CloseReason,
        pnl: Decimal,
        at: DateTime<Utc>,
    ) -> Option<LegCloseOutcome> {
        let already_applied = self.breakeven_applied;
        let leg = self.open_leg_mut(ticket)?;
        let tp_index = leg.tp_index;
        leg.close(reason, at);

        self.realized_pnl += pnl;
        self.last_closed_tp = Some(tp_index);

        let closed = self.closed_leg_count();
        let open = self.legs.len() - closed;
        let fully_closed = open == 0;

        if fully_closed {
            self.status = TradeStatus::Closed;
            self.closed_at = Some(at);
        } else {
            self.status = TradeStatus::Partial;
        }

        Some(LegCloseOutcome {
            tp_index,
            should_apply_breakeven: !already_applied && closed == 1 && open > 0,
            fully_closed,
            realized_pnl: self.realized_pnl,
        })
    }

    /// Latch the breakeven flag. Idempotent; the flag never resets.
    pub fn mark_breakeven_applied(&mut self) {
        self.breakeven_applied = true;
    }
}
