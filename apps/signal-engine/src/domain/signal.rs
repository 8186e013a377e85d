//! Trading signal consumed by the engine.
//!
//! A [`Signal`] is the structured form of a free-text trading instruction,
//! produced by an external parser and already risk-approved upstream. This
//! core treats it as an immutable input: it is never validated or re-parsed
//! here.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Buy to open, profit on rising prices.
    Long,
    /// Sell to open, profit on falling prices.
    Short,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Requested entry: a single level or a zone.
///
/// Signals often quote an entry zone rather than an exact level. Orders are
/// submitted at [`EntryPrice::reference`]; the fill the gateway reports is
/// what lands on each leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryPrice {
    /// A single entry level.
    Level(Decimal),
    /// An entry zone; orders are placed at the midpoint.
    Zone {
        /// Lower bound of the zone.
        low: Decimal,
        /// Upper bound of the zone.
        high: Decimal,
    },
}

impl EntryPrice {
    /// The price orders are submitted at.
    #[must_use]
    pub fn reference(&self) -> Decimal {
        match self {
            Self::Level(price) => *price,
            Self::Zone { low, high } => (*low + *high) / Decimal::TWO,
        }
    }
}

/// A structured trading instruction.
///
/// Carries 1-3 ordered take-profit levels; each level becomes one brokerage
/// order ("leg") when the signal is executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Unique signal ID.
    pub id: Uuid,
    /// Symbol to trade (e.g. `EURUSD`).
    pub symbol: String,
    /// Trade direction.
    pub direction: Direction,
    /// Requested entry level or zone.
    pub entry: EntryPrice,
    /// Protective stop-loss level.
    pub stop_loss: Decimal,
    /// Ordered take-profit levels (1-3).
    pub take_profits: Vec<Decimal>,
    /// Requested lot size per leg, if the instruction specified one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot_size: Option<Decimal>,
    /// When the signal was received.
    pub received_at: DateTime<Utc>,
}

impl Signal {
    /// Create a new signal.
    #[must_use]
    pub fn new(
        symbol: impl Into<String>,
        direction: Direction,
        entry: EntryPrice,
        stop_loss: Decimal,
        take_profits: Vec<Decimal>,
    ) -> Self {
        debug_assert!(
            !take_profits.is_empty() && take_profits.len() <= 3,
            "signals carry 1-3 take-profit levels"
        );
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            direction,
            entry,
            stop_loss,
            take_profits,
            lot_size: None,
            received_at: Utc::now(),
        }
    }

    /// Set the requested lot size.
    #[must_use]
    pub fn with_lot_size(mut self, lot_size: Decimal) -> Self {
        self.lot_size = Some(lot_size);
        self
    }

    /// Number of legs this signal produces when fully placed.
    #[must_use]
    pub fn leg_count(&self) -> usize {
        self.take_profits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn entry_level_reference() {
        let entry = EntryPrice::Level(dec!(1.0850));
        assert_eq!(entry.reference(), dec!(1.0850));
    }

    #[test]
    fn entry_zone_reference_is_midpoint() {
        let entry = EntryPrice::Zone {
            low: dec!(1.0840),
            high: dec!(1.0860),
        };
        assert_eq!(entry.reference(), dec!(1.0850));
    }

    #[test]
    fn signal_new() {
        let signal = Signal::new(
            "EURUSD",
            Direction::Long,
            EntryPrice::Level(dec!(1.0850)),
            dec!(1.0800),
            vec![dec!(1.0900), dec!(1.0950), dec!(1.1000)],
        );

        assert_eq!(signal.symbol, "EURUSD");
        assert_eq!(signal.leg_count(), 3);
        assert!(signal.lot_size.is_none());
    }

    #[test]
    fn signal_with_lot_size() {
        let signal = Signal::new(
            "EURUSD",
            Direction::Short,
            EntryPrice::Level(dec!(1.0850)),
            dec!(1.0900),
            vec![dec!(1.0800)],
        )
        .with_lot_size(dec!(0.5));

        assert_eq!(signal.lot_size, Some(dec!(0.5)));
    }

    #[test]
    fn signal_serde_roundtrip() {
        let signal = Signal::new(
            "XAUUSD",
            Direction::Long,
            EntryPrice::Zone {
                low: dec!(2310),
                high: dec!(2314),
            },
            dec!(2300),
            vec![dec!(2320), dec!(2330)],
        );

        let json = serde_json::to_string(&signal).unwrap();
        let restored: Signal = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.id, signal.id);
        assert_eq!(restored.entry, signal.entry);
        assert_eq!(restored.take_profits, signal.take_profits);
    }
}
