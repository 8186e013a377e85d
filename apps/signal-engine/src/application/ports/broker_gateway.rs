//! Broker Gateway Port (Driven Port)
//!
//! Abstract brokerage contract. Every call is independent and may fail
//! without affecting other calls; the gateway is non-transactional.
//! Concrete backends are selected at startup configuration time.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::Direction;

/// Request to place one order (one leg of a trade).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    /// Symbol to trade.
    pub symbol: String,
    /// Order direction.
    pub direction: Direction,
    /// Requested entry price.
    pub entry: Decimal,
    /// Protective stop-loss level.
    pub stop_loss: Decimal,
    /// Take-profit level for this leg.
    pub take_profit: Decimal,
    /// Lot size.
    pub lot_size: Decimal,
}

/// Result of a successful order placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFill {
    /// Broker-assigned ticket ID for the new position.
    pub ticket: String,
    /// Actual fill price. Differs from the requested entry under slippage.
    pub fill_price: Decimal,
}

/// One open position as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Broker-assigned ticket ID.
    pub ticket: String,
    /// Current market price for the position's symbol.
    pub current_price: Decimal,
    /// Unrealized P&L of the position.
    pub unrealized_pnl: Decimal,
}

/// Account state as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Account balance (realized).
    pub balance: Decimal,
    /// Account equity (balance plus unrealized P&L).
    pub equity: Decimal,
    /// Margin currently in use.
    pub margin: Decimal,
}

/// Broker gateway error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The broker refused the request.
    #[error("order rejected: {reason}")]
    Rejected {
        /// Broker-reported rejection reason.
        reason: String,
    },

    /// Network failure or timeout; the call may not have reached the broker.
    #[error("gateway unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// Rate limited by the broker.
    #[error("rate limited by broker")]
    RateLimited,

    /// The ticket is not known to the broker.
    #[error("unknown ticket: {ticket}")]
    UnknownTicket {
        /// The missing ticket ID.
        ticket: String,
    },

    /// Unclassified gateway error.
    #[error("gateway error: {message}")]
    Unknown {
        /// Error details.
        message: String,
    },
}

impl GatewayError {
    /// Whether a retry can help.
    ///
    /// Unclassified errors are not retried: a duplicate submission is worse
    /// than a deferred one.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::RateLimited)
    }
}

/// Port for brokerage interactions.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Place one order. Returns the broker ticket and the actual fill price.
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<OrderFill, GatewayError>;

    /// Move the stop-loss of an open position.
    async fn modify_position(
        &self,
        ticket: &str,
        new_stop_loss: Decimal,
    ) -> Result<(), GatewayError>;

    /// Close an open position at market.
    async fn close_position(&self, ticket: &str) -> Result<(), GatewayError>;

    /// Fetch the full set of currently open positions.
    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError>;

    /// Fetch account balance, equity and margin.
    async fn get_account_info(&self) -> Result<AccountInfo, GatewayError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
