//! Paper broker: an in-process simulated brokerage.
//!
//! Fills orders with configurable slippage, marks positions to prices fed in
//! via [`PaperBroker::set_price`], and closes positions broker-side when a
//! mark crosses their stop or target, which is exactly the behavior the
//! position monitor has to reconcile against.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::broker_gateway::{
    AccountInfo, BrokerGateway, GatewayError, OpenPosition, OrderFill, PlaceOrderRequest,
};
use crate::domain::Direction;

/// Paper broker tuning.
#[derive(Debug, Clone, Copy)]
pub struct PaperConfig {
    /// Absolute price slippage applied against the requested entry.
    pub slippage: Decimal,
    /// Starting account balance.
    pub starting_balance: Decimal,
    /// Units per lot.
    pub contract_size: Decimal,
    /// Account leverage used for margin accounting.
    pub leverage: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            slippage: Decimal::new(1, 4),
            starting_balance: Decimal::new(10_000, 0),
            contract_size: Decimal::new(100_000, 0),
            leverage: Decimal::new(100, 0),
        }
    }
}

/// One simulated open position.
#[derive(Debug, Clone)]
struct PaperPosition {
    symbol: String,
    direction: Direction,
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    lot_size: Decimal,
    mark: Decimal,
}

impl PaperPosition {
    fn unrealized(&self, contract_size: Decimal) -> Decimal {
        let per_unit = match self.direction {
            Direction::Long => self.mark - self.entry,
            Direction::Short => self.entry - self.mark,
        };
        per_unit * self.lot_size * contract_size
    }
}

#[derive(Debug)]
struct PaperState {
    next_ticket: u64,
    positions: HashMap<String, PaperPosition>,
    balance: Decimal,
}

/// Simulated implementation of [`BrokerGateway`].
#[derive(Debug)]
pub struct PaperBroker {
    config: PaperConfig,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    /// Create a paper broker.
    #[must_use]
    pub fn new(config: PaperConfig) -> Self {
        let balance = config.starting_balance;
        Self {
            config,
            state: Mutex::new(PaperState {
                next_ticket: 1,
                positions: HashMap::new(),
                balance,
            }),
        }
    }

    /// Feed a new market price for a symbol.
    ///
    /// Marks every position on that symbol and closes those whose stop or
    /// target the price crossed, realizing their P&L into the balance.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.lock();
        let mut filled: Vec<(String, Decimal)> = Vec::new();

        for (ticket, position) in &mut state.positions {
            if position.symbol != symbol {
                continue;
            }
            position.mark = price;

            let exit = match position.direction {
                Direction::Long => {
                    if price >= position.take_profit {
                        Some(position.take_profit)
                    } else if price <= position.stop_loss {
                        Some(position.stop_loss)
                    } else {
                        None
                    }
                }
                Direction::Short => {
                    if price <= position.take_profit {
                        Some(position.take_profit)
                    } else if price >= position.stop_loss {
                        Some(position.stop_loss)
                    } else {
                        None
                    }
                }
            };
            if let Some(exit) = exit {
                filled.push((ticket.clone(), exit));
            }
        }

        for (ticket, exit) in filled {
            if let Some(mut position) = state.positions.remove(&ticket) {
                position.mark = exit;
                let pnl = position.unrealized(self.config.contract_size);
                state.balance += pnl;
                tracing::debug!(
                    ticket = %ticket,
                    exit = %exit,
                    pnl = %pnl,
                    "Paper position closed by price cross"
                );
            }
        }
    }

    /// Current simulated balance.
    #[must_use]
    pub fn balance(&self) -> Decimal {
        self.state.lock().balance
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<OrderFill, GatewayError> {
        if request.lot_size <= Decimal::ZERO {
            return Err(GatewayError::Rejected {
                reason: "non-positive lot size".to_string(),
            });
        }

        let fill_price = match request.direction {
            Direction::Long => request.entry + self.config.slippage,
            Direction::Short => request.entry - self.config.slippage,
        };

        let mut state = self.state.lock();
        let ticket = format!("P-{}", state.next_ticket);
        state.next_ticket += 1;
        state.positions.insert(
            ticket.clone(),
            PaperPosition {
                symbol: request.symbol,
                direction: request.direction,
                entry: fill_price,
                stop_loss: request.stop_loss,
                take_profit: request.take_profit,
                lot_size: request.lot_size,
                mark: fill_price,
            },
        );

        Ok(OrderFill { ticket, fill_price })
    }

    async fn modify_position(
        &self,
        ticket: &str,
        new_stop_loss: Decimal,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        match state.positions.get_mut(ticket) {
            Some(position) => {
                position.stop_loss = new_stop_loss;
                Ok(())
            }
            None => Err(GatewayError::UnknownTicket {
                ticket: ticket.to_string(),
            }),
        }
    }

    async fn close_position(&self, ticket: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        match state.positions.remove(ticket) {
            Some(position) => {
                let pnl = position.unrealized(self.config.contract_size);
                state.balance += pnl;
                Ok(())
            }
            None => Err(GatewayError::UnknownTicket {
                ticket: ticket.to_string(),
            }),
        }
    }

    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError> {
        let state = self.state.lock();
        Ok(state
            .positions
            .iter()
            .map(|(ticket, position)| OpenPosition {
                ticket: ticket.clone(),
                current_price: position.mark,
                unrealized_pnl: position.unrealized(self.config.contract_size),
            })
            .collect())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, GatewayError> {
        let state = self.state.lock();
        let unrealized: Decimal = state
            .positions
            .values()
            .map(|p| p.unrealized(self.config.contract_size))
            .sum();
        let margin: Decimal = state
            .positions
            .values()
            .map(|p| p.entry * p.lot_size * self.config.contract_size / self.config.leverage)
            .sum();

        Ok(AccountInfo {
            balance: state.balance,
            equity: state.balance + unrealized,
            margin,
        })
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> PaperConfig {
        PaperConfig {
            slippage: dec!(0.0001),
            starting_balance: dec!(10000),
            contract_size: dec!(100000),
            leverage: dec!(100),
        }
    }

    fn long_request() -> PlaceOrderRequest {
        PlaceOrderRequest {
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            entry: dec!(1.0850),
            stop_loss: dec!(1.0800),
            take_profit: dec!(1.0900),
            lot_size: dec!(1.0),
        }
    }

    #[tokio::test]
    async fn long_fill_includes_slippage() {
        let broker = PaperBroker::new(config());
        let fill = broker.place_order(long_request()).await.unwrap();

        assert_eq!(fill.ticket, "P-1");
        assert_eq!(fill.fill_price, dec!(1.0851));
    }

    #[tokio::test]
    async fn short_fill_slips_the_other_way() {
        let broker = PaperBroker::new(config());
        let mut request = long_request();
        request.direction = Direction::Short;
        request.stop_loss = dec!(1.0900);
        request.take_profit = dec!(1.0800);

        let fill = broker.place_order(request).await.unwrap();
        assert_eq!(fill.fill_price, dec!(1.0849));
    }

    #[tokio::test]
    async fn price_cross_closes_position_at_target() {
        let broker = PaperBroker::new(config());
        broker.place_order(long_request()).await.unwrap();

        broker.set_price("EURUSD", dec!(1.0905));

        assert!(broker.get_open_positions().await.unwrap().is_empty());
        // (1.0900 - 1.0851) * 100k realized into the balance.
        assert_eq!(broker.balance(), dec!(10490.00000));
    }

    #[tokio::test]
    async fn price_inside_levels_keeps_position_open() {
        let broker = PaperBroker::new(config());
        broker.place_order(long_request()).await.unwrap();

        broker.set_price("EURUSD", dec!(1.0875));

        let open = broker.get_open_positions().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].current_price, dec!(1.0875));
        assert_eq!(open[0].unrealized_pnl, dec!(240.00000));
    }

    #[tokio::test]
    async fn explicit_close_realizes_pnl_at_mark() {
        let broker = PaperBroker::new(config());
        let fill = broker.place_order(long_request()).await.unwrap();
        broker.set_price("EURUSD", dec!(1.0875));

        broker.close_position(&fill.ticket).await.unwrap();

        assert!(broker.get_open_positions().await.unwrap().is_empty());
        assert_eq!(broker.balance(), dec!(10240.00000));
    }

    #[tokio::test]
    async fn modify_unknown_ticket_fails() {
        let broker = PaperBroker::new(config());
        let result = broker.modify_position("missing", dec!(1.0850)).await;
        assert!(matches!(
            result,
            Err(GatewayError::UnknownTicket { .. })
        ));
    }

    #[tokio::test]
    async fn account_info_reflects_unrealized() {
        let broker = PaperBroker::new(config());
        broker.place_order(long_request()).await.unwrap();
        broker.set_price("EURUSD", dec!(1.0875));

        let account = broker.get_account_info().await.unwrap();
        assert_eq!(account.balance, dec!(10000));
        assert_eq!(account.equity, dec!(10240.00000));
        assert!(account.margin > Decimal::ZERO);
    }
}
