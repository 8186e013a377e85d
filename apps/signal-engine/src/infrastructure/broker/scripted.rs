//! Scripted broker gateway for tests.
//!
//! Every call either pops a programmed outcome or falls back to a benign
//! default, and every call is recorded, so tests can drive failure sequences
//! and assert on the exact calls the engine made.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::application::ports::broker_gateway::{
    AccountInfo, BrokerGateway, GatewayError, OpenPosition, OrderFill, PlaceOrderRequest,
};

#[derive(Debug)]
struct ScriptState {
    next_ticket: u64,
    fills: VecDeque<Result<OrderFill, GatewayError>>,
    modify_results: VecDeque<Result<(), GatewayError>>,
    position_errors: VecDeque<GatewayError>,
    account_errors: VecDeque<GatewayError>,
    open: Vec<OpenPosition>,
    account: AccountInfo,
    place_requests: Vec<PlaceOrderRequest>,
    modify_calls: Vec<(String, Decimal)>,
    closed_tickets: Vec<String>,
}

impl Default for ScriptState {
    fn default() -> Self {
        Self {
            next_ticket: 1,
            fills: VecDeque::new(),
            modify_results: VecDeque::new(),
            position_errors: VecDeque::new(),
            account_errors: VecDeque::new(),
            open: Vec::new(),
            account: AccountInfo {
                balance: Decimal::new(10_000, 0),
                equity: Decimal::new(10_000, 0),
                margin: Decimal::ZERO,
            },
            place_requests: Vec::new(),
            modify_calls: Vec::new(),
            closed_tickets: Vec::new(),
        }
    }
}

/// Programmable mock implementation of [`BrokerGateway`].
#[derive(Debug, Default)]
pub struct ScriptedBroker {
    state: Mutex<ScriptState>,
}

impl ScriptedBroker {
    /// Create a broker with no programmed outcomes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful fill for the next placement.
    pub fn push_fill(&self, ticket: &str, fill_price: Decimal) {
        self.state.lock().fills.push_back(Ok(OrderFill {
            ticket: ticket.to_string(),
            fill_price,
        }));
    }

    /// Queue a failed placement.
    pub fn push_fill_error(&self, error: GatewayError) {
        self.state.lock().fills.push_back(Err(error));
    }

    /// Queue a failed stop modification. Unqueued modifications succeed.
    pub fn push_modify_error(&self, error: GatewayError) {
        self.state.lock().modify_results.push_back(Err(error));
    }

    /// Queue a failed open-position fetch.
    pub fn push_positions_error(&self, error: GatewayError) {
        self.state.lock().position_errors.push_back(error);
    }

    /// Queue a failed account fetch.
    pub fn push_account_error(&self, error: GatewayError) {
        self.state.lock().account_errors.push_back(error);
    }

    /// Insert or update an open position.
    pub fn set_open(&self, ticket: &str, current_price: Decimal, unrealized_pnl: Decimal) {
        let mut state = self.state.lock();
        if let Some(position) = state.open.iter_mut().find(|p| p.ticket == ticket) {
            position.current_price = current_price;
            position.unrealized_pnl = unrealized_pnl;
        } else {
            state.open.push(OpenPosition {
                ticket: ticket.to_string(),
                current_price,
                unrealized_pnl,
            });
        }
    }

    /// Drop a position from the live set, simulating a broker-side closure.
    pub fn remove_open(&self, ticket: &str) {
        self.state.lock().open.retain(|p| p.ticket != ticket);
    }

    /// Set the reported account state.
    pub fn set_account(&self, balance: Decimal, equity: Decimal, margin: Decimal) {
        self.state.lock().account = AccountInfo {
            balance,
            equity,
            margin,
        };
    }

    /// Every placement request received, in order.
    #[must_use]
    pub fn place_requests(&self) -> Vec<PlaceOrderRequest> {
        self.state.lock().place_requests.clone()
    }

    /// Every stop modification received, in order.
    #[must_use]
    pub fn modify_calls(&self) -> Vec<(String, Decimal)> {
        self.state.lock().modify_calls.clone()
    }

    /// Every explicit close received, in order.
    #[must_use]
    pub fn closed_tickets(&self) -> Vec<String> {
        self.state.lock().closed_tickets.clone()
    }
}

#[async_trait]
impl BrokerGateway for ScriptedBroker {
    async fn place_order(&self, request: PlaceOrderRequest) -> Result<OrderFill, GatewayError> {
        let mut state = self.state.lock();
        state.place_requests.push(request.clone());

        let result = state.fills.pop_front().unwrap_or_else(|| {
            let ticket = format!("S-{}", state.next_ticket);
            state.next_ticket += 1;
            Ok(OrderFill {
                ticket,
                fill_price: request.entry,
            })
        });

        if let Ok(fill) = &result {
            state.open.push(OpenPosition {
                ticket: fill.ticket.clone(),
                current_price: fill.fill_price,
                unrealized_pnl: Decimal::ZERO,
            });
        }
        result
    }

    async fn modify_position(
        &self,
        ticket: &str,
        new_stop_loss: Decimal,
    ) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.modify_calls.push((ticket.to_string(), new_stop_loss));
        state.modify_results.pop_front().unwrap_or(Ok(()))
    }

    async fn close_position(&self, ticket: &str) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        state.closed_tickets.push(ticket.to_string());
        state.open.retain(|p| p.ticket != ticket);
        Ok(())
    }

    async fn get_open_positions(&self) -> Result<Vec<OpenPosition>, GatewayError> {
        let mut state = self.state.lock();
        if let Some(error) = state.position_errors.pop_front() {
            return Err(error);
        }
        Ok(state.open.clone())
    }

    async fn get_account_info(&self) -> Result<AccountInfo, GatewayError> {
        let mut state = self.state.lock();
        if let Some(error) = state.account_errors.pop_front() {
            return Err(error);
        }
        Ok(state.account.clone())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
