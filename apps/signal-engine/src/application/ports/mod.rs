//! Ports - interfaces to external systems.

pub mod broker_gateway;
pub mod trade_store;

pub use broker_gateway::{
    AccountInfo, BrokerGateway, GatewayError, OpenPosition, OrderFill, PlaceOrderRequest,
};
pub use trade_store::{StoreError, TradeStore};
