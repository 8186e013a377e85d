//! Application layer - ports, repository, events and services.

pub mod events;
pub mod ports;
pub mod repository;
pub mod services;
pub mod snapshot;

pub use events::{EngineEvent, EventBus, TradeEvent};
pub use repository::{ReconcileSummary, TradeRepository};
pub use snapshot::{PositionSnapshot, StatsSnapshot, SyncSnapshot, SyncThresholds};
