// Allow unwrap/expect in tests - tests should panic on unexpected errors
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Signal Engine - Core Library
//!
//! Signal-to-position lifecycle engine: turns parsed trading signals into
//! per-take-profit brokerage orders, tracks each resulting position through
//! its lifecycle, re-prices protective stops as partial targets are reached,
//! and keeps external observers synchronized over a dual channel (live
//! broadcast plus durable store).
//!
//! # Architecture (Hexagonal)
//!
//! - **Domain**: signals, trades, position records, close classification.
//! - **Application**: ports (`BrokerGateway`, `TradeStore`), the trade
//!   repository, the event bus, and the four services - order placement
//!   orchestrator, position monitor, breakeven engine, realtime sync
//!   broadcaster.
//! - **Infrastructure**: broker backends (paper simulator, retry decorator,
//!   scripted test double) and persistence (SQLite, in-memory).
//!
//! The whole engine runs on one cooperative scheduler: monitor ticks,
//! broadcaster ticks and in-flight placements interleave as tasks; the
//! repository's single write lock serializes every trade mutation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - core business types with no external dependencies.
pub mod domain;

/// Application layer - ports, repository, events and services.
pub mod application;

/// Infrastructure layer - adapters and external integrations.
pub mod infrastructure;

/// Configuration loading and validation.
pub mod config;

// Domain re-exports
pub use domain::{CloseReason, Direction, EntryPrice, PositionRecord, Signal, Trade, TradeStatus};

// Application re-exports
pub use application::ports::{
    AccountInfo, BrokerGateway, GatewayError, OpenPosition, OrderFill, PlaceOrderRequest,
    StoreError, TradeStore,
};
pub use application::services::{
    BreakevenConfig, BreakevenEngine, MonitorConfig, OrchestratorConfig,
    OrderPlacementOrchestrator, PlacementOutcome, PositionMonitor, RealtimeSyncBroadcaster,
    SyncConfig,
};
pub use application::{
    EngineEvent, EventBus, PositionSnapshot, StatsSnapshot, SyncSnapshot, SyncThresholds,
    TradeEvent, TradeRepository,
};

// Infrastructure re-exports
pub use infrastructure::broker::{
    PaperBroker, PaperConfig, RetryPolicy, RetryingGateway, ScriptedBroker, build_gateway,
};
pub use infrastructure::persistence::{InMemoryTradeStore, SqliteTradeStore};

// Configuration re-exports
pub use config::{ConfigError, EngineConfig, load_config};
