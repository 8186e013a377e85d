//! Trade Store Port (Driven Port)
//!
//! Durable storage for the trade set and broadcaster snapshots. The
//! in-memory repository stays authoritative: a failed write is logged and
//! retried on the next mutation, never propagated as fatal.

use async_trait::async_trait;

use crate::application::snapshot::SyncSnapshot;
use crate::domain::Trade;

/// Store error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach or open the store.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A query failed.
    #[error("store query error: {0}")]
    Query(String),

    /// A record could not be serialized or deserialized.
    #[error("store serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Port for durable trade and snapshot storage.
///
/// The persisted trade records embed their ordered leg lists in full, so the
/// in-memory state can be reconstructed after a restart without contacting
/// the broker.
#[async_trait]
pub trait TradeStore: Send + Sync {
    /// Upsert the full active trade set. Called after every mutating
    /// repository operation.
    async fn save_trades(&self, trades: &[Trade]) -> Result<(), StoreError>;

    /// Upsert a terminal trade into historical storage.
    async fn archive_trade(&self, trade: &Trade) -> Result<(), StoreError>;

    /// Load every non-terminal trade.
    async fn load_active_trades(&self) -> Result<Vec<Trade>, StoreError>;

    /// Record a broadcaster snapshot.
    async fn record_snapshot(&self, snapshot: &SyncSnapshot) -> Result<(), StoreError>;
}
