//! In-memory trade store for testing and development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::trade_store::{StoreError, TradeStore};
use crate::application::snapshot::SyncSnapshot;
use crate::domain::Trade;

/// In-memory implementation of [`TradeStore`].
///
/// Suitable for tests and development. Not for production use: nothing
/// survives the process.
#[derive(Debug, Default)]
pub struct InMemoryTradeStore {
    active: RwLock<HashMap<String, Trade>>,
    archived: RwLock<Vec<Trade>>,
    snapshots: RwLock<Vec<SyncSnapshot>>,
    fail_writes: AtomicBool,
}

impl InMemoryTradeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until cleared. For persistence-failure tests.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of archived trades.
    #[must_use]
    pub fn archived_count(&self) -> usize {
        self.archived.read().len()
    }

    /// Number of recorded snapshots.
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Clone the most recently recorded snapshot.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<SyncSnapshot> {
        self.snapshots.read().last().cloned()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TradeStore for InMemoryTradeStore {
    async fn save_trades(&self, trades: &[Trade]) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut active = self.active.write();
        active.clear();
        for trade in trades {
            active.insert(trade.id.to_string(), trade.clone());
        }
        Ok(())
    }

    async fn archive_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        self.check_writable()?;
        self.active.write().remove(&trade.id.to_string());
        self.archived.write().push(trade.clone());
        Ok(())
    }

    async fn load_active_trades(&self) -> Result<Vec<Trade>, StoreError> {
        Ok(self.active.read().values().cloned().collect())
    }

    async fn record_snapshot(&self, snapshot: &SyncSnapshot) -> Result<(), StoreError> {
        self.check_writable()?;
        self.snapshots.write().push(snapshot.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, EntryPrice, Signal};
    use rust_decimal_macros::dec;

    fn test_trade() -> Trade {
        Trade::new(Signal::new(
            "EURUSD",
            Direction::Long,
            EntryPrice::Level(dec!(1.0850)),
            dec!(1.0800),
            vec![dec!(1.0900)],
        ))
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let store = InMemoryTradeStore::new();
        let trade = test_trade();
        let id = trade.id;

        store.save_trades(&[trade]).await.unwrap();

        let loaded = store.load_active_trades().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
    }

    #[tokio::test]
    async fn archive_removes_from_active() {
        let store = InMemoryTradeStore::new();
        let trade = test_trade();

        store.save_trades(std::slice::from_ref(&trade)).await.unwrap();
        store.archive_trade(&trade).await.unwrap();

        assert!(store.load_active_trades().await.unwrap().is_empty());
        assert_eq!(store.archived_count(), 1);
    }

    #[tokio::test]
    async fn failed_writes_return_error() {
        let store = InMemoryTradeStore::new();
        store.set_fail_writes(true);

        let result = store.save_trades(&[test_trade()]).await;
        assert!(result.is_err());
    }
}
