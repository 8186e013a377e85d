//! Authoritative in-memory trade set with write-through persistence.
//!
//! The repository exclusively owns all [`Trade`] and position record
//! instances; callers receive clones. Mutation goes through a single write
//! lock, which serializes the orchestrator's leg appends, the monitor's leg
//! closures and the breakeven engine's stop updates across interleaved ticks.
//! After every mutating operation the full active set is pushed to the
//! durable store; a failed write leaves the in-memory state authoritative
//! and is retried by the next write.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ports::trade_store::{StoreError, TradeStore};
use super::snapshot::StatsSnapshot;
use crate::domain::{CloseReason, LegCloseOutcome, Trade};

/// Result of the startup reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Legs closed because their ticket vanished from the live set.
    pub legs_closed: usize,
    /// Trades archived because every leg was closed.
    pub trades_archived: usize,
}

#[derive(Debug, Default)]
struct RepoState {
    active: HashMap<Uuid, Trade>,
    archived_trades: u64,
    archived_realized: Decimal,
}

/// Repository of active trades backed by a durable store.
pub struct TradeRepository<S> {
    store: Arc<S>,
    state: RwLock<RepoState>,
}

impl<S: TradeStore> TradeRepository<S> {
    /// Create an empty repository over a store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            state: RwLock::new(RepoState::default()),
        }
    }

    /// Load the persisted active set. Called once on startup, before
    /// monitoring resumes.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let trades = self.store.load_active_trades().await?;
        let count = trades.len();

        let mut state = self.state.write().await;
        state.active = trades.into_iter().map(|t| (t.id, t)).collect();

        tracing::info!(count, "Restored active trades from durable storage");
        Ok(count)
    }

    /// Reconcile the loaded set against the broker's live open tickets.
    ///
    /// Any open leg whose ticket is absent from `live_tickets` closed while
    /// this process was down; it is marked closed with a best-effort
    /// classification from its last persisted price. Fully closed trades are
    /// archived. Runs once between [`Self::restore`] and the first monitor
    /// tick.
    pub async fn reconcile(
        &self,
        live_tickets: &HashSet<String>,
        contract_size: Decimal,
    ) -> ReconcileSummary {
        let now = Utc::now();
        let mut summary = ReconcileSummary::default();
        let mut to_archive = Vec::new();

        {
            let mut state = self.state.write().await;
            for trade in state.active.values_mut() {
                let direction = trade.direction;
                let stale: Vec<String> = trade
                    .open_legs()
                    .filter(|leg| !live_tickets.contains(&leg.ticket))
                    .map(|leg| leg.ticket.clone())
                    .collect();

                for ticket in stale {
                    let Some(leg) = trade.open_leg(&ticket) else {
                        continue;
                    };
                    let reason = leg.classify_close(direction);
                    let pnl = leg
                        .exit_reference(reason)
                        .map_or(Decimal::ZERO, |exit| {
                            leg.pnl_at(exit, direction, contract_size)
                        });

                    tracing::warn!(
                        trade_id = %trade.id,
                        ticket = %ticket,
                        reason = %reason,
                        "Ticket vanished while offline, marking leg closed"
                    );

                    if trade.close_leg(&ticket, reason, pnl, now).is_some() {
                        summary.legs_closed += 1;
                    }
                }

                if trade.is_fully_closed() {
                    to_archive.push(trade.id);
                }
            }
        }

        for trade_id in to_archive {
            self.archive(trade_id).await;
            summary.trades_archived += 1;
        }

        if summary.legs_closed > 0 {
            self.persist().await;
        }

        tracing::info!(
            legs_closed = summary.legs_closed,
            trades_archived = summary.trades_archived,
            "Startup reconciliation complete"
        );
        summary
    }

    /// Insert a newly opened trade.
    pub async fn insert(&self, trade: Trade) {
        {
            let mut state = self.state.write().await;
            state.active.insert(trade.id, trade);
        }
        self.persist().await;
    }

    /// Clone a trade by identity.
    pub async fn get(&self, trade_id: Uuid) -> Option<Trade> {
        self.state.read().await.active.get(&trade_id).cloned()
    }

    /// Clone the full active set.
    pub async fn active_trades(&self) -> Vec<Trade> {
        self.state.read().await.active.values().cloned().collect()
    }

    /// Number of active trades.
    pub async fn active_count(&self) -> usize {
        self.state.read().await.active.len()
    }

    /// Refresh a leg's observed price and unrealized P&L.
    ///
    /// Observation is not a durable mutation; nothing is persisted.
    pub async fn observe_leg(
        &self,
        trade_id: Uuid,
        ticket: &str,
        price: Decimal,
        unrealized_pnl: Decimal,
    ) {
        let mut state = self.state.write().await;
        if let Some(trade) = state.active.get_mut(&trade_id)
            && let Some(leg) = trade.open_leg_mut(ticket)
        {
            leg.observe(price, unrealized_pnl);
        }
    }

    /// Close a leg and accumulate its realized P&L.
    pub async fn close_leg(
        &self,
        trade_id: Uuid,
        ticket: &str,
        reason: CloseReason,
        pnl: Decimal,
    ) -> Option<LegCloseOutcome> {
        let outcome = {
            let mut state = self.state.write().await;
            let trade = state.active.get_mut(&trade_id)?;
            trade.close_leg(ticket, reason, pnl, Utc::now())
        };
        if outcome.is_some() {
            self.persist().await;
        }
        outcome
    }

    /// Apply a gateway-acknowledged stop-loss to a leg.
    pub async fn apply_leg_stop(&self, trade_id: Uuid, ticket: &str, stop_loss: Decimal) {
        {
            let mut state = self.state.write().await;
            if let Some(trade) = state.active.get_mut(&trade_id)
                && let Some(leg) = trade.open_leg_mut(ticket)
            {
                leg.apply_stop(stop_loss);
            }
        }
        self.persist().await;
    }

    /// Stash a desired stop-loss whose modify call failed, for retry on a
    /// later tick.
    pub async fn set_leg_pending_stop(&self, trade_id: Uuid, ticket: &str, desired: Decimal) {
        {
            let mut state = self.state.write().await;
            if let Some(trade) = state.active.get_mut(&trade_id)
                && let Some(leg) = trade.open_leg_mut(ticket)
            {
                leg.pending_stop_loss = Some(desired);
            }
        }
        self.persist().await;
    }

    /// Latch a trade's breakeven flag.
    pub async fn mark_breakeven_applied(&self, trade_id: Uuid) {
        {
            let mut state = self.state.write().await;
            if let Some(trade) = state.active.get_mut(&trade_id) {
                trade.mark_breakeven_applied();
            }
        }
        self.persist().await;
    }

    /// Move a fully closed trade from the active set to historical storage.
    pub async fn archive(&self, trade_id: Uuid) {
        let archived = {
            let mut state = self.state.write().await;
            let Some(trade) = state.active.remove(&trade_id) else {
                return;
            };
            state.archived_trades += 1;
            state.archived_realized += trade.realized_pnl;
            trade
        };

        if let Err(e) = self.store.archive_trade(&archived).await {
            tracing::warn!(trade_id = %trade_id, error = %e, "Failed to archive trade");
        }
        self.persist().await;
    }

    /// Aggregate statistics over active and archived trades.
    pub async fn stats(&self) -> StatsSnapshot {
        let state = self.state.read().await;
        let mut open_positions = 0usize;
        let mut unrealized = Decimal::ZERO;
        let mut realized = state.archived_realized;

        for trade in state.active.values() {
            realized += trade.realized_pnl;
            for leg in trade.open_legs() {
                open_positions += 1;
                if let Some(pnl) = leg.unrealized_pnl {
                    unrealized += pnl;
                }
            }
        }

        StatsSnapshot {
            active_trades: state.active.len(),
            open_positions,
            closed_trades: state.archived_trades,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
        }
    }

    /// Force a persistence write of the current active set.
    pub async fn persist_now(&self) {
        self.persist().await;
    }

    async fn persist(&self) {
        let trades: Vec<Trade> = {
            let state = self.state.read().await;
            state.active.values().cloned().collect()
        };
        if let Err(e) = self.store.save_trades(&trades).await {
            tracing::warn!(error = %e, "Persistence write failed, in-memory state remains authoritative");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, EntryPrice, PositionRecord, Signal, TradeStatus};
    use crate::infrastructure::persistence::memory::InMemoryTradeStore;
    use rust_decimal_macros::dec;

    fn repo() -> TradeRepository<InMemoryTradeStore> {
        TradeRepository::new(Arc::new(InMemoryTradeStore::new()))
    }

    fn trade_with_legs(tickets: &[&str]) -> Trade {
        let signal = Signal::new(
            "EURUSD",
            Direction::Long,
            EntryPrice::Level(dec!(1.0850)),
            dec!(1.0800),
            vec![dec!(1.0900), dec!(1.0950), dec!(1.1000)],
        );
        let mut trade = Trade::new(signal);
        for (idx, ticket) in tickets.iter().enumerate() {
            trade.add_leg(PositionRecord::new(
                *ticket,
                idx,
                dec!(1.0900) + Decimal::new(idx as i64 * 50, 4),
                dec!(1.0800),
                dec!(1.0),
                dec!(1.0850) + Decimal::new(idx as i64, 4),
            ));
        }
        trade
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let repo = repo();
        let trade = trade_with_legs(&["t1", "t2"]);
        let id = trade.id;

        repo.insert(trade).await;

        let loaded = repo.get(id).await.unwrap();
        assert_eq!(loaded.legs.len(), 2);
        assert_eq!(repo.active_count().await, 1);
    }

    #[tokio::test]
    async fn close_leg_persists_and_reports_outcome() {
        let store = Arc::new(InMemoryTradeStore::new());
        let repo = TradeRepository::new(Arc::clone(&store));
        let trade = trade_with_legs(&["t1", "t2"]);
        let id = trade.id;
        repo.insert(trade).await;

        let outcome = repo
            .close_leg(id, "t1", CloseReason::TargetHit, dec!(500))
            .await
            .unwrap();
        assert!(outcome.should_apply_breakeven);
        assert!(!outcome.fully_closed);

        let persisted = store.load_active_trades().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].status, TradeStatus::Partial);
        assert_eq!(persisted[0].realized_pnl, dec!(500));
    }

    #[tokio::test]
    async fn archive_moves_trade_out_of_active_set() {
        let store = Arc::new(InMemoryTradeStore::new());
        let repo = TradeRepository::new(Arc::clone(&store));
        let trade = trade_with_legs(&["t1"]);
        let id = trade.id;
        repo.insert(trade).await;

        repo.close_leg(id, "t1", CloseReason::TargetHit, dec!(500))
            .await
            .unwrap();
        repo.archive(id).await;

        assert_eq!(repo.active_count().await, 0);
        assert_eq!(store.archived_count(), 1);

        let stats = repo.stats().await;
        assert_eq!(stats.closed_trades, 1);
        assert_eq!(stats.realized_pnl, dec!(500));
    }

    #[tokio::test]
    async fn restore_rebuilds_active_set() {
        let store = Arc::new(InMemoryTradeStore::new());
        {
            let repo = TradeRepository::new(Arc::clone(&store));
            repo.insert(trade_with_legs(&["t1", "t2", "t3"])).await;
        }

        let repo = TradeRepository::new(Arc::clone(&store));
        let count = repo.restore().await.unwrap();
        assert_eq!(count, 1);

        let trades = repo.active_trades().await;
        assert_eq!(trades[0].legs.len(), 3);
    }

    #[tokio::test]
    async fn reconcile_closes_vanished_tickets() {
        let store = Arc::new(InMemoryTradeStore::new());
        let repo = TradeRepository::new(Arc::clone(&store));
        let mut trade = trade_with_legs(&["t1", "t2"]);
        // t1 was last seen at its take-profit.
        trade.legs[0].observe(dec!(1.0900), dec!(500));
        let id = trade.id;
        repo.insert(trade).await;

        let live: HashSet<String> = ["t2".to_string()].into_iter().collect();
        let summary = repo.reconcile(&live, dec!(100000)).await;

        assert_eq!(summary.legs_closed, 1);
        assert_eq!(summary.trades_archived, 0);

        let trade = repo.get(id).await.unwrap();
        assert_eq!(trade.status, TradeStatus::Partial);
        let closed = &trade.legs[0];
        assert!(closed.closed);
        assert_eq!(closed.close_reason, Some(CloseReason::TargetHit));
        assert_eq!(trade.realized_pnl, dec!(500.00000));
    }

    #[tokio::test]
    async fn reconcile_archives_fully_closed_trades() {
        let store = Arc::new(InMemoryTradeStore::new());
        let repo = TradeRepository::new(Arc::clone(&store));
        let trade = trade_with_legs(&["t1"]);
        repo.insert(trade).await;

        let summary = repo.reconcile(&HashSet::new(), dec!(100000)).await;

        assert_eq!(summary.legs_closed, 1);
        assert_eq!(summary.trades_archived, 1);
        assert_eq!(repo.active_count().await, 0);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_memory_authoritative() {
        let store = Arc::new(InMemoryTradeStore::new());
        let repo = TradeRepository::new(Arc::clone(&store));
        store.set_fail_writes(true);

        let trade = trade_with_legs(&["t1"]);
        let id = trade.id;
        repo.insert(trade).await;

        // The write failed but the trade is still live in memory.
        assert!(repo.get(id).await.is_some());
        assert!(store.load_active_trades().await.unwrap().is_empty());

        // Next successful write catches up.
        store.set_fail_writes(false);
        repo.persist_now().await;
        assert_eq!(store.load_active_trades().await.unwrap().len(), 1);
    }
}
