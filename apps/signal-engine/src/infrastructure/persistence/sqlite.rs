//! SQLite-backed trade store.
//!
//! Durable, queryable storage for trades, their position records and
//! broadcaster snapshots. Each trade row carries searchable columns plus the
//! full JSON payload, so the in-memory state reconstructs exactly after a
//! restart; position record rows exist for ad-hoc querying.
//!
//! Decimals are stored as TEXT: the SQLite driver has no native decimal
//! codec and floats would lose precision.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::application::ports::trade_store::{StoreError, TradeStore};
use crate::application::snapshot::SyncSnapshot;
use crate::domain::Trade;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// SQLite implementation of [`TradeStore`].
pub struct SqliteTradeStore {
    pool: SqlitePool,
}

impl SqliteTradeStore {
    /// Open (creating if missing) a database file and run migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::with_options(options).await
    }

    /// Open an in-memory database. For tests and development.
    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::with_options(SqliteConnectOptions::new().filename(":memory:")).await
    }

    async fn with_options(options: SqliteConnectOptions) -> Result<Self, StoreError> {
        // A single connection keeps writers serialized and makes the
        // in-memory variant share one database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS trades (
                trade_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                status TEXT NOT NULL,
                realized_pnl TEXT NOT NULL,
                created_at TEXT NOT NULL,
                closed_at TEXT,
                payload TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS position_records (
                ticket TEXT PRIMARY KEY,
                trade_id TEXT NOT NULL,
                tp_index INTEGER NOT NULL,
                take_profit TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                lot_size TEXT NOT NULL,
                entry_fill_price TEXT NOT NULL,
                closed INTEGER NOT NULL,
                close_reason TEXT,
                closed_at TEXT
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sync_snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                captured_at TEXT NOT NULL,
                balance TEXT NOT NULL,
                equity TEXT NOT NULL,
                margin TEXT NOT NULL,
                open_positions INTEGER NOT NULL,
                payload TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }

    async fn upsert_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        let payload = serde_json::to_string(trade)?;
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO trades (
                trade_id, symbol, direction, status, realized_pnl,
                created_at, closed_at, payload, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(trade_id) DO UPDATE SET
                symbol = excluded.symbol,
                direction = excluded.direction,
                status = excluded.status,
                realized_pnl = excluded.realized_pnl,
                created_at = excluded.created_at,
                closed_at = excluded.closed_at,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            ",
        )
        .bind(trade.id.to_string())
        .bind(&trade.symbol)
        .bind(trade.direction.to_string())
        .bind(trade.status.as_str())
        .bind(trade.realized_pnl.to_string())
        .bind(trade.created_at.to_rfc3339())
        .bind(trade.closed_at.map(|at| at.to_rfc3339()))
        .bind(payload)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        for leg in &trade.legs {
            sqlx::query(
                r"
                INSERT INTO position_records (
                    ticket, trade_id, tp_index, take_profit, stop_loss,
                    lot_size, entry_fill_price, closed, close_reason, closed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT(ticket) DO UPDATE SET
                    stop_loss = excluded.stop_loss,
                    closed = excluded.closed,
                    close_reason = excluded.close_reason,
                    closed_at = excluded.closed_at
                ",
            )
            .bind(&leg.ticket)
            .bind(trade.id.to_string())
            .bind(leg.tp_index as i64)
            .bind(leg.take_profit.to_string())
            .bind(leg.stop_loss.to_string())
            .bind(leg.lot_size.to_string())
            .bind(leg.entry_fill_price.to_string())
            .bind(leg.closed)
            .bind(leg.close_reason.map(|reason| reason.as_str()))
            .bind(leg.closed_at.map(|at| at.to_rfc3339()))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl TradeStore for SqliteTradeStore {
    async fn save_trades(&self, trades: &[Trade]) -> Result<(), StoreError> {
        for trade in trades {
            self.upsert_trade(trade).await?;
        }
        tracing::debug!(count = trades.len(), "Active trade set persisted");
        Ok(())
    }

    async fn archive_trade(&self, trade: &Trade) -> Result<(), StoreError> {
        // Terminal trades stay queryable; the row is simply upserted with
        // its closed status and excluded from active loads.
        self.upsert_trade(trade).await?;
        tracing::debug!(trade_id = %trade.id, "Trade archived");
        Ok(())
    }

    async fn load_active_trades(&self) -> Result<Vec<Trade>, StoreError> {
        let rows = sqlx::query("SELECT payload FROM trades WHERE status != 'closed'")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut trades = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row
                .try_get("payload")
                .map_err(|e| StoreError::Query(e.to_string()))?;
            trades.push(serde_json::from_str(&payload)?);
        }
        Ok(trades)
    }

    async fn record_snapshot(&self, snapshot: &SyncSnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;

        sqlx::query(
            r"
            INSERT INTO sync_snapshots (
                captured_at, balance, equity, margin, open_positions, payload
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
        )
        .bind(snapshot.captured_at.to_rfc3339())
        .bind(snapshot.account.balance.to_string())
        .bind(snapshot.account.equity.to_string())
        .bind(snapshot.account.margin.to_string())
        .bind(snapshot.positions.len() as i64)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(())
    }
}
