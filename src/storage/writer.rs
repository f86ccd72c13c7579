//! Non-blocking persistence of finished trades and cycle records.
//!
//! The engine never waits on the database: it hands rows to a channel and a
//! dedicated worker task drains them. A store failure is logged and skipped;
//! the trade is still held in the engine's in-memory history.

use sqlx::query;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::engine::cycle::CycleRecord;
use crate::storage::models::{CycleRow, TradeRow};
use crate::storage::PgPool;
use crate::types::Trade;

/// Messages drained by the writer worker.
#[derive(Debug)]
pub enum StorageMessage {
    /// Register market metadata (sent once per rotation).
    MarketDiscovered { slug: String, title: String },
    Trade(TradeRow),
    CycleOpened(CycleRow),
    CycleClosed(CycleRow),
    /// Graceful shutdown: drain what is queued, then exit.
    Shutdown,
}

/// Durable-store operations used by the writer worker.
#[derive(Clone)]
pub struct TradeStore {
    pool: PgPool,
}

impl TradeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Upsert a market row keyed by slug so trade/cycle foreign keys resolve.
    pub async fn ensure_market_exists(&self, slug: &str, title: &str) -> anyhow::Result<()> {
        let title = if title.is_empty() { slug } else { title };
        query(
            "INSERT INTO markets (slug, question, status, created_at, updated_at) \
             VALUES ($1, $2, 'live', NOW(), NOW()) \
             ON CONFLICT (slug) DO NOTHING",
        )
        .bind(slug)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_trade(&self, row: &TradeRow) -> anyhow::Result<()> {
        self.ensure_market_exists(&row.market_slug, "").await?;

        query(
            "INSERT INTO trades \
             (id, market_slug, leg, side, token_id, shares, price, cost, fee, pnl, is_live, ts) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(&row.id)
        .bind(&row.market_slug)
        .bind(row.leg)
        .bind(&row.side)
        .bind(&row.token_id)
        .bind(row.shares)
        .bind(row.price)
        .bind(row.cost)
        .bind(row.fee)
        .bind(row.pnl)
        .bind(row.is_live)
        .bind(row.ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_cycle(&self, row: &CycleRow) -> anyhow::Result<()> {
        self.ensure_market_exists(&row.market_slug, "").await?;

        query(
            "INSERT INTO cycles \
             (id, market_slug, started_at, leg1_side, leg1_price, status) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&row.id)
        .bind(&row.market_slug)
        .bind(row.started_at)
        .bind(&row.leg1_side)
        .bind(row.leg1_price)
        .bind(&row.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_cycle(&self, row: &CycleRow) -> anyhow::Result<()> {
        query(
            "UPDATE cycles SET \
             status = $2, ended_at = $3, leg2_price = $4, locked_in_profit = $5 \
             WHERE id = $1",
        )
        .bind(&row.id)
        .bind(&row.status)
        .bind(row.ended_at)
        .bind(row.leg2_price)
        .bind(row.locked_in_profit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Cheap cloneable producer side of the writer queue. Enqueueing never
/// blocks; a closed queue drops the row silently (shutdown path).
#[derive(Clone, Debug)]
pub struct TradeWriterHandle {
    tx: mpsc::UnboundedSender<StorageMessage>,
}

impl TradeWriterHandle {
    pub fn enqueue_trade(&self, trade: &Trade) {
        let _ = self.tx.send(StorageMessage::Trade(TradeRow::from(trade)));
    }

    pub fn enqueue_cycle_opened(&self, cycle: &CycleRecord) {
        let _ = self
            .tx
            .send(StorageMessage::CycleOpened(CycleRow::from(cycle)));
    }

    pub fn enqueue_cycle_closed(&self, cycle: &CycleRecord) {
        let _ = self
            .tx
            .send(StorageMessage::CycleClosed(CycleRow::from(cycle)));
    }

    pub fn enqueue_market(&self, slug: &str, title: &str) {
        let _ = self.tx.send(StorageMessage::MarketDiscovered {
            slug: slug.to_string(),
            title: title.to_string(),
        });
    }
}

/// Owner of the writer worker task.
pub struct AsyncTradeWriter {
    handle: TradeWriterHandle,
    worker: tokio::task::JoinHandle<()>,
}

impl AsyncTradeWriter {
    /// Spawn the draining worker over the given store.
    pub fn spawn(store: TradeStore) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(writer_loop(rx, store));
        info!(target: "storage", "async trade writer started");
        Self {
            handle: TradeWriterHandle { tx },
            worker,
        }
    }

    pub fn handle(&self) -> TradeWriterHandle {
        self.handle.clone()
    }

    /// Request shutdown and wait for the worker to drain everything that was
    /// queued before this call.
    pub async fn stop(self) {
        let _ = self.handle.tx.send(StorageMessage::Shutdown);
        let _ = self.worker.await;
        info!(target: "storage", "async trade writer stopped");
    }
}

async fn writer_loop(mut rx: mpsc::UnboundedReceiver<StorageMessage>, store: TradeStore) {
    while let Some(msg) = rx.recv().await {
        match msg {
            StorageMessage::Shutdown => {
                // FIFO channel: everything enqueued before the shutdown
                // request is already ahead of it. Drain and exit.
                while let Ok(msg) = rx.try_recv() {
                    apply(&store, msg).await;
                }
                break;
            }
            other => apply(&store, other).await,
        }
    }
    info!(target: "storage", "writer drained");
}

async fn apply(store: &TradeStore, msg: StorageMessage) {
    match msg {
        StorageMessage::MarketDiscovered { slug, title } => {
            if let Err(err) = store.ensure_market_exists(&slug, &title).await {
                warn!(target: "storage", error = %err, market = %slug, "failed to upsert market");
            }
        }
        StorageMessage::Trade(row) => {
            if let Err(err) = store.insert_trade(&row).await {
                error!(
                    target: "storage",
                    error = %err,
                    trade_id = %row.id,
                    market = %row.market_slug,
                    "failed to persist trade; kept in memory only"
                );
            }
        }
        StorageMessage::CycleOpened(row) => {
            if let Err(err) = store.insert_cycle(&row).await {
                warn!(target: "storage", error = %err, cycle_id = %row.id, "failed to insert cycle");
            }
        }
        StorageMessage::CycleClosed(row) => {
            if let Err(err) = store.update_cycle(&row).await {
                warn!(target: "storage", error = %err, cycle_id = %row.id, "failed to update cycle");
            }
        }
        StorageMessage::Shutdown => {}
    }
}
