use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::book::OrderBookSnapshot;
use crate::engine::cycle::CycleRecord;
use crate::types::{EngineSettings, Trade, TradingMode};

/// Open shares held on each side. At most one side is ever non-zero.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct PositionsBySide {
    pub up: f64,
    pub down: f64,
}

/// Pull-based snapshot of everything the control surface needs to render.
#[derive(Clone, Debug, Serialize)]
pub struct EngineStatus {
    pub running: bool,
    pub mode: TradingMode,
    pub cash: f64,
    pub positions: PositionsBySide,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    /// Cash plus position value plus unrealized P&L.
    pub equity: f64,
    pub uptime_seconds: i64,
    pub market_slug: Option<String>,
    pub config: EngineSettings,
    pub up_book: OrderBookSnapshot,
    pub down_book: OrderBookSnapshot,
    /// Latest trades, capped at 100.
    pub recent_trades: Vec<Trade>,
    /// The in-flight cycle if one is open, otherwise the last finished one.
    pub current_cycle: Option<CycleRecord>,
    pub live_available: bool,
    /// Seconds left in the active market's window, if a market is set.
    pub time_left: Option<i64>,
    pub in_trading_phase: bool,
    pub last_update_ts: Option<DateTime<Utc>>,
}
