//! Operator dashboard: a periodic one-line trading snapshot in the logs and
//! a minimal HTTP health probe over the same state.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::info;

use crate::engine::TradingEngine;
use crate::monitoring::metrics::METRICS;

/// Spawn a background task that periodically logs the ledger, open position,
/// window phase, and feed counters as one structured record. Combined with
/// the JSON log output this is the terminal "dashboard" for an operator
/// tailing the bot.
pub fn spawn_dashboard_task(engine: Arc<TradingEngine>, period: Duration) {
    let mut ticker = interval(period);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            let status = engine.status().await;
            let metrics = METRICS.snapshot();
            info!(
                target: "dashboard",
                mode = status.mode.as_str(),
                cash = status.cash,
                realized_pnl = status.realized_pnl,
                equity = status.equity,
                position_up = status.positions.up,
                position_down = status.positions.down,
                market = status.market_slug.as_deref().unwrap_or("-"),
                time_left = status.time_left.unwrap_or_default(),
                phase = if status.in_trading_phase { "trading" } else { "watching" },
                book_events = metrics.book_events,
                trades = metrics.trades_executed,
                cycles_completed = metrics.cycles_completed,
                cycles_abandoned = metrics.cycles_abandoned,
                "trading dashboard"
            );
        }
    });
}

/// Body of the health probe response.
#[derive(Debug, Serialize)]
struct HealthReport {
    healthy: bool,
    running: bool,
    mode: &'static str,
    feed_fresh: bool,
    market: Option<String>,
    cash: f64,
    realized_pnl: f64,
}

impl HealthReport {
    fn gather(status: &crate::engine::status::EngineStatus, max_staleness: Duration) -> Self {
        let feed_fresh = METRICS.is_healthy(max_staleness);
        Self {
            healthy: status.running && feed_fresh,
            running: status.running,
            mode: status.mode.as_str(),
            feed_fresh,
            market: status.market_slug.clone(),
            cash: status.cash,
            realized_pnl: status.realized_pnl,
        }
    }
}

/// Minimal HTTP health listener. Always answers 200 with a JSON
/// [`HealthReport`]; `healthy` is true while the engine runs and the book
/// feed has produced an event within `max_staleness`.
pub async fn serve_health(
    addr: &str,
    engine: Arc<TradingEngine>,
    max_staleness: Duration,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;

    loop {
        let (mut socket, _) = listener.accept().await?;
        let mut buf = [0u8; 1024];

        // Best-effort read of the incoming request; the path is not inspected.
        let _ = socket.readable().await;
        let _ = socket.try_read(&mut buf);

        let status = engine.status().await;
        let report = HealthReport::gather(&status, max_staleness);
        let body = serde_json::to_string(&report).unwrap_or_else(|_| "{}".to_string());
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/json\r\n\r\n{}",
            body.len(),
            body
        );

        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await?;
    }
}
