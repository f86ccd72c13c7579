use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::info;

/// Global metrics registry used across the bot.
pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::default);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[derive(Default)]
struct MetricsInner {
    book_events: AtomicU64,
    trades_executed: AtomicU64,
    trades_failed: AtomicU64,
    cycles_completed: AtomicU64,
    cycles_abandoned: AtomicU64,
    connects: AtomicU64,
    last_event_ts: AtomicU64,
}

/// Lightweight metrics handle backed by atomics so it can be cloned cheaply.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

impl Metrics {
    pub fn record_book_event(&self) {
        self.inner.book_events.fetch_add(1, Ordering::Relaxed);
        self.inner
            .last_event_ts
            .store(now_unix_secs(), Ordering::Relaxed);
    }

    pub fn record_trade_executed(&self, market_slug: &str, leg: u8) {
        self.inner.trades_executed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .last_event_ts
            .store(now_unix_secs(), Ordering::Relaxed);

        info!(
            target: "metrics",
            event = "trade_executed",
            market = %market_slug,
            leg,
            total_trades = self.inner.trades_executed.load(Ordering::Relaxed),
            "trade executed"
        );
    }

    pub fn record_trade_failed(&self, market_slug: &str, reason: &str) {
        self.inner.trades_failed.fetch_add(1, Ordering::Relaxed);

        info!(
            target: "metrics",
            event = "trade_failed",
            market = %market_slug,
            reason = %reason,
            total_failures = self.inner.trades_failed.load(Ordering::Relaxed),
            "trade failed"
        );
    }

    pub fn record_cycle_completed(&self) {
        self.inner.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_abandoned(&self) {
        self.inner.cycles_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.inner.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat(&self) {
        self.inner
            .last_event_ts
            .store(now_unix_secs(), Ordering::Relaxed);
    }

    pub fn is_healthy(&self, max_staleness: Duration) -> bool {
        let last = self.inner.last_event_ts.load(Ordering::Relaxed);
        if last == 0 {
            // No events yet: healthy immediately after startup.
            return true;
        }
        now_unix_secs().saturating_sub(last) <= max_staleness.as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            book_events: self.inner.book_events.load(Ordering::Relaxed),
            trades_executed: self.inner.trades_executed.load(Ordering::Relaxed),
            trades_failed: self.inner.trades_failed.load(Ordering::Relaxed),
            cycles_completed: self.inner.cycles_completed.load(Ordering::Relaxed),
            cycles_abandoned: self.inner.cycles_abandoned.load(Ordering::Relaxed),
            connects: self.inner.connects.load(Ordering::Relaxed),
            last_event_ts: self.inner.last_event_ts.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of current metrics used by dashboards and health checks.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub book_events: u64,
    pub trades_executed: u64,
    pub trades_failed: u64,
    pub cycles_completed: u64,
    pub cycles_abandoned: u64,
    pub connects: u64,
    pub last_event_ts: u64,
}

pub fn log_metrics_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        target: "metrics",
        event = "metrics_snapshot",
        book_events = snapshot.book_events,
        trades_executed = snapshot.trades_executed,
        trades_failed = snapshot.trades_failed,
        cycles_completed = snapshot.cycles_completed,
        cycles_abandoned = snapshot.cycles_abandoned,
        connects = snapshot.connects,
        last_event_ts = snapshot.last_event_ts,
        "metrics snapshot"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::default();
        metrics.record_book_event();
        metrics.record_book_event();
        metrics.record_trade_executed("btc-updown-15m-900", 1);
        metrics.record_cycle_completed();

        let snap = metrics.snapshot();
        assert_eq!(snap.book_events, 2);
        assert_eq!(snap.trades_executed, 1);
        assert_eq!(snap.cycles_completed, 1);
        assert_eq!(snap.trades_failed, 0);
    }

    #[test]
    fn health_before_first_event() {
        let metrics = Metrics::default();
        assert!(metrics.is_healthy(Duration::from_secs(1)));
        metrics.heartbeat();
        assert!(metrics.is_healthy(Duration::from_secs(60)));
    }
}
