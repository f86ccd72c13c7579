//! Process wiring and the market-rotation loop.
//!
//! The supervisor owns the clock: it maps wall time to 15-minute windows,
//! resolves each window's market from the Gamma API, installs it on the
//! engine, and keeps the price stream subscribed to the right token pair.
//! Shortly before a boundary it pre-fetches the next market so the switch
//! itself is just a `set_market` call.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::client::gamma::{fetch_market_by_slug, ResolvedMarket};
use crate::client::messages::BookEvent;
use crate::client::stream::PriceStream;
use crate::engine::TradingEngine;
use crate::execution::LiveExecutor;
use crate::monitoring::dashboard::{serve_health, spawn_dashboard_task};
use crate::monitoring::events::{log_events, EventBus};
use crate::monitoring::metrics::METRICS;
use crate::storage::{create_pg_pool, AsyncTradeWriter, TradeStore, TradeWriterHandle};
use crate::types::{AppConfig, TradingMode};
use crate::utils::time::{market_slug, time_left_in_window, window_start, WINDOW_SECS};

/// Seconds before a window boundary at which the next market is pre-fetched
/// and its tokens pre-subscribed.
const PREFETCH_LEAD_SECS: i64 = 20;
/// Milliseconds before a boundary at which the loop switches to tight polling.
const TIGHT_POLL_WINDOW_MS: i64 = 100;

/// Entrypoint used by `main.rs` to start the trading bot.
pub async fn run_bot(cfg: AppConfig) -> anyhow::Result<()> {
    info!(target: "bot", "run_bot starting");

    // Short timeout so a dead Gamma endpoint is noticed quickly; the
    // rotation loop retries on the next pass anyway.
    let http = reqwest::Client::builder()
        .user_agent("polymarket-cycle-bot/0.1")
        .timeout(Duration::from_secs(5))
        .build()?;

    info!(target: "bot", "connecting to Postgres");
    let pool = create_pg_pool(&cfg.postgres).await?;
    info!(target: "bot", "Postgres connected");
    let writer = AsyncTradeWriter::spawn(TradeStore::new(pool));

    let events = EventBus::default();
    tokio::spawn(log_events(events.subscribe()));

    let live = LiveExecutor::new(cfg.api.executor_path.clone());
    let engine = Arc::new(TradingEngine::new(
        cfg.engine.clone(),
        Some(live),
        Some(writer.handle()),
        events,
    ));
    engine.start().await;

    spawn_dashboard_task(Arc::clone(&engine), Duration::from_secs(10));
    if let Some(addr) = cfg.monitoring.health_addr.clone() {
        let health_engine = Arc::clone(&engine);
        let max_staleness = Duration::from_secs(cfg.engine.window_min);
        tokio::spawn(async move {
            if let Err(err) = serve_health(&addr, health_engine, max_staleness).await {
                warn!(target: "bot", error = %err, "health endpoint failed");
            }
        });
    }

    if cfg.execution.mode == TradingMode::Live {
        match engine.set_mode(TradingMode::Live).await {
            Ok(()) => info!(target: "bot", "live trading enabled from config"),
            Err(err) => warn!(
                target: "bot",
                error = %err,
                "could not enable live mode; staying simulated"
            ),
        }
    }

    let (stream, event_rx) = PriceStream::spawn(cfg.api.ws_url.clone());
    spawn_book_feeder(event_rx, Arc::clone(&engine));

    let rotation = rotation_loop(&cfg, &http, &engine, &stream, writer.handle());
    tokio::select! {
        res = rotation => res?,
        _ = tokio::signal::ctrl_c() => {
            info!(target: "bot", "shutdown signal received");
        }
    }

    engine.stop().await;
    stream.stop().await;
    writer.stop().await;
    info!(target: "bot", "clean exit");
    Ok(())
}

/// Forward normalized book events into the engine one at a time, preserving
/// the order the adapter read them off the socket.
fn spawn_book_feeder(mut rx: mpsc::UnboundedReceiver<BookEvent>, engine: Arc<TradingEngine>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            engine.apply_book(&event.token_id, event.snapshot).await;
        }
    });
}

async fn resolve_market(
    http: &reqwest::Client,
    cfg: &AppConfig,
    window_ts: i64,
) -> Option<ResolvedMarket> {
    let slug = market_slug(&cfg.market.coin, window_ts);
    match fetch_market_by_slug(http, &cfg.api.gamma_url, &slug).await {
        Ok(Some(market)) => {
            info!(
                target: "bot",
                slug = %market.slug,
                question = %market.question,
                "market resolved"
            );
            Some(market)
        }
        Ok(None) => {
            warn!(target: "bot", slug = %slug, "market not listed yet");
            None
        }
        Err(err) => {
            warn!(target: "bot", slug = %slug, error = %err, "market resolution failed");
            None
        }
    }
}

async fn rotation_loop(
    cfg: &AppConfig,
    http: &reqwest::Client,
    engine: &Arc<TradingEngine>,
    stream: &PriceStream,
    writer: TradeWriterHandle,
) -> anyhow::Result<()> {
    let mut current_window: i64 = 0;
    let mut prefetched: Option<ResolvedMarket> = None;
    let mut last_price_log = Utc::now();
    let mut last_reconnect_request = Utc::now();

    loop {
        let now = Utc::now();
        let window_ts = window_start(now);

        if window_ts != current_window {
            current_window = window_ts;

            // Use the pre-fetched market when it matches this window.
            let expected_slug = market_slug(&cfg.market.coin, window_ts);
            let market = match prefetched.take() {
                Some(m) if m.slug == expected_slug => Some(m),
                _ => resolve_market(http, cfg, window_ts).await,
            };

            if let Some(market) = market {
                engine
                    .set_market(&market.slug, &market.up_token_id, &market.down_token_id)
                    .await;
                writer.enqueue_market(&market.slug, &market.question);

                stream.clear_subscriptions();
                stream.subscribe(market.up_token_id.clone());
                stream.subscribe(market.down_token_id.clone());
            }
        }

        // Pre-fetch the next window's market shortly before the boundary so
        // the rotation itself needs no HTTP round trip.
        let time_left = time_left_in_window(now);
        if time_left <= PREFETCH_LEAD_SECS && prefetched.is_none() {
            let next_window = window_ts + WINDOW_SECS;
            if let Some(market) = resolve_market(http, cfg, next_window).await {
                stream.subscribe(market.up_token_id.clone());
                stream.subscribe(market.down_token_id.clone());
                prefetched = Some(market);
            }
        }

        // Reconnect if the feed has gone quiet on the active market. The
        // request itself is rate-limited so a dead venue does not cause a
        // reconnect storm.
        let status = engine.status().await;
        if let Some(last_update) = status.last_update_ts {
            let stale_secs = (now - last_update).num_seconds();
            let since_request = (now - last_reconnect_request).num_seconds();
            if stale_secs > cfg.engine.window_min as i64
                && since_request > cfg.engine.window_min as i64
            {
                warn!(target: "bot", stale_secs, "book feed stale; reconnecting");
                stream.reconnect();
                last_reconnect_request = now;
            }
        }

        // Once per second, log the best-of-book picture and window phase.
        if (now - last_price_log).num_seconds() >= 1 {
            last_price_log = now;
            let up_ask = status.up_book.best_ask();
            let down_ask = status.down_book.best_ask();
            if !status.up_book.is_empty() || !status.down_book.is_empty() {
                info!(
                    target: "bot",
                    up_ask,
                    down_ask,
                    time_left = status.time_left.unwrap_or_default(),
                    phase = if status.in_trading_phase { "trading" } else { "watching" },
                    ws_connected = stream.is_connected(),
                    "market tick"
                );
            }
        }

        METRICS.heartbeat();

        // Adaptive cadence: coarse most of the time, tight right before the
        // window boundary so the rotation lands on it.
        let ms_left = time_left_in_window(Utc::now()) * 1_000
            - i64::from(Utc::now().timestamp_subsec_millis());
        let sleep_ms = if ms_left <= TIGHT_POLL_WINDOW_MS { 1 } else { 50 };
        tokio::time::sleep(Duration::from_millis(sleep_ms as u64)).await;
    }
}
