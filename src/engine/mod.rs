//! The trading engine: cycle state machine, cash and P&L ledger, market
//! rotation handling, and the command/status ports.
//!
//! All engine state lives behind a single mutex. Every public operation
//! acquires it for the whole call, including the execution-port invocation,
//! so an entry or hedge decision and its accounting update are atomic with
//! respect to every other caller. Throughput is not a concern at the event
//! rates a single 15-minute market produces.

pub mod book;
pub mod cycle;
pub mod market;
pub mod status;

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::book::OrderBookSnapshot;
use crate::engine::cycle::{CycleRecord, Position};
use crate::engine::market::{MarketStore, SetMarketOutcome};
use crate::engine::status::{EngineStatus, PositionsBySide};
use crate::execution::{
    ExecutionError, ExecutionResult, LiveExecutor, PlaceRequest, SimulatedExecutor,
};
use crate::monitoring::events::{EngineEvent, EventBus};
use crate::monitoring::metrics::METRICS;
use crate::storage::TradeWriterHandle;
use crate::types::{ConfigError, ConfigUpdate, EngineSettings, Side, Trade, TradingMode};
use crate::utils::math::cycle_profit;
use crate::utils::time::{in_trading_phase, slug_window_start, time_left_from_start, window_start};

/// Simulated-account starting balance.
const INITIAL_CASH: f64 = 1000.0;
/// Seconds to wait after a completed cycle before a new entry may fire.
const COOLDOWN_SECS: i64 = 5;
/// Cap on the trade history returned by the status port.
const RECENT_TRADES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("live trading unavailable: credentials not configured")]
    LiveUnavailable,

    #[error("balance refresh failed: {0}")]
    BalanceRefresh(String),

    #[error("reset is not permitted in live mode")]
    ResetInLive,

    #[error("no active market")]
    NoActiveMarket,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// Push port: every externally triggered engine operation.
#[derive(Clone, Debug)]
pub enum EngineCommand {
    Start,
    Stop,
    Reset,
    SetMode(TradingMode),
    SetConfig {
        field: String,
        value: serde_json::Value,
    },
    SetMarket {
        slug: String,
        up_token: String,
        down_token: String,
    },
    PlaceExternalTrade {
        side: Side,
        shares: f64,
        price: f64,
    },
}

struct EngineInner {
    config: EngineSettings,
    mode: TradingMode,
    cash: f64,
    realized_pnl: f64,
    start_time: DateTime<Utc>,
    markets: MarketStore,
    position: Option<Position>,
    active_cycle: Option<CycleRecord>,
    last_completed_cycle: Option<CycleRecord>,
    last_cycle_complete_time: Option<DateTime<Utc>>,
    history: Vec<Trade>,
    simulated: SimulatedExecutor,
    live: Option<LiveExecutor>,
    writer: Option<TradeWriterHandle>,
    events: EventBus,
}

pub struct TradingEngine {
    running: AtomicBool,
    inner: Mutex<EngineInner>,
}

impl TradingEngine {
    pub fn new(
        config: EngineSettings,
        live: Option<LiveExecutor>,
        writer: Option<TradeWriterHandle>,
        events: EventBus,
    ) -> Self {
        Self {
            running: AtomicBool::new(false),
            inner: Mutex::new(EngineInner {
                config,
                mode: TradingMode::Simulated,
                cash: INITIAL_CASH,
                realized_pnl: 0.0,
                start_time: Utc::now(),
                markets: MarketStore::new(),
                position: None,
                active_cycle: None,
                last_completed_cycle: None,
                last_cycle_complete_time: None,
                history: Vec::new(),
                simulated: SimulatedExecutor::new(),
                live,
                writer,
                events,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.start_time = Utc::now();
        inner.events.publish(EngineEvent::Started);
        info!(target: "engine", "trading engine started");
    }

    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.lock().await;
        inner.events.publish(EngineEvent::Stopped);
        info!(target: "engine", "trading engine stopped");
    }

    /// Install the active market. A new slug clears the store and abandons
    /// any open cycle; the same slug only refreshes the token IDs.
    pub async fn set_market(&self, slug: &str, up_token: &str, down_token: &str) {
        let mut inner = self.inner.lock().await;
        let outcome = inner.markets.set_market(slug, up_token, down_token);

        if let SetMarketOutcome::Rotated { previous } = outcome {
            inner.abandon_open_cycle();
            inner.events.publish(EngineEvent::MarketRotated {
                slug: slug.to_string(),
                previous,
            });
            info!(target: "engine", market = %slug, "active market set");
        }
    }

    /// Ingest one normalized book snapshot. Sole entry point of the price
    /// stream; events must arrive here in receive order.
    pub async fn apply_book(&self, token_id: &str, snapshot: OrderBookSnapshot) {
        if !self.is_running() {
            return;
        }

        let now = snapshot.ts;
        let mut inner = self.inner.lock().await;

        let Some((slug, _side)) = inner.markets.apply_book(token_id, snapshot) else {
            // Late event for a rotated-out market.
            return;
        };
        if inner.markets.active_slug() != Some(slug.as_str()) {
            return;
        }

        inner.evaluate(now).await;
    }

    pub async fn status(&self) -> EngineStatus {
        let inner = self.inner.lock().await;
        let now = Utc::now();

        let mut positions = PositionsBySide::default();
        let mut position_value = 0.0;
        let mut unrealized_pnl = 0.0;

        let active = inner.markets.active();
        if let Some(pos) = &inner.position {
            match pos.side {
                Side::Up => positions.up = pos.shares,
                Side::Down => positions.down = pos.shares,
            }
            position_value = pos.shares * pos.avg_cost;
            if let Some(market) = active {
                let bid = market.book(pos.side).best_bid();
                unrealized_pnl = (bid - pos.avg_cost) * pos.shares;
            }
        }

        let (time_left, in_phase) = match active.and_then(|m| slug_window_start(&m.slug)) {
            Some(start) => {
                let left = time_left_from_start(start, now);
                (Some(left), in_trading_phase(left, inner.config.dump_window_sec))
            }
            None => (None, false),
        };

        let recent_start = inner.history.len().saturating_sub(RECENT_TRADES);

        EngineStatus {
            running: self.is_running(),
            mode: inner.mode,
            cash: inner.cash,
            positions,
            realized_pnl: inner.realized_pnl,
            unrealized_pnl,
            equity: inner.cash + position_value + unrealized_pnl,
            uptime_seconds: (now - inner.start_time).num_seconds(),
            market_slug: inner.markets.active_slug().map(str::to_string),
            config: inner.config.clone(),
            up_book: active.map(|m| m.up_book.clone()).unwrap_or_default(),
            down_book: active.map(|m| m.down_book.clone()).unwrap_or_default(),
            recent_trades: inner.history[recent_start..].to_vec(),
            current_cycle: inner
                .active_cycle
                .clone()
                .or_else(|| inner.last_completed_cycle.clone()),
            live_available: inner.live_available(),
            time_left,
            in_trading_phase: in_phase,
            last_update_ts: active.map(|m| m.last_update),
        }
    }

    pub async fn handle_command(&self, cmd: EngineCommand) -> Result<(), EngineError> {
        match cmd {
            EngineCommand::Start => {
                self.start().await;
                Ok(())
            }
            EngineCommand::Stop => {
                self.stop().await;
                Ok(())
            }
            EngineCommand::Reset => self.reset().await,
            EngineCommand::SetMode(mode) => self.set_mode(mode).await,
            EngineCommand::SetConfig { field, value } => self.update_config(&field, &value).await,
            EngineCommand::SetMarket {
                slug,
                up_token,
                down_token,
            } => {
                self.set_market(&slug, &up_token, &down_token).await;
                Ok(())
            }
            EngineCommand::PlaceExternalTrade {
                side,
                shares,
                price,
            } => self.place_external_trade(side, shares, price).await,
        }
    }

    /// Restore the simulated account to its initial state. Rejected in live
    /// mode: real balances cannot be wished back.
    pub async fn reset(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.mode == TradingMode::Live {
            return Err(EngineError::ResetInLive);
        }

        inner.cash = INITIAL_CASH;
        inner.realized_pnl = 0.0;
        inner.position = None;
        inner.active_cycle = None;
        inner.last_completed_cycle = None;
        inner.last_cycle_complete_time = None;
        inner.history.clear();
        inner.mode = TradingMode::Simulated;
        inner.events.publish(EngineEvent::Reset);
        info!(target: "engine", "simulated account reset");
        Ok(())
    }

    /// Switch execution mode. Entering live mode requires configured
    /// credentials and a successful venue balance probe, whose result
    /// replaces the engine's cash. An open position survives the switch.
    pub async fn set_mode(&self, mode: TradingMode) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;

        if mode == TradingMode::Live {
            let Some(live) = inner.live.as_ref() else {
                return Err(EngineError::LiveUnavailable);
            };
            if !live.is_available() {
                return Err(EngineError::LiveUnavailable);
            }
            let balance = live
                .balance()
                .await
                .map_err(|e| EngineError::BalanceRefresh(e.to_string()))?;
            inner.cash = balance;
            info!(target: "engine", balance, "live balance loaded");
        }

        inner.mode = mode;
        inner.events.publish(EngineEvent::ModeChanged { mode });
        info!(target: "engine", mode = mode.as_str(), "trading mode set");
        Ok(())
    }

    /// Mutate one config field. Takes effect from the next evaluation;
    /// in-flight decisions keep the values they read at entry.
    pub async fn update_config(
        &self,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), EngineError> {
        let update = ConfigUpdate::parse(field, value)?;
        let mut inner = self.inner.lock().await;
        inner.config.apply(update)?;
        inner.events.publish(EngineEvent::ConfigUpdated {
            field: field.to_string(),
        });
        info!(target: "engine", field = %field, "config updated");
        Ok(())
    }

    /// Manually buy one side of the active market through the execution
    /// port. Booked into cash and history but outside the cycle state
    /// machine: the automated position is not touched.
    pub async fn place_external_trade(
        &self,
        side: Side,
        shares: f64,
        price: f64,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;

        let (slug, token_id) = {
            let market = inner.markets.active().ok_or(EngineError::NoActiveMarket)?;
            (market.slug.clone(), market.token_id(side).to_string())
        };
        let leg = if inner.position.is_some() { 2 } else { 1 };

        let req = PlaceRequest {
            market_slug: slug.clone(),
            leg,
            side,
            token_id,
            shares,
            price,
            ts: Utc::now(),
        };
        let trade = inner.place(&req).await?;

        inner.cash -= trade.cost;
        if let Some(writer) = &inner.writer {
            writer.enqueue_trade(&trade);
        }
        METRICS.record_trade_executed(&slug, trade.leg);
        inner.events.publish(EngineEvent::ExternalTrade {
            market_slug: slug,
            side,
            shares: trade.shares,
            price: trade.price,
        });
        inner.history.push(trade);
        Ok(())
    }
}

impl EngineInner {
    fn live_available(&self) -> bool {
        self.live.as_ref().map(LiveExecutor::is_available).unwrap_or(false)
    }

    async fn place(&mut self, req: &PlaceRequest) -> ExecutionResult<Trade> {
        match self.mode {
            TradingMode::Simulated => Ok(self.simulated.place(req)),
            TradingMode::Live => match &self.live {
                Some(live) if live.is_available() => live.place(req).await,
                _ => Err(ExecutionError::Unavailable(
                    "live executor not configured".to_string(),
                )),
            },
        }
    }

    /// Run the cycle state machine against the active market. `now` is the
    /// timestamp of the snapshot that triggered this evaluation.
    async fn evaluate(&mut self, now: DateTime<Utc>) {
        let Some(market) = self.markets.active() else {
            return;
        };

        let slug = market.slug.clone();
        let Some(slug_start) = slug_window_start(&slug) else {
            return;
        };
        // Slug window disagreeing with the wall clock means stale data and
        // an imminent rotation: refuse to trade, no error.
        if slug_start != window_start(now) {
            return;
        }
        let time_left = time_left_from_start(slug_start, now);
        if !in_trading_phase(time_left, self.config.dump_window_sec) {
            return;
        }

        let up_ask = market.book(Side::Up).best_ask();
        let down_ask = market.book(Side::Down).best_ask();
        let up_token = market.up_token_id.clone();
        let down_token = market.down_token_id.clone();
        let ask_for = |side: Side| match side {
            Side::Up => up_ask,
            Side::Down => down_ask,
        };
        let token_for = |side: Side| match side {
            Side::Up => up_token.clone(),
            Side::Down => down_token.clone(),
        };

        enum Action {
            Enter(Side),
            Hedge(Side),
        }

        let action = match &self.position {
            None => {
                if let Some(completed_at) = self.last_cycle_complete_time {
                    if (now - completed_at).num_seconds() < COOLDOWN_SECS {
                        return;
                    }
                }

                // UP is checked first; first match wins.
                if up_ask < self.config.entry_threshold {
                    Some(Action::Enter(Side::Up))
                } else if down_ask < self.config.entry_threshold {
                    Some(Action::Enter(Side::Down))
                } else {
                    None
                }
            }
            Some(position) if position.market_slug == slug => {
                let opposite = position.side.opposite();
                if position.avg_cost + ask_for(opposite) <= self.config.sum_target {
                    Some(Action::Hedge(opposite))
                } else {
                    None
                }
            }
            Some(_) => None,
        };

        match action {
            Some(Action::Enter(side)) => {
                self.enter(side, ask_for(side), token_for(side), slug, now).await;
            }
            Some(Action::Hedge(side)) => {
                self.hedge(side, ask_for(side), token_for(side), slug, now).await;
            }
            None => {}
        }
    }

    async fn enter(
        &mut self,
        side: Side,
        price: f64,
        token_id: String,
        slug: String,
        now: DateTime<Utc>,
    ) {
        let req = PlaceRequest {
            market_slug: slug.clone(),
            leg: 1,
            side,
            token_id,
            shares: self.config.shares,
            price,
            ts: now,
        };

        match self.place(&req).await {
            Ok(trade) => {
                self.cash -= trade.cost;

                let cycle = CycleRecord::opened(Uuid::new_v4().to_string(), slug.clone(), &trade);
                if let Some(writer) = &self.writer {
                    writer.enqueue_trade(&trade);
                    writer.enqueue_cycle_opened(&cycle);
                }
                METRICS.record_trade_executed(&slug, 1);
                self.events.publish(EngineEvent::Leg1Entry {
                    market_slug: slug.clone(),
                    side,
                    shares: trade.shares,
                    price: trade.price,
                    cost: trade.cost,
                });
                info!(
                    target: "engine",
                    market = %slug,
                    side = %side,
                    shares = trade.shares,
                    price = trade.price,
                    cost = trade.cost,
                    cash = self.cash,
                    "leg 1 entry"
                );

                self.history.push(trade.clone());
                self.active_cycle = Some(cycle);
                self.position = Some(Position::from_entry(trade));
            }
            Err(err) => {
                METRICS.record_trade_failed(&slug, &err.to_string());
                self.events.publish(EngineEvent::ExecutionFailed {
                    market_slug: slug,
                    side,
                    reason: err.to_string(),
                });
            }
        }
    }

    async fn hedge(
        &mut self,
        side: Side,
        price: f64,
        token_id: String,
        slug: String,
        now: DateTime<Utc>,
    ) {
        let Some(position) = self.position.clone() else {
            return;
        };

        let req = PlaceRequest {
            market_slug: slug.clone(),
            leg: 2,
            side,
            token_id,
            shares: position.shares,
            price,
            ts: now,
        };

        match self.place(&req).await {
            Ok(mut trade) => {
                let profit = cycle_profit(position.avg_cost, trade.price, position.shares);
                trade.pnl = profit;

                self.realized_pnl += profit;
                self.cash -= trade.cost;
                // Synthetic settlement: the winning side pays $1 per share,
                // realized immediately at hedge time.
                self.cash += position.shares;

                let cycle = self
                    .active_cycle
                    .take()
                    .unwrap_or_else(|| {
                        CycleRecord::opened(
                            Uuid::new_v4().to_string(),
                            slug.clone(),
                            &position.trades[0],
                        )
                    })
                    .complete(&trade, profit);
                if let Some(writer) = &self.writer {
                    writer.enqueue_trade(&trade);
                    writer.enqueue_cycle_closed(&cycle);
                }
                METRICS.record_trade_executed(&slug, 2);
                METRICS.record_cycle_completed();
                self.events.publish(EngineEvent::Leg2Hedge {
                    market_slug: slug.clone(),
                    side,
                    price: trade.price,
                    sum: position.avg_cost + trade.price,
                    profit,
                });
                info!(
                    target: "engine",
                    market = %slug,
                    side = %side,
                    price = trade.price,
                    sum = position.avg_cost + trade.price,
                    profit,
                    realized_pnl = self.realized_pnl,
                    cash = self.cash,
                    "leg 2 hedge, cycle complete"
                );

                self.history.push(trade);
                self.last_completed_cycle = Some(cycle);
                self.last_cycle_complete_time = Some(now);
                self.position = None;
            }
            Err(err) => {
                METRICS.record_trade_failed(&slug, &err.to_string());
                self.events.publish(EngineEvent::ExecutionFailed {
                    market_slug: slug,
                    side,
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Book an unhedged leg-1 position as a full loss of its paid premium.
    /// Called when a rotation replaces the market mid-cycle.
    fn abandon_open_cycle(&mut self) {
        let Some(position) = self.position.take() else {
            return;
        };

        self.realized_pnl -= position.total_cost;

        let cycle = self
            .active_cycle
            .take()
            .unwrap_or_else(|| {
                CycleRecord::opened(
                    Uuid::new_v4().to_string(),
                    position.market_slug.clone(),
                    &position.trades[0],
                )
            })
            .abandon(Utc::now());
        if let Some(writer) = &self.writer {
            writer.enqueue_cycle_closed(&cycle);
        }
        METRICS.record_cycle_abandoned();
        self.events.publish(EngineEvent::CycleAbandoned {
            market_slug: position.market_slug.clone(),
            side: position.side,
            lost_cost: position.total_cost,
        });
        warn!(
            target: "engine",
            market = %position.market_slug,
            side = %position.side,
            lost_cost = position.total_cost,
            realized_pnl = self.realized_pnl,
            "cycle abandoned on market rotation"
        );

        self.last_completed_cycle = Some(cycle);
    }
}
