use serde::Serialize;
use tracing::info;

use crate::types::AppConfig;

#[derive(Serialize)]
struct StartupLog<'a> {
    event: &'a str,
    execution_mode: &'a str,
    coin: &'a str,
    entry_threshold: f64,
    sum_target: f64,
    dump_window_sec: i64,
}

pub fn log_startup(cfg: &AppConfig) {
    let payload = StartupLog {
        event: "startup",
        execution_mode: cfg.execution.mode.as_str(),
        coin: &cfg.market.coin,
        entry_threshold: cfg.engine.entry_threshold,
        sum_target: cfg.engine.sum_target,
        dump_window_sec: cfg.engine.dump_window_sec,
    };
    info!(target: "bot", startup = serde_json::to_string(&payload).unwrap_or_default().as_str());
}
