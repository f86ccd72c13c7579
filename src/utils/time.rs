use chrono::{DateTime, Utc};

/// Length of a Polymarket short-term market window in seconds.
pub const WINDOW_SECS: i64 = 900;

/// Start timestamp (epoch seconds) of the window containing `ts`.
pub fn window_start(ts: DateTime<Utc>) -> i64 {
    ts.timestamp().div_euclid(WINDOW_SECS) * WINDOW_SECS
}

/// Seconds elapsed since the start of the window containing `ts`.
pub fn secs_into_window(ts: DateTime<Utc>) -> i64 {
    ts.timestamp() - window_start(ts)
}

/// Seconds remaining in the window containing `ts`.
pub fn time_left_in_window(ts: DateTime<Utc>) -> i64 {
    WINDOW_SECS - secs_into_window(ts)
}

/// Seconds remaining in the window that started at `start_ts`, which may be
/// negative once the window has expired.
pub fn time_left_from_start(start_ts: i64, now: DateTime<Utc>) -> i64 {
    start_ts + WINDOW_SECS - now.timestamp()
}

/// True when `time_left` falls inside the trading phase: the final
/// `dump_window_sec` seconds of the window.
pub fn in_trading_phase(time_left: i64, dump_window_sec: i64) -> bool {
    time_left >= 0 && time_left <= dump_window_sec
}

/// Build the slug of an up/down market: `{coin}-updown-15m-{window_start}`.
pub fn market_slug(coin: &str, window_start_ts: i64) -> String {
    format!("{}-updown-15m-{}", coin.to_lowercase(), window_start_ts)
}

/// Recover the window-start timestamp encoded in a market slug suffix.
pub fn slug_window_start(slug: &str) -> Option<i64> {
    slug.rsplit('-').next()?.parse::<i64>().ok()
}
