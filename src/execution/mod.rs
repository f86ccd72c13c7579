mod live;

use chrono::{DateTime, Utc};

use crate::types::{Side, Trade};

pub use live::{LiveExecutor, LIVE_KEY_ENV};

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("order rejected by venue: {0}")]
    Rejected(String),

    #[error("order executor I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed executor response: {0}")]
    Response(#[from] serde_json::Error),

    #[error("order executor timed out")]
    Timeout,

    #[error("live trading unavailable: {0}")]
    Unavailable(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;

/// Parameters of a single buy routed through the execution port.
#[derive(Clone, Debug)]
pub struct PlaceRequest {
    pub market_slug: String,
    pub leg: u8,
    pub side: Side,
    pub token_id: String,
    pub shares: f64,
    pub price: f64,
    pub ts: DateTime<Utc>,
}

/// In-process fill simulator: every order fills instantly at the requested
/// price with zero fee. Trade IDs are `paper_<nonce>` with a monotonic nonce.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    nonce: u64,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&mut self, req: &PlaceRequest) -> Trade {
        self.nonce += 1;
        Trade {
            id: format!("paper_{}", self.nonce),
            market_slug: req.market_slug.clone(),
            leg: req.leg,
            side: req.side,
            token_id: req.token_id.clone(),
            shares: req.shares,
            price: req.price,
            cost: req.shares * req.price,
            fee: 0.0,
            pnl: 0.0,
            is_live: false,
            ts: req.ts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PlaceRequest {
        PlaceRequest {
            market_slug: "btc-updown-15m-900".to_string(),
            leg: 1,
            side: Side::Up,
            token_id: "tok-up".to_string(),
            shares: 10.0,
            price: 0.35,
            ts: Utc::now(),
        }
    }

    #[test]
    fn simulated_fill_matches_request() {
        let mut exec = SimulatedExecutor::new();
        let trade = exec.place(&request());
        assert_eq!(trade.id, "paper_1");
        assert_eq!(trade.leg, 1);
        assert!(!trade.is_live);
        assert!((trade.cost - 3.5).abs() < 1e-12);
        assert_eq!(trade.fee, 0.0);
        assert_eq!(trade.pnl, 0.0);
    }

    #[test]
    fn simulated_ids_are_monotonic() {
        let mut exec = SimulatedExecutor::new();
        let a = exec.place(&request());
        let b = exec.place(&request());
        assert_eq!(a.id, "paper_1");
        assert_eq!(b.id, "paper_2");
    }
}
