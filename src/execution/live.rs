use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::types::Trade;

use super::{ExecutionError, ExecutionResult, PlaceRequest};

/// Environment variable holding the wallet private key; live trading is
/// unavailable without it.
pub const LIVE_KEY_ENV: &str = "POLYMARKET_PRIVATE_KEY";

const EXECUTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Structured response printed by the executor on stdout.
///
/// Market-order fills report the amount as `filled_size`; the other
/// subcommands call it `size`. No response carries both.
#[derive(Debug, Deserialize)]
struct ExecutorResponse {
    success: bool,
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default, alias = "filled_size")]
    size: Option<f64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    balance: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// Argument vector for a fill-or-kill market buy:
/// `market --token <id> --side BUY --size <shares>`.
fn market_order_args(token_id: &str, side: &str, size: f64) -> Vec<String> {
    vec![
        "market".to_string(),
        "--token".to_string(),
        token_id.to_string(),
        "--side".to_string(),
        side.to_string(),
        "--size".to_string(),
        size.to_string(),
    ]
}

/// Live execution adapter: delegates order placement and account queries to
/// the signing executor process, passing the request as subcommand arguments
/// and parsing the JSON result it prints on stdout. The adapter never
/// touches engine state, so it is safe to call with the engine lock held;
/// callers accept that an invocation blocks for the duration of the child
/// process.
#[derive(Clone, Debug)]
pub struct LiveExecutor {
    executor_path: String,
}

impl LiveExecutor {
    pub fn new(executor_path: impl Into<String>) -> Self {
        Self {
            executor_path: executor_path.into(),
        }
    }

    /// Live trading needs the wallet key in the environment. Retries are not
    /// attempted here: a duplicate submission could double-place.
    pub fn is_available(&self) -> bool {
        std::env::var(LIVE_KEY_ENV).map(|v| !v.is_empty()).unwrap_or(false)
    }

    pub async fn place(&self, req: &PlaceRequest) -> ExecutionResult<Trade> {
        info!(
            target: "execution",
            side = %req.side,
            shares = req.shares,
            price = req.price,
            token = %req.token_id,
            "placing live order"
        );

        let args = market_order_args(&req.token_id, "BUY", req.shares);
        let resp = self.invoke(&args).await?;

        if !resp.success {
            let reason = resp.error.unwrap_or_else(|| "unknown error".to_string());
            warn!(target: "execution", error = %reason, "live order failed");
            return Err(ExecutionError::Rejected(reason));
        }

        let order_id = resp
            .order_id
            .ok_or_else(|| ExecutionError::Rejected("response missing order_id".to_string()))?;
        let filled = resp.size.filter(|s| *s > 0.0).unwrap_or(req.shares);
        let fill_price = resp.price.filter(|p| *p > 0.0).unwrap_or(req.price);

        info!(
            target: "execution",
            order_id = %order_id,
            status = resp.status.as_deref().unwrap_or("unknown"),
            "live order accepted"
        );

        Ok(Trade {
            id: order_id,
            market_slug: req.market_slug.clone(),
            leg: req.leg,
            side: req.side,
            token_id: req.token_id.clone(),
            shares: filled,
            price: fill_price,
            cost: filled * fill_price,
            fee: 0.0,
            pnl: 0.0,
            is_live: true,
            ts: req.ts,
        })
    }

    /// Venue balance probe used when switching into live mode.
    pub async fn balance(&self) -> ExecutionResult<f64> {
        let resp = self.invoke(&["balance".to_string()]).await?;

        if !resp.success {
            let reason = resp.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(ExecutionError::Unavailable(reason));
        }
        resp.balance
            .ok_or_else(|| ExecutionError::Unavailable("response missing balance".to_string()))
    }

    async fn invoke(&self, args: &[String]) -> ExecutionResult<ExecutorResponse> {
        let output = tokio::time::timeout(
            EXECUTOR_TIMEOUT,
            Command::new("python3")
                .arg(&self.executor_path)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExecutionError::Timeout)??;

        let resp: ExecutorResponse = serde_json::from_slice(&output.stdout)?;
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_order_argv_matches_executor_interface() {
        let args = market_order_args("tok-up", "BUY", 10.0);
        assert_eq!(
            args,
            vec!["market", "--token", "tok-up", "--side", "BUY", "--size", "10"]
        );
    }

    #[test]
    fn fractional_size_is_rendered_in_full() {
        let args = market_order_args("tok-up", "BUY", 7.5);
        assert_eq!(args[6], "7.5");
    }

    #[test]
    fn executor_response_parses_minimal_failure() {
        let resp: ExecutorResponse =
            serde_json::from_str(r#"{"success": false, "error": "no credentials"}"#).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("no credentials"));
        assert!(resp.order_id.is_none());
    }

    #[test]
    fn executor_response_parses_fill() {
        let resp: ExecutorResponse = serde_json::from_str(
            r#"{"success": true, "order_id": "0xabc", "status": "FILLED", "size": 10.0, "price": 0.37, "side": "BUY"}"#,
        )
        .unwrap();
        assert!(resp.success);
        assert_eq!(resp.order_id.as_deref(), Some("0xabc"));
        assert_eq!(resp.price, Some(0.37));
    }

    #[test]
    fn executor_response_accepts_filled_size_alias() {
        let resp: ExecutorResponse = serde_json::from_str(
            r#"{"success": true, "order_id": "0xabc", "status": "FILLED", "filled_size": 8.0, "price": 0.37}"#,
        )
        .unwrap();
        assert_eq!(resp.size, Some(8.0));
    }

    #[test]
    fn executor_response_parses_balance() {
        let resp: ExecutorResponse = serde_json::from_str(
            r#"{"success": true, "balance": 1234.56, "currency": "USDC"}"#,
        )
        .unwrap();
        assert!(resp.success);
        assert_eq!(resp.balance, Some(1234.56));
    }
}
