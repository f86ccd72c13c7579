use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::engine::cycle::CycleRecord;
use crate::types::Trade;

/// Row model for executed trades.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRow {
    pub id: String,
    pub market_slug: String,
    pub leg: i32,
    pub side: String,
    pub token_id: String,
    pub shares: f64,
    pub price: f64,
    pub cost: f64,
    pub fee: f64,
    pub pnl: f64,
    pub is_live: bool,
    pub ts: DateTime<Utc>,
}

impl From<&Trade> for TradeRow {
    fn from(t: &Trade) -> Self {
        Self {
            id: t.id.clone(),
            market_slug: t.market_slug.clone(),
            leg: i32::from(t.leg),
            side: t.side.as_str().to_string(),
            token_id: t.token_id.clone(),
            shares: t.shares,
            price: t.price,
            cost: t.cost,
            fee: t.fee,
            pnl: t.pnl,
            is_live: t.is_live,
            ts: t.ts,
        }
    }
}

/// Row model for cycle lifecycle records.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CycleRow {
    pub id: String,
    pub market_slug: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub leg1_side: Option<String>,
    pub leg1_price: Option<f64>,
    pub leg2_price: Option<f64>,
    pub locked_in_profit: Option<f64>,
    pub status: String,
}

impl From<&CycleRecord> for CycleRow {
    fn from(c: &CycleRecord) -> Self {
        Self {
            id: c.id.clone(),
            market_slug: c.market_slug.clone(),
            started_at: c.started_at,
            ended_at: c.ended_at,
            leg1_side: c.leg1_side.map(|s| s.as_str().to_string()),
            leg1_price: c.leg1_price,
            leg2_price: c.leg2_price,
            locked_in_profit: c.locked_in_profit,
            status: c.status.as_str().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cycle::CycleStatus;
    use crate::types::Side;

    #[test]
    fn trade_row_from_trade() {
        let trade = Trade {
            id: "paper_7".to_string(),
            market_slug: "btc-updown-15m-900".to_string(),
            leg: 2,
            side: Side::Down,
            token_id: "tok-down".to_string(),
            shares: 10.0,
            price: 0.6,
            cost: 6.0,
            fee: 0.0,
            pnl: 0.5,
            is_live: false,
            ts: Utc::now(),
        };
        let row = TradeRow::from(&trade);
        assert_eq!(row.leg, 2);
        assert_eq!(row.side, "DOWN");
        assert!((row.pnl - 0.5).abs() < 1e-12);
    }

    #[test]
    fn cycle_row_from_record() {
        let record = CycleRecord {
            id: "c-1".to_string(),
            market_slug: "btc-updown-15m-900".to_string(),
            started_at: Utc::now(),
            ended_at: None,
            leg1_side: Some(Side::Up),
            leg1_price: Some(0.35),
            leg2_price: None,
            locked_in_profit: None,
            status: CycleStatus::Leg1Done,
        };
        let row = CycleRow::from(&record);
        assert_eq!(row.status, "leg1_done");
        assert_eq!(row.leg1_side.as_deref(), Some("UP"));
        assert!(row.ended_at.is_none());
    }
}
