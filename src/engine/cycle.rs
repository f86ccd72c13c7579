use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Side, Trade};

/// Lifecycle status of a two-leg cycle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleStatus {
    Pending,
    Leg1Done,
    Complete,
    /// Abandoned by a market rotation before the hedge was placed.
    Incomplete,
}

impl CycleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CycleStatus::Pending => "pending",
            CycleStatus::Leg1Done => "leg1_done",
            CycleStatus::Complete => "complete",
            CycleStatus::Incomplete => "incomplete",
        }
    }
}

/// Durable record of one cycle, mirrored to storage out of the critical path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CycleRecord {
    pub id: String,
    pub market_slug: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub leg1_side: Option<Side>,
    pub leg1_price: Option<f64>,
    pub leg2_price: Option<f64>,
    pub locked_in_profit: Option<f64>,
    pub status: CycleStatus,
}

impl CycleRecord {
    /// A cycle record freshly opened by a leg-1 entry.
    pub fn opened(id: String, market_slug: String, leg1: &Trade) -> Self {
        Self {
            id,
            market_slug,
            started_at: leg1.ts,
            ended_at: None,
            leg1_side: Some(leg1.side),
            leg1_price: Some(leg1.price),
            leg2_price: None,
            locked_in_profit: None,
            status: CycleStatus::Leg1Done,
        }
    }

    /// Close the cycle with a matched hedge.
    pub fn complete(mut self, leg2: &Trade, profit: f64) -> Self {
        self.ended_at = Some(leg2.ts);
        self.leg2_price = Some(leg2.price);
        self.locked_in_profit = Some(profit);
        self.status = CycleStatus::Complete;
        self
    }

    /// Close the cycle as abandoned: leg 1 was never hedged.
    pub fn abandon(mut self, at: DateTime<Utc>) -> Self {
        self.ended_at = Some(at);
        self.status = CycleStatus::Incomplete;
        self
    }
}

/// The open position held between leg 1 and leg 2. Exists exactly while a
/// cycle is awaiting its hedge.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Position {
    pub market_slug: String,
    pub side: Side,
    pub shares: f64,
    pub avg_cost: f64,
    pub total_cost: f64,
    pub trades: Vec<Trade>,
}

impl Position {
    pub fn from_entry(trade: Trade) -> Self {
        Self {
            market_slug: trade.market_slug.clone(),
            side: trade.side,
            shares: trade.shares,
            avg_cost: trade.price,
            total_cost: trade.cost,
            trades: vec![trade],
        }
    }
}
