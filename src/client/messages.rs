//! Normalization of the market channel's inbound message shapes.
//!
//! The upstream feed emits three shapes on the same channel: a full book
//! snapshot per asset, a `price_changes` batch carrying best-of-book deltas,
//! and a bare array of book snapshots. All of them are folded into
//! [`BookEvent`]s so the engine only ever sees order-book snapshots.
//! Scalars may arrive as JSON strings or numbers; both are accepted.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::engine::book::{OrderBookSnapshot, PriceLevel};

/// Size attached to synthesized best-of-book levels. The engine only
/// consults prices, so a placeholder depth suffices.
const SYNTH_LEVEL_SIZE: f64 = 100.0;

/// One normalized order-book update, keyed by the outcome token it belongs to.
#[derive(Clone, Debug, PartialEq)]
pub struct BookEvent {
    pub token_id: String,
    pub snapshot: OrderBookSnapshot,
}

/// A JSON scalar that may be either a number or its string rendering.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Num(f64),
    Text(String),
}

impl Scalar {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Num(n) => Some(*n),
            Scalar::Text(s) => s.parse::<f64>().ok(),
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Num(n) => Some(*n as i64),
            Scalar::Text(s) => s.parse::<i64>().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: Scalar,
    size: Scalar,
}

impl RawLevel {
    fn to_level(&self) -> Option<PriceLevel> {
        Some(PriceLevel::new(self.price.as_f64()?, self.size.as_f64()?))
    }
}

/// Shape 1: a full book snapshot for one asset.
#[derive(Debug, Deserialize)]
struct RawBook {
    asset_id: String,
    #[serde(default)]
    bids: Option<Vec<RawLevel>>,
    #[serde(default)]
    asks: Option<Vec<RawLevel>>,
    #[serde(default)]
    timestamp: Option<Scalar>,
}

/// Shape 2: a batch of best-of-book changes.
#[derive(Debug, Deserialize)]
struct RawPriceChangeBatch {
    price_changes: Vec<RawPriceChange>,
    #[serde(default)]
    timestamp: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
struct RawPriceChange {
    asset_id: String,
    #[serde(default)]
    price: Option<Scalar>,
    #[serde(default)]
    best_bid: Option<Scalar>,
    #[serde(default)]
    best_ask: Option<Scalar>,
}

fn parse_millis_timestamp(ts: Option<&Scalar>) -> DateTime<Utc> {
    ts.and_then(Scalar::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

fn book_to_event(raw: &RawBook) -> BookEvent {
    let collect = |levels: &Option<Vec<RawLevel>>| {
        levels
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(RawLevel::to_level)
            .collect::<Vec<_>>()
    };

    BookEvent {
        token_id: raw.asset_id.clone(),
        snapshot: OrderBookSnapshot::new(
            collect(&raw.bids),
            collect(&raw.asks),
            parse_millis_timestamp(raw.timestamp.as_ref()),
        ),
    }
}

fn price_change_to_event(raw: &RawPriceChange, ts: DateTime<Utc>) -> BookEvent {
    let best_ask = raw
        .best_ask
        .as_ref()
        .and_then(Scalar::as_f64)
        .or_else(|| raw.price.as_ref().and_then(Scalar::as_f64))
        .unwrap_or(0.0);
    let best_bid = raw.best_bid.as_ref().and_then(Scalar::as_f64).unwrap_or(0.0);

    let asks = if best_ask > 0.0 {
        vec![PriceLevel::new(best_ask, SYNTH_LEVEL_SIZE)]
    } else {
        Vec::new()
    };
    let bids = if best_bid > 0.0 {
        vec![PriceLevel::new(best_bid, SYNTH_LEVEL_SIZE)]
    } else {
        Vec::new()
    };

    BookEvent {
        token_id: raw.asset_id.clone(),
        snapshot: OrderBookSnapshot::new(bids, asks, ts),
    }
}

/// Parse one inbound text frame into zero or more book events.
///
/// The shapes are tried in a fixed order: full book, price-change batch,
/// array of books. Anything that matches none of them (acks, heartbeats,
/// unrelated event types) yields no events.
pub fn parse_stream_message(text: &str) -> Vec<BookEvent> {
    if let Ok(book) = serde_json::from_str::<RawBook>(text) {
        if book.bids.is_some() || book.asks.is_some() {
            return vec![book_to_event(&book)];
        }
    }

    if let Ok(batch) = serde_json::from_str::<RawPriceChangeBatch>(text) {
        let ts = parse_millis_timestamp(batch.timestamp.as_ref());
        return batch
            .price_changes
            .iter()
            .map(|c| price_change_to_event(c, ts))
            .collect();
    }

    if let Ok(books) = serde_json::from_str::<Vec<RawBook>>(text) {
        return books
            .iter()
            .filter(|b| b.bids.is_some() || b.asks.is_some())
            .map(book_to_event)
            .collect();
    }

    Vec::new()
}
