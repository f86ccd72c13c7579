use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One price level of an order book side.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

impl PriceLevel {
    pub fn new(price: f64, size: f64) -> Self {
        Self { price, size }
    }
}

/// Snapshot of one token's order book as delivered by the price stream.
///
/// Level ordering is not trusted: best-of-book is always computed by scanning,
/// so an upstream feed that violates its own sort contract cannot flip a
/// trading decision.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct OrderBookSnapshot {
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub ts: DateTime<Utc>,
}

impl Default for OrderBookSnapshot {
    fn default() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            ts: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl OrderBookSnapshot {
    pub fn new(bids: Vec<PriceLevel>, asks: Vec<PriceLevel>, ts: DateTime<Utc>) -> Self {
        Self { bids, asks, ts }
    }

    /// Highest bid price; 0.0 for an empty side.
    pub fn best_bid(&self) -> f64 {
        if self.bids.is_empty() {
            return 0.0;
        }
        self.bids
            .iter()
            .map(|l| l.price)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Lowest ask price; 1.0 for an empty side.
    pub fn best_ask(&self) -> f64 {
        if self.asks.is_empty() {
            return 1.0;
        }
        self.asks
            .iter()
            .map(|l| l.price)
            .fold(f64::INFINITY, f64::min)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> OrderBookSnapshot {
        OrderBookSnapshot::new(
            bids.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
            asks.iter().map(|&(p, s)| PriceLevel::new(p, s)).collect(),
            Utc::now(),
        )
    }

    #[test]
    fn empty_sides_use_defaults() {
        let empty = OrderBookSnapshot::default();
        assert_eq!(empty.best_bid(), 0.0);
        assert_eq!(empty.best_ask(), 1.0);
    }

    #[test]
    fn best_of_book_ignores_input_ordering() {
        // Asks ascending is the contract, but tolerate anything.
        let unsorted = book(&[(0.30, 10.0), (0.34, 5.0)], &[(0.40, 10.0), (0.36, 5.0)]);
        assert_eq!(unsorted.best_ask(), 0.36);
        assert_eq!(unsorted.best_bid(), 0.34);
    }

    #[test]
    fn single_level_book() {
        let b = book(&[(0.34, 100.0)], &[(0.35, 50.0)]);
        assert_eq!(b.best_bid(), 0.34);
        assert_eq!(b.best_ask(), 0.35);
    }
}
