use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::engine::book::OrderBookSnapshot;
use crate::types::Side;

/// Cached state for one up/down market.
#[derive(Clone, Debug)]
pub struct MarketState {
    pub slug: String,
    pub up_token_id: String,
    pub down_token_id: String,
    pub up_book: OrderBookSnapshot,
    pub down_book: OrderBookSnapshot,
    pub last_update: DateTime<Utc>,
}

impl MarketState {
    fn new(slug: String, up_token_id: String, down_token_id: String) -> Self {
        Self {
            slug,
            up_token_id,
            down_token_id,
            up_book: OrderBookSnapshot::default(),
            down_book: OrderBookSnapshot::default(),
            last_update: Utc::now(),
        }
    }

    pub fn book(&self, side: Side) -> &OrderBookSnapshot {
        match side {
            Side::Up => &self.up_book,
            Side::Down => &self.down_book,
        }
    }

    pub fn token_id(&self, side: Side) -> &str {
        match side {
            Side::Up => &self.up_token_id,
            Side::Down => &self.down_token_id,
        }
    }
}

/// Outcome of a `set_market` call, distinguishing a rotation from a refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SetMarketOutcome {
    /// A new slug was installed; the store was cleared down to one entry.
    Rotated { previous: Option<String> },
    /// Same slug: token IDs refreshed, books untouched.
    Refreshed,
}

/// Store of market state keyed by slug, with token-ID lookup by scan.
///
/// At most one market is ever live: installing a different slug clears the
/// whole map. The scan in `apply_book` is therefore over a single entry.
#[derive(Debug, Default)]
pub struct MarketStore {
    markets: HashMap<String, MarketState>,
    active_slug: Option<String>,
}

impl MarketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_market(&mut self, slug: &str, up_token: &str, down_token: &str) -> SetMarketOutcome {
        if self.active_slug.as_deref() == Some(slug) {
            if let Some(market) = self.markets.get_mut(slug) {
                market.up_token_id = up_token.to_string();
                market.down_token_id = down_token.to_string();
            }
            return SetMarketOutcome::Refreshed;
        }

        let previous = self.active_slug.take();
        self.markets.clear();
        self.markets.insert(
            slug.to_string(),
            MarketState::new(slug.to_string(), up_token.to_string(), down_token.to_string()),
        );
        self.active_slug = Some(slug.to_string());
        SetMarketOutcome::Rotated { previous }
    }

    /// Install `snapshot` on whichever side of whichever market owns
    /// `token_id`. Returns the owning slug and side, or `None` for a token
    /// that matches nothing (late event after a rotation).
    pub fn apply_book(
        &mut self,
        token_id: &str,
        snapshot: OrderBookSnapshot,
    ) -> Option<(String, Side)> {
        for market in self.markets.values_mut() {
            let side = if market.up_token_id == token_id {
                Side::Up
            } else if market.down_token_id == token_id {
                Side::Down
            } else {
                continue;
            };

            match side {
                Side::Up => market.up_book = snapshot,
                Side::Down => market.down_book = snapshot,
            }
            market.last_update = Utc::now();
            return Some((market.slug.clone(), side));
        }
        None
    }

    pub fn active_slug(&self) -> Option<&str> {
        self.active_slug.as_deref()
    }

    pub fn active(&self) -> Option<&MarketState> {
        self.active_slug.as_deref().and_then(|s| self.markets.get(s))
    }

    pub fn get(&self, slug: &str) -> Option<&MarketState> {
        self.markets.get(slug)
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::book::PriceLevel;

    fn snapshot(ask: f64) -> OrderBookSnapshot {
        OrderBookSnapshot::new(vec![], vec![PriceLevel::new(ask, 100.0)], Utc::now())
    }

    #[test]
    fn rotation_clears_to_single_entry() {
        let mut store = MarketStore::new();
        store.set_market("btc-updown-15m-900", "up1", "down1");
        store.apply_book("up1", snapshot(0.4));

        let outcome = store.set_market("btc-updown-15m-1800", "up2", "down2");
        assert_eq!(
            outcome,
            SetMarketOutcome::Rotated {
                previous: Some("btc-updown-15m-900".to_string())
            }
        );
        assert_eq!(store.len(), 1);
        assert_eq!(store.active_slug(), Some("btc-updown-15m-1800"));
    }

    #[test]
    fn same_slug_refreshes_tokens_only() {
        let mut store = MarketStore::new();
        store.set_market("btc-updown-15m-900", "up1", "down1");
        store.apply_book("up1", snapshot(0.4));

        let outcome = store.set_market("btc-updown-15m-900", "up1b", "down1b");
        assert_eq!(outcome, SetMarketOutcome::Refreshed);

        let market = store.active().unwrap();
        assert_eq!(market.up_token_id, "up1b");
        // The book installed before the refresh survives.
        assert_eq!(market.up_book.best_ask(), 0.4);
    }

    #[test]
    fn unknown_token_is_dropped() {
        let mut store = MarketStore::new();
        store.set_market("btc-updown-15m-900", "up1", "down1");
        assert!(store.apply_book("stale-token", snapshot(0.2)).is_none());
        assert!(store.active().unwrap().up_book.is_empty());
    }

    #[test]
    fn apply_book_routes_by_side() {
        let mut store = MarketStore::new();
        store.set_market("btc-updown-15m-900", "up1", "down1");

        let hit = store.apply_book("down1", snapshot(0.66)).unwrap();
        assert_eq!(hit, ("btc-updown-15m-900".to_string(), Side::Down));
        assert_eq!(store.active().unwrap().down_book.best_ask(), 0.66);
    }
}
