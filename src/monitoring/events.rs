use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::types::{Side, TradingMode};

/// Notable engine transitions published to interested observers (monitoring,
/// status consumers). The channel is lossy for slow receivers; the engine
/// never blocks on it.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    Started,
    Stopped,
    MarketRotated {
        slug: String,
        previous: Option<String>,
    },
    Leg1Entry {
        market_slug: String,
        side: Side,
        shares: f64,
        price: f64,
        cost: f64,
    },
    Leg2Hedge {
        market_slug: String,
        side: Side,
        price: f64,
        sum: f64,
        profit: f64,
    },
    CycleAbandoned {
        market_slug: String,
        side: Side,
        lost_cost: f64,
    },
    ExecutionFailed {
        market_slug: String,
        side: Side,
        reason: String,
    },
    ModeChanged {
        mode: TradingMode,
    },
    ConfigUpdated {
        field: String,
    },
    Reset,
    ExternalTrade {
        market_slug: String,
        side: Side,
        shares: f64,
        price: f64,
    },
}

/// Cheap broadcast channel for engine events. Cloneable; publishing with no
/// subscribers is a no-op.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<TimestampedEvent>,
}

#[derive(Clone, Debug, Serialize)]
pub struct TimestampedEvent {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(TimestampedEvent {
            ts: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimestampedEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Forward engine events to the structured log until the bus closes.
pub async fn log_events(mut rx: broadcast::Receiver<TimestampedEvent>) {
    loop {
        match rx.recv().await {
            Ok(ev) => match &ev.event {
                EngineEvent::CycleAbandoned { market_slug, side, lost_cost } => {
                    warn!(
                        target: "engine",
                        market = %market_slug,
                        side = %side,
                        lost_cost,
                        "cycle abandoned on rotation"
                    );
                }
                EngineEvent::ExecutionFailed { market_slug, side, reason } => {
                    warn!(
                        target: "engine",
                        market = %market_slug,
                        side = %side,
                        reason = %reason,
                        "execution failed"
                    );
                }
                other => {
                    info!(target: "engine", event = ?other, "engine event");
                }
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(target: "engine", skipped, "event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::Started);

        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev.event, EngineEvent::Started));
    }

    #[test]
    fn publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(EngineEvent::Reset);
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_value(EngineEvent::ModeChanged {
            mode: TradingMode::Live,
        })
        .unwrap();
        assert_eq!(json["kind"], "mode_changed");
    }
}
