//! Durable subscription to the venue's market WebSocket.
//!
//! One connection is kept alive by an outer supervisor loop:
//! connect, replay the subscription intent set, read until failure, back off,
//! repeat. Inbound frames are normalized by [`crate::client::messages`] and
//! pushed into a channel in receive order; the consumer side must remain a
//! single task so ordering reaches the engine intact.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::monitoring::metrics::METRICS;

use super::messages::{parse_stream_message, BookEvent};

const HEARTBEAT_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            2 => ConnectionState::Reconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl From<ConnectionState> for u8 {
    fn from(value: ConnectionState) -> Self {
        match value {
            ConnectionState::Connecting => 0,
            ConnectionState::Connected => 1,
            ConnectionState::Reconnecting => 2,
            ConnectionState::Disconnected => 3,
        }
    }
}

/// Control messages from the handle to the connection task.
enum StreamCommand {
    Subscribe(String),
    Unsubscribe(String),
    Reconnect,
    Stop,
}

/// Handle to the price-stream worker.
///
/// `subscribe`/`unsubscribe` update the intent set and notify the live
/// socket; `clear_subscriptions` only clears the intent set (no upstream
/// unsubscribes are sent, to avoid races around market rotation);
/// `reconnect` tears the socket so the supervisor loop re-establishes it.
pub struct PriceStream {
    cmd_tx: mpsc::UnboundedSender<StreamCommand>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    running: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    worker: tokio::task::JoinHandle<()>,
}

impl PriceStream {
    /// Spawn the connection worker. Returns the handle and the ordered
    /// stream of normalized book events.
    pub fn spawn(url: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<BookEvent>) {
        let url = url.into();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Mutex::new(BTreeSet::new()));
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(AtomicU8::new(ConnectionState::Connecting.into()));

        let worker = tokio::spawn(run_stream(
            url,
            cmd_rx,
            event_tx,
            Arc::clone(&subscriptions),
            Arc::clone(&running),
            Arc::clone(&state),
        ));

        (
            Self {
                cmd_tx,
                subscriptions,
                running,
                state,
                worker,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.state.load(Ordering::SeqCst).into()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self, token_id: impl Into<String>) {
        let token = token_id.into();
        let inserted = self
            .subscriptions
            .lock()
            .map(|mut s| s.insert(token.clone()))
            .unwrap_or(false);
        if inserted {
            let _ = self.cmd_tx.send(StreamCommand::Subscribe(token));
        }
    }

    pub fn unsubscribe(&self, token_id: &str) {
        let removed = self
            .subscriptions
            .lock()
            .map(|mut s| s.remove(token_id))
            .unwrap_or(false);
        if removed {
            let _ = self
                .cmd_tx
                .send(StreamCommand::Unsubscribe(token_id.to_string()));
        }
    }

    /// Drop all subscription intent. Nothing is sent upstream; events for
    /// dropped tokens simply stop being resubscribed after the next
    /// reconnect and are filtered out by the engine's token lookup.
    pub fn clear_subscriptions(&self) {
        if let Ok(mut subs) = self.subscriptions.lock() {
            subs.clear();
        }
    }

    pub fn reconnect(&self) {
        let _ = self.cmd_tx.send(StreamCommand::Reconnect);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Stop the worker: cancel any in-flight read, close the socket
    /// gracefully, and wait for the task to finish.
    pub async fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.cmd_tx.send(StreamCommand::Stop);
        let _ = self.worker.await;
    }
}

fn subscribe_message(token_id: &str) -> Message {
    Message::Text(
        json!({
            "type": "subscribe",
            "channel": "market",
            "assets_ids": [token_id],
        })
        .to_string(),
    )
}

fn unsubscribe_message(token_id: &str) -> Message {
    Message::Text(
        json!({
            "type": "unsubscribe",
            "channel": "market",
            "assets_ids": [token_id],
        })
        .to_string(),
    )
}

fn backoff(attempt: u32) -> Duration {
    let capped = attempt.min(5);
    let millis = 500u64.saturating_mul(1 << capped);
    Duration::from_millis(millis.min(8_000))
}

/// Why the inner read loop ended.
enum LoopExit {
    Stop,
    Reconnect,
}

async fn run_stream(
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<StreamCommand>,
    event_tx: mpsc::UnboundedSender<BookEvent>,
    subscriptions: Arc<Mutex<BTreeSet<String>>>,
    running: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
) {
    let mut attempt: u32 = 0;

    while running.load(Ordering::SeqCst) {
        state.store(ConnectionState::Connecting.into(), Ordering::SeqCst);
        match connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                info!(target: "ws", url = %url, "connected to market stream");
                attempt = 0;
                METRICS.record_connect();
                state.store(ConnectionState::Connected.into(), Ordering::SeqCst);

                let exit = drive_connection(ws, &mut cmd_rx, &event_tx, &subscriptions).await;
                match exit {
                    LoopExit::Stop => break,
                    LoopExit::Reconnect => {
                        state.store(ConnectionState::Reconnecting.into(), Ordering::SeqCst);
                    }
                }
            }
            Err(err) => {
                warn!(target: "ws", error = %err, "connection failed");
                state.store(ConnectionState::Reconnecting.into(), Ordering::SeqCst);
            }
        }

        if !running.load(Ordering::SeqCst) {
            break;
        }
        attempt += 1;
        tokio::time::sleep(backoff(attempt)).await;
    }

    state.store(ConnectionState::Disconnected.into(), Ordering::SeqCst);
    info!(target: "ws", "market stream worker exiting");
}

async fn drive_connection(
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    cmd_rx: &mut mpsc::UnboundedReceiver<StreamCommand>,
    event_tx: &mpsc::UnboundedSender<BookEvent>,
    subscriptions: &Arc<Mutex<BTreeSet<String>>>,
) -> LoopExit {
    let (mut write, mut read) = ws.split();

    // Replay the full intent set on every (re)connect.
    let tokens: Vec<String> = subscriptions
        .lock()
        .map(|s| s.iter().cloned().collect())
        .unwrap_or_default();
    for token in &tokens {
        if let Err(err) = write.send(subscribe_message(token)).await {
            warn!(target: "ws", error = %err, "failed to replay subscription");
            return LoopExit::Reconnect;
        }
    }
    if !tokens.is_empty() {
        info!(target: "ws", count = tokens.len(), "subscriptions replayed");
    }

    let mut heartbeat = interval(Duration::from_secs(HEARTBEAT_SECS));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(StreamCommand::Subscribe(token)) => {
                        if let Err(err) = write.send(subscribe_message(&token)).await {
                            warn!(target: "ws", error = %err, "subscribe send failed");
                            return LoopExit::Reconnect;
                        }
                        debug!(target: "ws", token = %token, "subscribed");
                    }
                    Some(StreamCommand::Unsubscribe(token)) => {
                        if let Err(err) = write.send(unsubscribe_message(&token)).await {
                            warn!(target: "ws", error = %err, "unsubscribe send failed");
                            return LoopExit::Reconnect;
                        }
                    }
                    Some(StreamCommand::Reconnect) => {
                        info!(target: "ws", "reconnect requested; tearing connection");
                        let _ = write.send(Message::Close(None)).await;
                        return LoopExit::Reconnect;
                    }
                    Some(StreamCommand::Stop) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        return LoopExit::Stop;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for event in parse_stream_message(&text) {
                            METRICS.record_book_event();
                            if event_tx.send(event).is_err() {
                                // Consumer gone; treat as shutdown.
                                return LoopExit::Stop;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        warn!(target: "ws", ?frame, "stream closed by server");
                        return LoopExit::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(target: "ws", error = %err, "read error");
                        return LoopExit::Reconnect;
                    }
                    None => {
                        warn!(target: "ws", "stream ended");
                        return LoopExit::Reconnect;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if let Err(err) = write.send(Message::Text("PING".to_string())).await {
                    warn!(target: "ws", error = %err, "heartbeat failed");
                    return LoopExit::Reconnect;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_message_shape() {
        let msg = subscribe_message("tok-up");
        let Message::Text(text) = msg else {
            panic!("expected text frame");
        };
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "subscribe");
        assert_eq!(v["channel"], "market");
        assert_eq!(v["assets_ids"][0], "tok-up");
    }

    #[test]
    fn unsubscribe_message_is_symmetric() {
        let Message::Text(text) = unsubscribe_message("tok-up") else {
            panic!("expected text frame");
        };
        let v: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(v["type"], "unsubscribe");
        assert_eq!(v["assets_ids"][0], "tok-up");
    }

    #[test]
    fn backoff_is_capped() {
        assert_eq!(backoff(1), Duration::from_millis(1_000));
        assert_eq!(backoff(4), Duration::from_millis(8_000));
        assert_eq!(backoff(30), Duration::from_millis(8_000));
    }

    #[test]
    fn connection_state_round_trips_through_u8() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Reconnecting,
            ConnectionState::Disconnected,
        ] {
            let raw: u8 = state.into();
            assert_eq!(ConnectionState::from(raw), state);
        }
    }

    #[tokio::test]
    async fn intent_set_tracks_handle_calls() {
        let (stream, _rx) = PriceStream::spawn("wss://127.0.0.1:1/ws/market");
        stream.subscribe("tok-up");
        stream.subscribe("tok-down");
        stream.subscribe("tok-up"); // duplicate is a no-op
        assert_eq!(stream.subscription_count(), 2);

        stream.unsubscribe("tok-up");
        assert_eq!(stream.subscription_count(), 1);

        stream.clear_subscriptions();
        assert_eq!(stream.subscription_count(), 0);

        stream.stop().await;
    }
}
