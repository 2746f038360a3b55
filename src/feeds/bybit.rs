//! Bybit depth feed (v5 public spot, `orderbook.50` topic).
//!
//! Bybit sends a snapshot on subscribe and deltas after that; a delta row
//! with quantity "0" deletes the level. Keepalive is an application-level
//! `{"op":"ping"}` rather than a WebSocket ping frame.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::models::{NormalizedOrderBook, OrderBookLevel};

use super::backoff::{BackoffPolicy, EndpointRotator};
use super::{parse_level, BookCallback, FeedTask, MarketDataFeed, MAX_EMITTED_LEVELS, PING_INTERVAL, STALENESS_BUDGET};

const DEFAULT_ENDPOINTS: &[&str] = &["wss://stream.bybit.com/v5/public/spot"];

#[derive(Debug, Deserialize)]
struct TopicMessage {
    topic: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    ts: Option<i64>,
    data: Option<TopicData>,
}

#[derive(Debug, Deserialize)]
struct TopicData {
    #[serde(default, rename = "b")]
    bids: Vec<(String, String)>,
    #[serde(default, rename = "a")]
    asks: Vec<(String, String)>,
}

#[derive(Default)]
struct SideMaps {
    bids: HashMap<u64, f64>,
    asks: HashMap<u64, f64>,
}

impl SideMaps {
    fn apply(&mut self, data: &TopicData, is_snapshot: bool) {
        if is_snapshot {
            self.bids.clear();
            self.asks.clear();
        }
        for (price, quantity) in &data.bids {
            if let Some((price, quantity)) = parse_level(price, quantity) {
                apply_level(&mut self.bids, price, quantity);
            }
        }
        for (price, quantity) in &data.asks {
            if let Some((price, quantity)) = parse_level(price, quantity) {
                apply_level(&mut self.asks, price, quantity);
            }
        }
    }

    fn to_levels(&self) -> (Vec<OrderBookLevel>, Vec<OrderBookLevel>) {
        let mut bids: Vec<OrderBookLevel> = self
            .bids
            .iter()
            .map(|(bits, qty)| OrderBookLevel::new(f64::from_bits(*bits), *qty))
            .collect();
        let mut asks: Vec<OrderBookLevel> = self
            .asks
            .iter()
            .map(|(bits, qty)| OrderBookLevel::new(f64::from_bits(*bits), *qty))
            .collect();
        bids.sort_by(|a, b| b.price.total_cmp(&a.price));
        asks.sort_by(|a, b| a.price.total_cmp(&b.price));
        bids.truncate(MAX_EMITTED_LEVELS);
        asks.truncate(MAX_EMITTED_LEVELS);
        (bids, asks)
    }
}

fn apply_level(side: &mut HashMap<u64, f64>, price: f64, quantity: f64) {
    if quantity > 0.0 {
        side.insert(price.to_bits(), quantity);
    } else {
        side.remove(&price.to_bits());
    }
}

pub struct BybitDepthFeed {
    name: String,
    symbol: String,
    endpoints: Vec<String>,
    task: FeedTask,
}

impl BybitDepthFeed {
    pub fn new(name: &str, symbol: &str, url_overrides: Vec<String>) -> Self {
        let endpoints = if url_overrides.is_empty() {
            DEFAULT_ENDPOINTS.iter().map(|s| s.to_string()).collect()
        } else {
            url_overrides
        };
        Self {
            name: name.to_string(),
            symbol: symbol.to_ascii_uppercase(),
            endpoints,
            task: FeedTask::new(),
        }
    }
}

#[async_trait]
impl MarketDataFeed for BybitDepthFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn start(&self, callback: BookCallback) {
        let name = self.name.clone();
        let symbol = self.symbol.clone();
        let endpoints = self.endpoints.clone();
        let running = self.task.running_flag();
        self.task
            .spawn(async move {
                run_loop(name, symbol, endpoints, running, callback).await;
            })
            .await;
    }

    async fn stop(&self) {
        self.task.stop(&self.name).await;
    }
}

async fn run_loop(
    name: String,
    symbol: String,
    endpoints: Vec<String>,
    running: Arc<AtomicBool>,
    callback: BookCallback,
) {
    let mut backoff = BackoffPolicy::new();
    let mut rotator = EndpointRotator::new(endpoints);

    while running.load(Ordering::SeqCst) {
        let url = rotator.current().to_string();
        match connect_async(&url).await {
            Ok((stream, _)) => {
                info!(feed = %name, url = %url, "bybit orderbook stream connected");
                stream_books(&name, &symbol, stream, &running, &callback, &mut backoff).await;
            }
            Err(error) => {
                warn!(feed = %name, url = %url, %error, "bybit connect failed");
            }
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }
        rotator.rotate();
        let delay = backoff.next_delay();
        warn!(feed = %name, delay_ms = delay.as_millis() as u64, "bybit reconnecting");
        sleep(delay).await;
    }
}

async fn stream_books(
    name: &str,
    symbol: &str,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    running: &Arc<AtomicBool>,
    callback: &BookCallback,
    backoff: &mut BackoffPolicy,
) {
    let (mut write, mut read) = stream.split();

    let subscribe = json!({
        "op": "subscribe",
        "args": [format!("orderbook.50.{}", symbol)],
    });
    if write
        .send(Message::Text(subscribe.to_string()))
        .await
        .is_err()
    {
        warn!(feed = %name, "bybit subscribe failed");
        return;
    }

    let mut book = SideMaps::default();
    let mut ping_timer = interval(PING_INTERVAL);
    ping_timer.reset();

    loop {
        if !running.load(Ordering::SeqCst) {
            return;
        }
        tokio::select! {
            message = timeout(STALENESS_BUDGET, read.next()) => {
                let message = match message {
                    Ok(Some(Ok(message))) => message,
                    Ok(Some(Err(error))) => {
                        warn!(feed = %name, %error, "bybit read error");
                        return;
                    }
                    Ok(None) => {
                        warn!(feed = %name, "bybit stream closed");
                        return;
                    }
                    Err(_) => {
                        warn!(feed = %name, "bybit stream stale; forcing reconnect");
                        return;
                    }
                };
                match message {
                    Message::Text(text) => {
                        backoff.reset();
                        if let Some(emitted) = handle_text(name, symbol, &text, &mut book) {
                            callback(emitted);
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => {
                        debug!(feed = %name, "bybit sent close");
                        return;
                    }
                    _ => {}
                }
            }
            _ = ping_timer.tick() => {
                let ping = json!({"op": "ping"});
                if write.send(Message::Text(ping.to_string())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn handle_text(
    name: &str,
    symbol: &str,
    raw: &str,
    book: &mut SideMaps,
) -> Option<NormalizedOrderBook> {
    let message: TopicMessage = serde_json::from_str(raw).ok()?;
    let topic = message.topic.as_deref()?;
    if !topic.starts_with("orderbook.") {
        return None;
    }
    let data = message.data?;
    let is_snapshot = message.kind.as_deref() == Some("snapshot");
    book.apply(&data, is_snapshot);

    let (bids, asks) = book.to_levels();
    if bids.is_empty() || asks.is_empty() {
        return None;
    }

    let exchange_timestamp = message
        .ts
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    Some(NormalizedOrderBook::new(
        name,
        symbol,
        bids,
        asks,
        exchange_timestamp,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_and_delta_flow() {
        let mut book = SideMaps::default();
        let snapshot = r#"{
            "topic": "orderbook.50.BTCUSDT",
            "type": "snapshot",
            "ts": 1700000000000,
            "data": {
                "s": "BTCUSDT",
                "b": [["100.0", "1.0"], ["99.9", "2.0"]],
                "a": [["100.1", "1.0"]],
                "u": 1,
                "seq": 1
            }
        }"#;
        let emitted = handle_text("bybit", "BTCUSDT", snapshot, &mut book).unwrap();
        assert_eq!(emitted.best_bid(), Some(100.0));
        assert_eq!(emitted.exchange_timestamp.timestamp_millis(), 1_700_000_000_000);

        let delta = r#"{
            "topic": "orderbook.50.BTCUSDT",
            "type": "delta",
            "ts": 1700000001000,
            "data": {"s": "BTCUSDT", "b": [["100.0", "0"]], "a": [["100.05", "0.4"]], "u": 2, "seq": 2}
        }"#;
        let emitted = handle_text("bybit", "BTCUSDT", delta, &mut book).unwrap();
        assert_eq!(emitted.best_bid(), Some(99.9));
        assert_eq!(emitted.best_ask(), Some(100.05));
    }

    #[test]
    fn control_messages_are_ignored() {
        let mut book = SideMaps::default();
        let ack = r#"{"success": true, "op": "subscribe", "conn_id": "x"}"#;
        assert!(handle_text("bybit", "BTCUSDT", ack, &mut book).is_none());
        let pong = r#"{"op": "pong"}"#;
        assert!(handle_text("bybit", "BTCUSDT", pong, &mut book).is_none());
    }
}
