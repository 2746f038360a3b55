//! Kraken depth feed (WebSocket API v2, `book` channel).
//!
//! Kraken sends one snapshot after subscribing and incremental diffs after
//! that, so the adapter maintains a price-to-quantity map per side; a diff
//! with quantity 0 deletes the level. The working book is rebuilt from
//! scratch on every reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::models::{NormalizedOrderBook, OrderBookLevel};
use crate::symbol::split_symbol;

use super::backoff::{BackoffPolicy, EndpointRotator};
use super::{BookCallback, FeedTask, MarketDataFeed, MAX_EMITTED_LEVELS, PING_INTERVAL, STALENESS_BUDGET};

const DEFAULT_ENDPOINTS: &[&str] = &["wss://ws.kraken.com/v2"];
const BOOK_DEPTH: usize = 25;

#[derive(Debug, Deserialize)]
struct BookMessage {
    channel: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Vec<BookData>,
}

#[derive(Debug, Deserialize)]
struct BookData {
    #[serde(default)]
    bids: Vec<BookEntry>,
    #[serde(default)]
    asks: Vec<BookEntry>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BookEntry {
    price: f64,
    qty: f64,
}

/// Working book for one connection: price bits -> quantity.
#[derive(Default)]
struct SideMaps {
    bids: HashMap<u64, f64>,
    asks: HashMap<u64, f64>,
}

impl SideMaps {
    fn apply(&mut self, data: &BookData, is_snapshot: bool) {
        if is_snapshot {
            self.bids.clear();
            self.asks.clear();
        }
        for entry in &data.bids {
            apply_entry(&mut self.bids, entry);
        }
        for entry in &data.asks {
            apply_entry(&mut self.asks, entry);
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

fn apply_entry(side: &mut HashMap<u64, f64>, entry: &BookEntry) {
    if entry.qty > 0.0 {
        side.insert(entry.price.to_bits(), entry.qty);
    } else {
        side.remove(&entry.price.to_bits());
    }
}

pub struct KrakenDepthFeed {
    name: String,
    symbol: String,
    endpoints: Vec<String>,
    task: FeedTask,
}

impl KrakenDepthFeed {
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

    /// "BTCUSDT" -> "BTC/USDT", the pair notation v2 subscriptions use.
    fn pair(&self) -> String {
        let (base, quote) = split_symbol(&self.symbol);
        format!("{}/{}", base, quote)
    }
}

#[async_trait]
impl MarketDataFeed for KrakenDepthFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn start(&self, callback: BookCallback) {
        let name = self.name.clone();
        let symbol = self.symbol.clone();
        let pair = self.pair();
        let endpoints = self.endpoints.clone();
        let running = self.task.running_flag();
        self.task
            .spawn(async move {
                run_loop(name, symbol, pair, endpoints, running, callback).await;
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
    pair: String,
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
                info!(feed = %name, url = %url, "kraken book stream connected");
                stream_books(&name, &symbol, &pair, stream, &running, &callback, &mut backoff)
                    .await;
            }
            Err(error) => {
                warn!(feed = %name, url = %url, %error, "kraken connect failed");
            }
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }
        rotator.rotate();
        let delay = backoff.next_delay();
        warn!(feed = %name, delay_ms = delay.as_millis() as u64, "kraken reconnecting");
        sleep(delay).await;
    }
}

async fn stream_books(
    name: &str,
    symbol: &str,
    pair: &str,
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    running: &Arc<AtomicBool>,
    callback: &BookCallback,
    backoff: &mut BackoffPolicy,
) {
    let (mut write, mut read) = stream.split();

    let subscribe = json!({
        "method": "subscribe",
        "params": {
            "channel": "book",
            "symbol": [pair],
            "depth": BOOK_DEPTH,
        }
    });
    if write
        .send(Message::Text(subscribe.to_string()))
        .await
        .is_err()
    {
        warn!(feed = %name, "kraken subscribe failed");
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
                        warn!(feed = %name, %error, "kraken read error");
                        return;
                    }
                    Ok(None) => {
                        warn!(feed = %name, "kraken stream closed");
                        return;
                    }
                    Err(_) => {
                        warn!(feed = %name, "kraken stream stale; forcing reconnect");
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
                        debug!(feed = %name, "kraken sent close");
                        return;
                    }
                    _ => {}
                }
            }
            _ = ping_timer.tick() => {
                let ping = json!({"method": "ping"});
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
    let message: BookMessage = serde_json::from_str(raw).ok()?;
    if message.channel.as_deref() != Some("book") {
        return None;
    }
    let is_snapshot = message.kind.as_deref() == Some("snapshot");
    let mut exchange_timestamp = None;
    for data in &message.data {
        book.apply(data, is_snapshot);
        if let Some(raw_ts) = &data.timestamp {
            exchange_timestamp = raw_ts.parse::<DateTime<Utc>>().ok();
        }
    }

    let (bids, asks) = book.to_levels();
    if bids.is_empty() || asks.is_empty() {
        return None;
    }
    Some(NormalizedOrderBook::new(
        name,
        symbol,
        bids,
        asks,
        exchange_timestamp.unwrap_or_else(Utc::now),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_then_update_maintains_the_map() {
        let mut book = SideMaps::default();
        let snapshot = r#"{
            "channel": "book",
            "type": "snapshot",
            "data": [{
                "symbol": "BTC/USDT",
                "bids": [{"price": 100.0, "qty": 1.0}, {"price": 99.5, "qty": 2.0}],
                "asks": [{"price": 100.5, "qty": 1.5}]
            }]
        }"#;
        let emitted = handle_text("kraken", "BTCUSDT", snapshot, &mut book).unwrap();
        assert_eq!(emitted.best_bid(), Some(100.0));
        assert_eq!(emitted.best_ask(), Some(100.5));

        // Quantity 0 deletes the best bid; a new ask level arrives.
        let update = r#"{
            "channel": "book",
            "type": "update",
            "data": [{
                "symbol": "BTC/USDT",
                "bids": [{"price": 100.0, "qty": 0.0}],
                "asks": [{"price": 100.4, "qty": 0.7}],
                "timestamp": "2026-03-01T12:00:00.000000Z"
            }]
        }"#;
        let emitted = handle_text("kraken", "BTCUSDT", update, &mut book).unwrap();
        assert_eq!(emitted.best_bid(), Some(99.5));
        assert_eq!(emitted.best_ask(), Some(100.4));
        assert_eq!(
            emitted.exchange_timestamp,
            "2026-03-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn non_book_messages_are_ignored() {
        let mut book = SideMaps::default();
        assert!(handle_text("kraken", "BTCUSDT", r#"{"channel":"heartbeat"}"#, &mut book).is_none());
        assert!(handle_text("kraken", "BTCUSDT", r#"{"method":"pong"}"#, &mut book).is_none());
        assert!(handle_text("kraken", "BTCUSDT", "garbage", &mut book).is_none());
    }

    #[test]
    fn one_sided_books_are_withheld() {
        let mut book = SideMaps::default();
        let snapshot = r#"{
            "channel": "book",
            "type": "snapshot",
            "data": [{"symbol": "BTC/USDT", "bids": [{"price": 100.0, "qty": 1.0}], "asks": []}]
        }"#;
        assert!(handle_text("kraken", "BTCUSDT", snapshot, &mut book).is_none());
    }

    #[test]
    fn pair_notation_uses_a_slash() {
        let feed = KrakenDepthFeed::new("kraken", "ETHUSDT", Vec::new());
        assert_eq!(feed.pair(), "ETH/USDT");
    }
}
