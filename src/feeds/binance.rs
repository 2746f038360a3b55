//! Binance depth feed.
//!
//! Subscribes to the partial book stream (`<symbol>@depth20@100ms`), which
//! sends a full top-20 snapshot per message, so each payload replaces the
//! book outright.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::models::{NormalizedOrderBook, OrderBookLevel};

use super::backoff::{BackoffPolicy, EndpointRotator};
use super::{parse_level, BookCallback, FeedTask, MarketDataFeed, MAX_EMITTED_LEVELS, PING_INTERVAL, STALENESS_BUDGET};

const DEFAULT_ENDPOINTS: &[&str] = &[
    "wss://stream.binance.com:9443/ws/{symbol}@depth20@100ms",
    "wss://data-stream.binance.vision/ws/{symbol}@depth20@100ms",
];

/// Partial depth payload. The stream omits the event-time field on some
/// variants, hence the Option.
#[derive(Debug, Deserialize)]
struct DepthPayload {
    #[serde(default)]
    bids: Vec<(String, String)>,
    #[serde(default)]
    asks: Vec<(String, String)>,
    #[serde(rename = "E")]
    event_time_ms: Option<i64>,
}

pub struct BinanceDepthFeed {
    name: String,
    symbol: String,
    endpoints: Vec<String>,
    task: FeedTask,
}

impl BinanceDepthFeed {
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
impl MarketDataFeed for BinanceDepthFeed {
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
        let url = rotator
            .current()
            .replace("{symbol}", &symbol.to_ascii_lowercase());
        match connect_async(&url).await {
            Ok((stream, _)) => {
                info!(feed = %name, url = %url, "binance depth stream connected");
                stream_books(&name, &symbol, stream, &running, &callback, &mut backoff).await;
            }
            Err(error) => {
                warn!(feed = %name, url = %url, %error, "binance connect failed");
            }
        }
        if !running.load(Ordering::SeqCst) {
            break;
        }
        rotator.rotate();
        let delay = backoff.next_delay();
        warn!(feed = %name, delay_ms = delay.as_millis() as u64, "binance reconnecting");
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
                        warn!(feed = %name, %error, "binance read error");
                        return;
                    }
                    Ok(None) => {
                        warn!(feed = %name, "binance stream closed");
                        return;
                    }
                    Err(_) => {
                        warn!(feed = %name, "binance stream stale; forcing reconnect");
                        return;
                    }
                };
                match message {
                    Message::Text(text) => {
                        backoff.reset();
                        if let Some(book) = normalize(name, symbol, &text) {
                            callback(book);
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => {
                        debug!(feed = %name, "binance sent close");
                        return;
                    }
                    _ => {}
                }
            }
            _ = ping_timer.tick() => {
                if write.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn normalize(name: &str, symbol: &str, raw: &str) -> Option<NormalizedOrderBook> {
    let payload: DepthPayload = match serde_json::from_str(raw) {
        Ok(payload) => payload,
        Err(_) => return None,
    };

    let mut bids: Vec<OrderBookLevel> = payload
        .bids
        .iter()
        .filter_map(|(price, quantity)| parse_level(price, quantity))
        .filter(|(_, quantity)| *quantity > 0.0)
        .map(|(price, quantity)| OrderBookLevel::new(price, quantity))
        .collect();
    let mut asks: Vec<OrderBookLevel> = payload
        .asks
        .iter()
        .filter_map(|(price, quantity)| parse_level(price, quantity))
        .filter(|(_, quantity)| *quantity > 0.0)
        .map(|(price, quantity)| OrderBookLevel::new(price, quantity))
        .collect();

    if bids.is_empty() || asks.is_empty() {
        return None;
    }
    bids.truncate(MAX_EMITTED_LEVELS);
    asks.truncate(MAX_EMITTED_LEVELS);

    let exchange_timestamp: DateTime<Utc> = payload
        .event_time_ms
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
    fn normalizes_a_depth_snapshot() {
        let raw = r#"{
            "lastUpdateId": 160,
            "bids": [["100.10", "2.5"], ["100.00", "0"], ["99.90", "1.0"]],
            "asks": [["100.20", "1.5"], ["100.30", "3.0"]],
            "E": 1700000000000
        }"#;
        let book = normalize("binance", "BTCUSDT", raw).unwrap();
        assert_eq!(book.exchange, "binance");
        // Zero-quantity level dropped.
        assert_eq!(book.bids.len(), 2);
        assert_eq!(book.best_bid(), Some(100.10));
        assert_eq!(book.best_ask(), Some(100.20));
        assert_eq!(book.exchange_timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn one_sided_payloads_are_dropped() {
        let raw = r#"{"bids": [["100.10", "2.5"]], "asks": []}"#;
        assert!(normalize("binance", "BTCUSDT", raw).is_none());
        assert!(normalize("binance", "BTCUSDT", "not json").is_none());
    }

    #[test]
    fn depth_is_truncated_to_twenty_levels() {
        let bids: Vec<String> = (0..30)
            .map(|i| format!("[\"{}\", \"1.0\"]", 100.0 - i as f64 * 0.1))
            .collect();
        let raw = format!(
            r#"{{"bids": [{}], "asks": [["101.0", "1.0"]]}}"#,
            bids.join(",")
        );
        let book = normalize("binance", "BTCUSDT", &raw).unwrap();
        assert_eq!(book.bids.len(), MAX_EMITTED_LEVELS);
    }

    #[test]
    fn missing_event_time_falls_back_to_local_clock() {
        let raw = r#"{"bids": [["100.1", "1"]], "asks": [["100.2", "1"]]}"#;
        let book = normalize("binance", "BTCUSDT", raw).unwrap();
        let age = Utc::now() - book.exchange_timestamp;
        assert!(age.num_seconds() < 5);
    }
}
