//! Uphold ticker feed.
//!
//! Uphold has no public depth stream, so this adapter polls the ticker
//! endpoint on a 1 s cadence and emits a one-level book of fixed synthetic
//! size per side. Samples with missing or crossed quotes are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::models::{NormalizedOrderBook, OrderBookLevel};
use crate::symbol::split_symbol;

use super::{BookCallback, FeedTask, MarketDataFeed};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const FAILURE_PAUSE: Duration = Duration::from_secs(2);
const SYNTHETIC_LEVEL_SIZE: f64 = 100.0;
const TICKER_BASE: &str = "https://api.uphold.com/v0/ticker";

#[derive(Debug, Deserialize)]
struct TickerPayload {
    bid: Option<String>,
    ask: Option<String>,
}

pub struct UpholdTickerFeed {
    name: String,
    symbol: String,
    task: FeedTask,
}

impl UpholdTickerFeed {
    pub fn new(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_ascii_uppercase(),
            task: FeedTask::new(),
        }
    }

    /// "BTCUSDT" -> "BTC-USDT", the pair notation the ticker endpoint uses.
    fn ticker_url(&self) -> String {
        let (base, quote) = split_symbol(&self.symbol);
        format!("{}/{}-{}", TICKER_BASE, base, quote)
    }
}

#[async_trait]
impl MarketDataFeed for UpholdTickerFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn start(&self, callback: BookCallback) {
        let name = self.name.clone();
        let symbol = self.symbol.clone();
        let url = self.ticker_url();
        let running = self.task.running_flag();
        self.task
            .spawn(async move {
                run_loop(name, symbol, url, running, callback).await;
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
    url: String,
    running: Arc<AtomicBool>,
    callback: BookCallback,
) {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            warn!(feed = %name, %error, "uphold http client init failed");
            return;
        }
    };
    info!(feed = %name, url = %url, "uphold ticker polling started");

    while running.load(Ordering::SeqCst) {
        match fetch_ticker(&client, &url).await {
            Ok(payload) => {
                if let Some(book) = normalize(&name, &symbol, &payload) {
                    callback(book);
                } else {
                    debug!(feed = %name, "uphold sample dropped (missing or crossed quote)");
                }
                sleep(POLL_INTERVAL).await;
            }
            Err(error) => {
                warn!(feed = %name, %error, "uphold ticker fetch failed");
                sleep(FAILURE_PAUSE).await;
            }
        }
    }
}

async fn fetch_ticker(client: &reqwest::Client, url: &str) -> anyhow::Result<TickerPayload> {
    let payload = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<TickerPayload>()
        .await?;
    Ok(payload)
}

fn normalize(name: &str, symbol: &str, payload: &TickerPayload) -> Option<NormalizedOrderBook> {
    let bid: f64 = payload.bid.as_deref()?.parse().ok()?;
    let ask: f64 = payload.ask.as_deref()?.parse().ok()?;
    if bid <= 0.0 || ask <= 0.0 || bid >= ask {
        return None;
    }
    Some(NormalizedOrderBook::new(
        name,
        symbol,
        vec![OrderBookLevel::new(bid, SYNTHETIC_LEVEL_SIZE)],
        vec![OrderBookLevel::new(ask, SYNTHETIC_LEVEL_SIZE)],
        Utc::now(),
    ))
}
