//! Simulated depth feed.
//!
//! Drives a reference price on a bounded random walk and fabricates depth
//! around it every 200 ms. Offsets and volatility come from configuration,
//! so two simulated venues can be biased against each other to produce
//! spreads on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::time::sleep;
use tracing::info;

use crate::models::{NormalizedOrderBook, OrderBookLevel};

use super::{BookCallback, FeedTask, MarketDataFeed};

const TICK_INTERVAL: Duration = Duration::from_millis(200);
const BASE_REFERENCE_PRICE: f64 = 50_000.0;
const PRICE_FLOOR: f64 = 1_000.0;

pub struct SimulatedDepthFeed {
    name: String,
    symbol: String,
    price_offset: f64,
    volatility: f64,
    depth_levels: usize,
    task: FeedTask,
}

impl SimulatedDepthFeed {
    pub fn new(
        name: &str,
        symbol: &str,
        price_offset: f64,
        volatility: f64,
        depth_levels: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_ascii_uppercase(),
            price_offset,
            volatility,
            depth_levels: depth_levels.max(1),
            task: FeedTask::new(),
        }
    }
}

#[async_trait]
impl MarketDataFeed for SimulatedDepthFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn start(&self, callback: BookCallback) {
        let name = self.name.clone();
        let symbol = self.symbol.clone();
        let volatility = self.volatility;
        let depth_levels = self.depth_levels;
        let reference = BASE_REFERENCE_PRICE + self.price_offset;
        let running = self.task.running_flag();
        self.task
            .spawn(async move {
                run_loop(name, symbol, reference, volatility, depth_levels, running, callback)
                    .await;
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
    mut reference_price: f64,
    volatility: f64,
    depth_levels: usize,
    running: Arc<AtomicBool>,
    callback: BookCallback,
) {
    info!(feed = %name, symbol = %symbol, "simulated feed started");
    while running.load(Ordering::SeqCst) {
        let book = {
            let mut rng = rand::thread_rng();
            let drift = rng.gen_range(-volatility..=volatility);
            reference_price = (reference_price + drift).max(PRICE_FLOOR);
            synthesize_book(&name, &symbol, reference_price, depth_levels, &mut rng)
        };
        callback(book);
        sleep(TICK_INTERVAL).await;
    }
}

fn synthesize_book(
    name: &str,
    symbol: &str,
    reference_price: f64,
    depth_levels: usize,
    rng: &mut impl Rng,
) -> NormalizedOrderBook {
    let spread = rng.gen_range(0.5..=5.0);
    let best_bid = reference_price - spread / 2.0;
    let best_ask = reference_price + spread / 2.0;

    let mut bids = Vec::with_capacity(depth_levels);
    let mut asks = Vec::with_capacity(depth_levels);
    let mut step = 0.0;
    for level_index in 0..depth_levels {
        if level_index > 0 {
            step += rng.gen_range(0.2..=1.2);
        }
        let bid_qty = round5(rng.gen_range(0.02..=0.6));
        let ask_qty = round5(rng.gen_range(0.02..=0.6));
        bids.push(OrderBookLevel::new(round2(best_bid - step), bid_qty));
        asks.push(OrderBookLevel::new(round2(best_ask + step), ask_qty));
    }

    NormalizedOrderBook::new(name, symbol, bids, asks, Utc::now())
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}
