//! Market data feeds.
//!
//! One adapter instance per (venue, symbol). Adapters normalize venue
//! payloads into `NormalizedOrderBook` and hand them to a shared callback;
//! they never raise to the engine - transport and parse failures loop into
//! reconnect backoff. Cancellation is cooperative: `stop` flips the running
//! flag, aborts the task and joins it.

pub mod backoff;
pub mod binance;
pub mod bybit;
pub mod kraken;
pub mod simulated;
pub mod uphold;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{AppConfig, FeedKind};
use crate::models::NormalizedOrderBook;

pub use binance::BinanceDepthFeed;
pub use bybit::BybitDepthFeed;
pub use kraken::KrakenDepthFeed;
pub use simulated::SimulatedDepthFeed;
pub use uphold::UpholdTickerFeed;

/// Callback every adapter delivers normalized books through. Must be safe
/// to invoke concurrently from many feed tasks; serialization happens on
/// the engine side.
pub type BookCallback = Arc<dyn Fn(NormalizedOrderBook) + Send + Sync>;

/// Books are truncated to this many levels per side before emission.
pub const MAX_EMITTED_LEVELS: usize = 20;

/// A read going this long without a message forces a reconnect.
pub const STALENESS_BUDGET: Duration = Duration::from_secs(10);

/// WebSocket keepalive cadence and timeout.
pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// Long-lived producer bound to one (venue, symbol).
#[async_trait]
pub trait MarketDataFeed: Send + Sync {
    fn name(&self) -> &str;
    fn symbol(&self) -> &str;

    /// Begin ingesting; idempotent while a task is already running.
    async fn start(&self, callback: BookCallback);

    /// Request termination and wait for the task to end; idempotent.
    async fn stop(&self);
}

/// Shared task plumbing: running flag plus the join handle of the
/// ingestion loop.
pub(crate) struct FeedTask {
    running: Arc<AtomicBool>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FeedTask {
    pub(crate) fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub(crate) fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Spawn the ingestion future unless one is already live.
    pub(crate) async fn spawn(&self, future: impl std::future::Future<Output = ()> + Send + 'static) {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        *handle = Some(tokio::spawn(future));
    }

    pub(crate) async fn stop(&self, name: &str) {
        self.running.store(false, Ordering::SeqCst);
        let mut handle = self.handle.lock().await;
        if let Some(task) = handle.take() {
            task.abort();
            let _ = task.await;
            debug!(feed = name, "feed task stopped");
        }
    }
}

/// Parse a ["price", "qty"] pair as emitted by Binance/Bybit style feeds.
pub(crate) fn parse_level(price: &str, quantity: &str) -> Option<(f64, f64)> {
    let price: f64 = price.parse().ok()?;
    let quantity: f64 = quantity.parse().ok()?;
    Some((price, quantity))
}

/// Build adapter instances for every enabled feed on every active symbol.
pub fn build_feeds(config: &AppConfig) -> Vec<Arc<dyn MarketDataFeed>> {
    let mut feeds: Vec<Arc<dyn MarketDataFeed>> = Vec::new();
    for symbol in config.active_symbols() {
        for feed_cfg in config.enabled_feeds() {
            match feed_cfg.kind {
                FeedKind::BinanceWs => feeds.push(Arc::new(BinanceDepthFeed::new(
                    &feed_cfg.name,
                    &symbol,
                    feed_cfg.urls.clone(),
                ))),
                FeedKind::KrakenWs => feeds.push(Arc::new(KrakenDepthFeed::new(
                    &feed_cfg.name,
                    &symbol,
                    feed_cfg.urls.clone(),
                ))),
                FeedKind::BybitWs => feeds.push(Arc::new(BybitDepthFeed::new(
                    &feed_cfg.name,
                    &symbol,
                    feed_cfg.urls.clone(),
                ))),
                FeedKind::UpholdTicker => {
                    feeds.push(Arc::new(UpholdTickerFeed::new(&feed_cfg.name, &symbol)))
                }
                FeedKind::Simulated => feeds.push(Arc::new(SimulatedDepthFeed::new(
                    &feed_cfg.name,
                    &symbol,
                    feed_cfg.price_offset,
                    feed_cfg.volatility,
                    feed_cfg.depth_levels,
                ))),
            }
        }
    }
    feeds
}
