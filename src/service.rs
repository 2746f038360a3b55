//! Service wiring: configuration, store, persistence queue, engine and
//! feed lifecycle in one place.
//!
//! Reconfiguration is a drain-and-rebuild: the engine mutates its own
//! state (symbol set, fee map, dropped books) and this layer stops every
//! feed task, rebuilds adapters from the engine's live configuration and
//! restarts them.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::arbitrage::{ArbitrageEngine, EngineSnapshot, HistoricalStore, PersistenceSink};
use crate::config::AppConfig;
use crate::db::Database;
use crate::feeds::{build_feeds, BookCallback, MarketDataFeed};
use crate::inventory::RebalanceReport;
use crate::persistence::PersistenceManager;

pub struct ArbitrageService {
    pub engine: Arc<ArbitrageEngine>,
    pub persistence: Arc<PersistenceManager>,
    pub db: Arc<Database>,
    feeds: tokio::sync::Mutex<Vec<Arc<dyn MarketDataFeed>>>,
    started: AtomicBool,
}

impl ArbitrageService {
    pub fn new(root: &Path) -> Result<Arc<Self>> {
        let config = AppConfig::load(root)?;
        let db = Arc::new(Database::from_env(root)?);
        let persistence = Arc::new(PersistenceManager::new(db.clone()));
        let engine = Arc::new(ArbitrageEngine::new(
            config,
            Some(persistence.clone() as Arc<dyn PersistenceSink>),
            Some(db.clone() as Arc<dyn HistoricalStore>),
        ));
        Ok(Arc::new(Self {
            engine,
            persistence,
            db,
            feeds: tokio::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }))
    }

    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.persistence.start().await;
        self.restart_feeds().await;
        info!("arbitrage service started");
    }

    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.stop_feeds().await;
        self.persistence.stop().await;
        info!("arbitrage service stopped");
    }

    /// Switch the traded symbol: drop old books, rebuild and restart the
    /// feed set bound to the new symbol. Inventory is retained.
    pub async fn set_symbol(&self, symbol: &str) -> EngineSnapshot {
        self.engine.set_symbol(symbol);
        if self.started.load(Ordering::SeqCst) {
            self.restart_feeds().await;
        }
        self.engine.snapshot()
    }

    /// Enable or disable one venue and restart the feed set without it.
    pub async fn set_exchange_enabled(&self, venue: &str, enabled: bool) -> EngineSnapshot {
        self.engine.set_exchange_enabled(venue, enabled);
        if self.started.load(Ordering::SeqCst) {
            self.restart_feeds().await;
        }
        self.engine.snapshot()
    }

    /// Takes effect on the next update; no feed restart needed.
    pub fn set_simulation_volume_usd(&self, volume: Option<f64>) -> EngineSnapshot {
        self.engine.set_simulation_volume_usd(volume);
        self.engine.snapshot()
    }

    pub fn rebalance_quotes(&self) -> RebalanceReport {
        self.engine.rebalance_quotes()
    }

    async fn stop_feeds(&self) {
        let feeds: Vec<Arc<dyn MarketDataFeed>> = {
            let mut guard = self.feeds.lock().await;
            guard.drain(..).collect()
        };
        for feed in feeds {
            feed.stop().await;
        }
    }

    async fn restart_feeds(&self) {
        self.stop_feeds().await;

        let config = self.engine.config_snapshot();
        let fresh = build_feeds(&config);

        let engine = self.engine.clone();
        let callback: BookCallback = Arc::new(move |book| engine.on_order_book(book));

        for feed in &fresh {
            feed.start(callback.clone()).await;
        }
        info!(feeds = fresh.len(), "feed adapters running");

        let mut guard = self.feeds.lock().await;
        *guard = fresh;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeedConfig, FeedKind};
    use crate::models::OpportunityStatus;

    fn sim_only_config() -> AppConfig {
        AppConfig {
            symbol: "BTCUSDT".to_string(),
            auto_simulate_execution: false,
            feeds: vec![
                FeedConfig {
                    name: "sim_a".to_string(),
                    kind: FeedKind::Simulated,
                    fee: 0.001,
                    enabled: true,
                    price_offset: 300.0,
                    volatility: 2.0,
                    depth_levels: 10,
                    urls: Vec::new(),
                },
                FeedConfig {
                    name: "sim_b".to_string(),
                    kind: FeedKind::Simulated,
                    fee: 0.001,
                    enabled: true,
                    price_offset: -300.0,
                    volatility: 2.0,
                    depth_levels: 10,
                    urls: Vec::new(),
                },
            ],
            ..AppConfig::default()
        }
    }

    #[tokio::test]
    async fn simulated_feeds_drive_the_engine_end_to_end() {
        let engine = Arc::new(ArbitrageEngine::new(sim_only_config(), None, None));
        let feeds = build_feeds(&engine.config_snapshot());
        assert_eq!(feeds.len(), 2);

        let callback: BookCallback = {
            let engine = engine.clone();
            Arc::new(move |book| engine.on_order_book(book))
        };
        for feed in &feeds {
            feed.start(callback.clone()).await;
        }
        // A few 200 ms ticks from both venues.
        tokio::time::sleep(std::time::Duration::from_millis(900)).await;
        for feed in &feeds {
            feed.stop().await;
        }

        let snapshot = engine.snapshot();
        assert_eq!(snapshot.active_exchanges.len(), 2);
        let series = engine.spread_series(600);
        assert!(!series.is_empty());
        // Every evaluation carries a classified status.
        assert!(series.iter().all(|sample| matches!(
            sample.status,
            OpportunityStatus::Accepted
                | OpportunityStatus::Discarded
                | OpportunityStatus::NoFunds
                | OpportunityStatus::InsufficientLiquidity
        )));
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_prompt() {
        let engine = Arc::new(ArbitrageEngine::new(sim_only_config(), None, None));
        let feeds = build_feeds(&engine.config_snapshot());
        let callback: BookCallback = {
            let engine = engine.clone();
            Arc::new(move |book| engine.on_order_book(book))
        };
        for feed in &feeds {
            feed.start(callback.clone()).await;
            feed.start(callback.clone()).await; // idempotent
        }
        for feed in &feeds {
            feed.stop().await;
            feed.stop().await; // idempotent
        }
    }
}
