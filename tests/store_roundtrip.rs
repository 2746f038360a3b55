//! Relational store round-trips and the engine's read-through fallback.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::tempdir;

use arbwatch_backend::arbitrage::{ArbitrageEngine, HistoricalStore, PersistenceSink};
use arbwatch_backend::config::AppConfig;
use arbwatch_backend::db::Database;
use arbwatch_backend::models::{Opportunity, OpportunityStatus, SimulatedTrade};
use arbwatch_backend::persistence::PersistenceManager;

fn ts(raw: &str) -> DateTime<Utc> {
    raw.parse().unwrap()
}

fn opportunity(symbol: &str, stamp: &str, profit: f64) -> Opportunity {
    Opportunity {
        timestamp: ts(stamp),
        status: OpportunityStatus::Accepted,
        reason: "profitable".to_string(),
        symbol: symbol.to_string(),
        buy_exchange: "binance".to_string(),
        sell_exchange: "kraken".to_string(),
        trade_size: 0.05,
        gross_spread_pct: 1.0,
        net_spread_pct: 0.8,
        expected_profit_usd: profit,
        latency_ms: 4.5,
        buy_vwap: 100.0,
        sell_vwap: 101.0,
        buy_book_updated_at: None,
        sell_book_updated_at: None,
    }
}

fn trade(symbol: &str, stamp: &str) -> SimulatedTrade {
    SimulatedTrade {
        timestamp: ts(stamp),
        symbol: symbol.to_string(),
        buy_exchange: "binance".to_string(),
        sell_exchange: "kraken".to_string(),
        size: 0.05,
        pnl_usd: 0.42,
        latency_ms: 3.0,
    }
}

#[tokio::test]
async fn opportunities_round_trip_through_sqlite() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db").to_str().unwrap()).unwrap();

    let stored = opportunity("BTCUSDT", "2026-03-01T12:00:00Z", 0.7);
    db.insert_opportunity(&stored).await.unwrap();

    let rows = db.query_opportunities(10, None).await.unwrap();
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.timestamp, stored.timestamp);
    assert_eq!(row.status, OpportunityStatus::Accepted);
    assert_eq!(row.reason, stored.reason);
    assert_eq!(row.symbol, stored.symbol);
    assert_eq!(row.buy_exchange, stored.buy_exchange);
    assert_eq!(row.sell_exchange, stored.sell_exchange);
    assert!((row.expected_profit_usd - stored.expected_profit_usd).abs() < 1e-12);
    assert!((row.buy_vwap - stored.buy_vwap).abs() < 1e-12);
}

#[tokio::test]
async fn trades_round_trip_through_sqlite() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db").to_str().unwrap()).unwrap();

    let stored = trade("ETHUSDT", "2026-03-01T12:00:00Z");
    db.insert_trade(&stored).await.unwrap();

    let rows = db.query_trades(10, None).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].timestamp, stored.timestamp);
    assert_eq!(rows[0].symbol, stored.symbol);
    assert!((rows[0].pnl_usd - stored.pnl_usd).abs() < 1e-12);
}

#[tokio::test]
async fn queries_filter_by_symbol_and_return_oldest_first() {
    let dir = tempdir().unwrap();
    let db = Database::open(dir.path().join("test.db").to_str().unwrap()).unwrap();

    db.insert_opportunity(&opportunity("BTCUSDT", "2026-03-01T12:00:00Z", 0.1))
        .await
        .unwrap();
    db.insert_opportunity(&opportunity("ETHUSDT", "2026-03-01T12:00:01Z", 0.2))
        .await
        .unwrap();
    db.insert_opportunity(&opportunity("BTCUSDT", "2026-03-01T12:00:02Z", 0.3))
        .await
        .unwrap();

    let btc_only = db
        .query_opportunities(10, Some(&["btcusdt".to_string()]))
        .await
        .unwrap();
    assert_eq!(btc_only.len(), 2);
    assert!(btc_only.iter().all(|o| o.symbol == "BTCUSDT"));
    // Oldest first.
    assert!(btc_only[0].timestamp < btc_only[1].timestamp);

    // Limit keeps the most recent rows.
    let latest = db.query_opportunities(1, None).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert!((latest[0].expected_profit_usd - 0.3).abs() < 1e-12);
}

#[tokio::test]
async fn persistence_pipeline_drains_to_the_store() {
    let dir = tempdir().unwrap();
    let db = Arc::new(Database::open(dir.path().join("test.db").to_str().unwrap()).unwrap());
    let manager = PersistenceManager::new(db.clone());
    manager.start().await;

    manager.submit_opportunity(&opportunity("BTCUSDT", "2026-03-01T12:00:00Z", 0.5));
    manager.submit_trade(&trade("BTCUSDT", "2026-03-01T12:00:00Z"));

    // Sentinel shutdown waits for the worker to drain the queue.
    manager.stop().await;

    assert_eq!(db.query_opportunities(10, None).await.unwrap().len(), 1);
    assert_eq!(db.query_trades(10, None).await.unwrap().len(), 1);
}

struct FailingStore;

#[async_trait]
impl HistoricalStore for FailingStore {
    async fn list_opportunities(
        &self,
        _limit: usize,
        _symbols: Option<&[String]>,
    ) -> Result<Vec<Opportunity>> {
        Err(anyhow!("store offline"))
    }

    async fn list_trades(
        &self,
        _limit: usize,
        _symbols: Option<&[String]>,
    ) -> Result<Vec<SimulatedTrade>> {
        Err(anyhow!("store offline"))
    }
}

#[tokio::test]
async fn engine_reads_through_to_the_store_when_rings_are_empty() {
    let dir = tempdir().unwrap();
    let db = Arc::new(Database::open(dir.path().join("test.db").to_str().unwrap()).unwrap());
    db.insert_opportunity(&opportunity("BTCUSDT", "2026-03-01T12:00:00Z", 0.9))
        .await
        .unwrap();
    db.insert_trade(&trade("BTCUSDT", "2026-03-01T12:00:00Z"))
        .await
        .unwrap();

    let engine = ArbitrageEngine::new(
        AppConfig::default(),
        None,
        Some(db.clone() as Arc<dyn HistoricalStore>),
    );
    let items = engine.list_opportunities(10, None, None).await;
    assert_eq!(items.len(), 1);
    assert!((items[0].expected_profit_usd - 0.9).abs() < 1e-12);
    assert_eq!(engine.list_trades(10, None).await.len(), 1);
}

#[tokio::test]
async fn store_failures_degrade_to_empty_listings() {
    let engine = ArbitrageEngine::new(
        AppConfig::default(),
        None,
        Some(Arc::new(FailingStore) as Arc<dyn HistoricalStore>),
    );
    assert!(engine.list_opportunities(10, None, None).await.is_empty());
    assert!(engine.list_trades(10, None).await.is_empty());
}
