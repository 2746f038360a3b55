//! Multi-venue crypto arbitrage simulator backend.
//!
//! Data flows one way: feeds -> engine -> persistence, with a read path
//! from the engine (and the store) to the HTTP/WebSocket façade.

pub mod api;
pub mod arbitrage;
pub mod config;
pub mod db;
pub mod feeds;
pub mod inventory;
pub mod models;
pub mod persistence;
pub mod service;
pub mod symbol;

pub use arbitrage::{ArbitrageEngine, EngineSnapshot, HistoricalStore, PersistenceSink};
pub use config::{AppConfig, FeedConfig, FeedKind};
pub use models::{
    MetricsSample, NormalizedOrderBook, Opportunity, OpportunityStatus, OrderBookLevel,
    SimulatedTrade,
};
pub use service::ArbitrageService;
