//! Arbitrage core: the single-writer engine plus the narrow collaborator
//! seams it accepts.

pub mod engine;

pub use engine::{ArbitrageEngine, EngineSnapshot, WalletView, MAX_METRICS, MAX_OPPORTUNITIES, MAX_TRADES};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Opportunity, SimulatedTrade};

/// Fire-and-forget sink for accepted opportunities and executed trades.
/// Implementations must not block; the engine calls this while holding its
/// state mutex.
pub trait PersistenceSink: Send + Sync {
    fn submit_opportunity(&self, item: &Opportunity);
    fn submit_trade(&self, item: &SimulatedTrade);
}

/// Read-side store the engine falls back to when its in-memory rings are
/// empty. Errors are swallowed by the caller.
#[async_trait]
pub trait HistoricalStore: Send + Sync {
    async fn list_opportunities(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Opportunity>>;

    async fn list_trades(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
    ) -> Result<Vec<SimulatedTrade>>;
}
