//! Core market data and evaluation record types.
//!
//! Everything here is serialized to the UI and to sqlite, so the field
//! names are part of the external contract. Timestamps are UTC and
//! serialize as RFC 3339 via chrono's serde support.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One price level of an order book side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub quantity: f64,
}

impl OrderBookLevel {
    pub fn new(price: f64, quantity: f64) -> Self {
        Self { price, quantity }
    }
}

/// Venue-agnostic depth snapshot.
///
/// Invariants: bids descending by price, asks ascending, no zero-quantity
/// levels. `exchange_timestamp` is the venue-reported event time when the
/// venue sends one, else the local receive time; `received_timestamp` is
/// always the local clock at normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedOrderBook {
    pub exchange: String,
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub exchange_timestamp: DateTime<Utc>,
    pub received_timestamp: DateTime<Utc>,
}

impl NormalizedOrderBook {
    pub fn new(
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        bids: Vec<OrderBookLevel>,
        asks: Vec<OrderBookLevel>,
        exchange_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            symbol: symbol.into(),
            bids,
            asks,
            exchange_timestamp,
            received_timestamp: Utc::now(),
        }
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|level| level.price)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|level| level.price)
    }
}

/// Outcome class of one pair evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    Accepted,
    Discarded,
    NoFunds,
    InsufficientLiquidity,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Discarded => "discarded",
            Self::NoFunds => "no_funds",
            Self::InsufficientLiquidity => "insufficient_liquidity",
        }
    }

    pub fn from_str_lossy(raw: &str) -> Self {
        match raw {
            "accepted" => Self::Accepted,
            "no_funds" => Self::NoFunds,
            "insufficient_liquidity" => Self::InsufficientLiquidity,
            _ => Self::Discarded,
        }
    }
}

/// Immutable record of one directed-pair evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub timestamp: DateTime<Utc>,
    pub status: OpportunityStatus,
    pub reason: String,
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub trade_size: f64,
    pub gross_spread_pct: f64,
    pub net_spread_pct: f64,
    pub expected_profit_usd: f64,
    pub latency_ms: f64,
    pub buy_vwap: f64,
    pub sell_vwap: f64,
    pub buy_book_updated_at: Option<DateTime<Utc>>,
    pub sell_book_updated_at: Option<DateTime<Utc>>,
}

/// Immutable record of one simulated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedTrade {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub buy_exchange: String,
    pub sell_exchange: String,
    pub size: f64,
    pub pnl_usd: f64,
    pub latency_ms: f64,
}

/// One metrics point per evaluation, kept in a bounded ring for the
/// spread time-series the UI charts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: DateTime<Utc>,
    pub spread_gross_pct: f64,
    pub spread_net_pct: f64,
    pub expected_profit_usd: f64,
    pub status: OpportunityStatus,
    pub reason: String,
    pub pair: String,
    pub trigger_exchange: String,
    pub latency_ms: f64,
}
