//! Application configuration.
//!
//! Loaded from `config.json` next to the binary's working directory; a
//! missing file is not an error and yields the defaults below. Parse
//! failures surface at startup.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Feed adapter kind, one per supported venue protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    BinanceWs,
    KrakenWs,
    BybitWs,
    UpholdTicker,
    Simulated,
}

fn default_true() -> bool {
    true
}

fn default_volatility() -> f64 {
    2.0
}

fn default_depth_levels() -> usize {
    20
}

/// One venue feed: its adapter kind, linear fee rate and simulator knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    pub kind: FeedKind,
    pub fee: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub price_offset: f64,
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    #[serde(default = "default_depth_levels")]
    pub depth_levels: usize,
    /// Optional endpoint override list; adapters rotate through these on
    /// reconnect when more than one is given.
    #[serde(default)]
    pub urls: Vec<String>,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_trade_size() -> f64 {
    0.05
}

fn default_transfer_cost_usd() -> f64 {
    1.0
}

fn default_starting_balance_usd() -> f64 {
    10_000.0
}

fn default_opportunity_threshold_usd() -> f64 {
    0.01
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Optional multi-symbol set; when non-empty it supersedes `symbol`
    /// for feed construction.
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default = "default_trade_size")]
    pub trade_size: f64,
    /// Flat fallback transfer cost, used only when the per-asset model
    /// cannot price a move.
    #[serde(default = "default_transfer_cost_usd")]
    pub transfer_cost_usd: f64,
    #[serde(default = "default_starting_balance_usd")]
    pub starting_balance_usd: f64,
    #[serde(default = "default_true")]
    pub auto_simulate_execution: bool,
    #[serde(default = "default_opportunity_threshold_usd")]
    pub opportunity_threshold_usd: f64,
    /// Accepted for compatibility with older config documents; the engine
    /// override set through the API is authoritative.
    #[serde(default)]
    pub simulation_volume_usd: Option<f64>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            symbols: Vec::new(),
            trade_size: default_trade_size(),
            transfer_cost_usd: default_transfer_cost_usd(),
            starting_balance_usd: default_starting_balance_usd(),
            auto_simulate_execution: true,
            opportunity_threshold_usd: default_opportunity_threshold_usd(),
            simulation_volume_usd: None,
            feeds: vec![
                FeedConfig {
                    name: "binance".to_string(),
                    kind: FeedKind::BinanceWs,
                    fee: 0.001,
                    enabled: true,
                    price_offset: 0.0,
                    volatility: default_volatility(),
                    depth_levels: default_depth_levels(),
                    urls: Vec::new(),
                },
                FeedConfig {
                    name: "sim_exchange".to_string(),
                    kind: FeedKind::Simulated,
                    fee: 0.0015,
                    enabled: true,
                    price_offset: 220.0,
                    volatility: 3.5,
                    depth_levels: 20,
                    urls: Vec::new(),
                },
                FeedConfig {
                    name: "sim_exchange_b".to_string(),
                    kind: FeedKind::Simulated,
                    fee: 0.0012,
                    enabled: true,
                    price_offset: -220.0,
                    volatility: 3.0,
                    depth_levels: 20,
                    urls: Vec::new(),
                },
            ],
        }
    }
}

impl AppConfig {
    /// Load from `<root>/config.json`, falling back to defaults when the
    /// file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read config at {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parse config at {}", path.display()))?;
        Ok(config)
    }

    /// The symbols feeds should be bound to: `symbols` when present,
    /// else the single `symbol`.
    pub fn active_symbols(&self) -> Vec<String> {
        if self.symbols.is_empty() {
            vec![self.symbol.to_ascii_uppercase()]
        } else {
            self.symbols.iter().map(|s| s.to_ascii_uppercase()).collect()
        }
    }

    pub fn enabled_feeds(&self) -> impl Iterator<Item = &FeedConfig> {
        self.feeds.iter().filter(|feed| feed.enabled)
    }

    pub fn fee_for(&self, venue: &str) -> f64 {
        self.feeds
            .iter()
            .find(|feed| feed.name == venue)
            .map(|feed| feed.fee)
            .unwrap_or(0.0)
    }
}

/// Parse `CORS_ORIGINS` (comma list). Empty/absent falls back to the
/// local Vite dev-server origins the UI runs on.
pub fn parse_cors_origins(raw: Option<&str>) -> Vec<String> {
    match raw {
        Some(value) if !value.trim().is_empty() => value
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect(),
        _ => vec![
            "http://localhost:5173".to_string(),
            "http://127.0.0.1:5173".to_string(),
        ],
    }
}
