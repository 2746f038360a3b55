//! sqlite-backed historical store for opportunities and trades.
//!
//! One connection behind an async mutex, WAL mode, schema created at open.
//! `DATABASE_URL` selects the file (a plain path or a `sqlite://` URL);
//! absent, the store lives under `data/` next to the process.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection};
use tracing::info;

use crate::arbitrage::HistoricalStore;
use crate::models::{Opportunity, OpportunityStatus, SimulatedTrade};

/// Query limits are clamped to this many rows.
pub const MAX_QUERY_LIMIT: usize = 5_000;

const DEFAULT_DB_FILE: &str = "arbwatch.db";

#[derive(Clone)]
pub struct Database {
    conn: Arc<tokio::sync::Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open sqlite at {path}"))?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS opportunities (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                reason TEXT NOT NULL,
                symbol TEXT NOT NULL,
                buy_exchange TEXT NOT NULL,
                sell_exchange TEXT NOT NULL,
                trade_size REAL NOT NULL,
                gross_spread_pct REAL NOT NULL,
                net_spread_pct REAL NOT NULL,
                expected_profit_usd REAL NOT NULL,
                latency_ms REAL NOT NULL,
                buy_vwap REAL NOT NULL,
                sell_vwap REAL NOT NULL
            )",
            [],
        )?;
        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_opportunities_ts ON opportunities(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_opportunities_status ON opportunities(status)",
            "CREATE INDEX IF NOT EXISTS idx_opportunities_symbol ON opportunities(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_opportunities_buy ON opportunities(buy_exchange)",
            "CREATE INDEX IF NOT EXISTS idx_opportunities_sell ON opportunities(sell_exchange)",
        ] {
            conn.execute(ddl, [])?;
        }

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                symbol TEXT NOT NULL,
                buy_exchange TEXT NOT NULL,
                sell_exchange TEXT NOT NULL,
                size REAL NOT NULL,
                pnl_usd REAL NOT NULL,
                latency_ms REAL NOT NULL
            )",
            [],
        )?;
        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_trades_ts ON trades(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_trades_symbol ON trades(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_trades_buy ON trades(buy_exchange)",
            "CREATE INDEX IF NOT EXISTS idx_trades_sell ON trades(sell_exchange)",
        ] {
            conn.execute(ddl, [])?;
        }

        Ok(Self {
            conn: Arc::new(tokio::sync::Mutex::new(conn)),
        })
    }

    /// Resolve the store location from `DATABASE_URL`, defaulting to a
    /// file under `<root>/data/`.
    pub fn from_env(root: &Path) -> Result<Self> {
        let path = match std::env::var("DATABASE_URL") {
            Ok(url) if !url.trim().is_empty() => {
                let trimmed = url.trim();
                trimmed
                    .strip_prefix("sqlite://")
                    .or_else(|| trimmed.strip_prefix("sqlite:"))
                    .unwrap_or(trimmed)
                    .to_string()
            }
            _ => {
                let data_dir = root.join("data");
                std::fs::create_dir_all(&data_dir)
                    .with_context(|| format!("create data dir {}", data_dir.display()))?;
                data_dir.join(DEFAULT_DB_FILE).to_string_lossy().into_owned()
            }
        };
        info!(path = %path, "database resolved");
        Self::open(&path)
    }

    pub async fn insert_opportunity(&self, item: &Opportunity) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO opportunities (
                timestamp, status, reason, symbol, buy_exchange, sell_exchange,
                trade_size, gross_spread_pct, net_spread_pct, expected_profit_usd,
                latency_ms, buy_vwap, sell_vwap
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                item.timestamp.to_rfc3339(),
                item.status.as_str(),
                item.reason,
                item.symbol,
                item.buy_exchange,
                item.sell_exchange,
                item.trade_size,
                item.gross_spread_pct,
                item.net_spread_pct,
                item.expected_profit_usd,
                item.latency_ms,
                item.buy_vwap,
                item.sell_vwap,
            ],
        )
        .context("insert opportunity")?;
        Ok(())
    }

    pub async fn insert_trade(&self, item: &SimulatedTrade) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO trades (
                timestamp, symbol, buy_exchange, sell_exchange, size, pnl_usd, latency_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                item.timestamp.to_rfc3339(),
                item.symbol,
                item.buy_exchange,
                item.sell_exchange,
                item.size,
                item.pnl_usd,
                item.latency_ms,
            ],
        )
        .context("insert trade")?;
        Ok(())
    }

    /// Most recent rows, oldest-first, optionally filtered by symbol.
    pub async fn query_opportunities(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Opportunity>> {
        let limit = limit.clamp(1, MAX_QUERY_LIMIT);
        let wanted = upper_symbols(symbols);

        let conn = self.conn.lock().await;
        let (sql, bind) = select_sql(
            "SELECT timestamp, status, reason, symbol, buy_exchange, sell_exchange,
                    trade_size, gross_spread_pct, net_spread_pct, expected_profit_usd,
                    latency_ms, buy_vwap, sell_vwap
             FROM opportunities",
            &wanted,
            limit,
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows: Vec<Opportunity> = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                Ok(Opportunity {
                    timestamp: parse_timestamp(row.get::<_, String>(0)?),
                    status: OpportunityStatus::from_str_lossy(&row.get::<_, String>(1)?),
                    reason: row.get(2)?,
                    symbol: row.get(3)?,
                    buy_exchange: row.get(4)?,
                    sell_exchange: row.get(5)?,
                    trade_size: row.get(6)?,
                    gross_spread_pct: row.get(7)?,
                    net_spread_pct: row.get(8)?,
                    expected_profit_usd: row.get(9)?,
                    latency_ms: row.get(10)?,
                    buy_vwap: row.get(11)?,
                    sell_vwap: row.get(12)?,
                    buy_book_updated_at: None,
                    sell_book_updated_at: None,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        rows.reverse();
        Ok(rows)
    }

    /// Most recent trades, oldest-first, optionally filtered by symbol.
    pub async fn query_trades(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
    ) -> Result<Vec<SimulatedTrade>> {
        let limit = limit.clamp(1, MAX_QUERY_LIMIT);
        let wanted = upper_symbols(symbols);

        let conn = self.conn.lock().await;
        let (sql, bind) = select_sql(
            "SELECT timestamp, symbol, buy_exchange, sell_exchange, size, pnl_usd, latency_ms
             FROM trades",
            &wanted,
            limit,
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows: Vec<SimulatedTrade> = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                Ok(SimulatedTrade {
                    timestamp: parse_timestamp(row.get::<_, String>(0)?),
                    symbol: row.get(1)?,
                    buy_exchange: row.get(2)?,
                    sell_exchange: row.get(3)?,
                    size: row.get(4)?,
                    pnl_usd: row.get(5)?,
                    latency_ms: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        rows.reverse();
        Ok(rows)
    }
}

fn upper_symbols(symbols: Option<&[String]>) -> Vec<String> {
    symbols
        .unwrap_or_default()
        .iter()
        .map(|symbol| symbol.to_ascii_uppercase())
        .collect()
}

/// Assemble `SELECT ... [WHERE symbol IN (...)] ORDER BY timestamp DESC
/// LIMIT n` plus its bind values.
fn select_sql(base: &str, symbols: &[String], limit: usize) -> (String, Vec<String>) {
    let mut sql = base.to_string();
    let mut bind: Vec<String> = Vec::new();
    if !symbols.is_empty() {
        let placeholders = vec!["?"; symbols.len()].join(", ");
        sql.push_str(&format!(" WHERE symbol IN ({placeholders})"));
        bind.extend(symbols.iter().cloned());
    }
    sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {limit}"));
    (sql, bind)
}

fn parse_timestamp(raw: String) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>().unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl HistoricalStore for Database {
    async fn list_opportunities(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
    ) -> Result<Vec<Opportunity>> {
        self.query_opportunities(limit, symbols).await
    }

    async fn list_trades(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
    ) -> Result<Vec<SimulatedTrade>> {
        self.query_trades(limit, symbols).await
    }
}
