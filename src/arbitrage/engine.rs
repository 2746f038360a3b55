//! Arbitrage evaluation engine.
//!
//! Single-writer state machine: every order-book update is merged under one
//! engine-wide mutex, every directed venue pair on that symbol is evaluated
//! while the mutex is still held, and simulated executions mutate the
//! per-venue wallets in the same critical section. Persistence submission is
//! a non-blocking enqueue, so the lock is never held across I/O.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::inventory::{
    self, Inventory, RebalanceReport, Wallet, INITIAL_QUOTE_ALLOCATION_USD, QUOTE_ASSET,
};
use crate::models::{
    MetricsSample, NormalizedOrderBook, Opportunity, OpportunityStatus, OrderBookLevel,
    SimulatedTrade,
};
use crate::symbol::{is_stable_quote, split_symbol};

use super::{HistoricalStore, PersistenceSink};

/// Bounded ring capacities; oldest entries are overwritten on overflow.
pub const MAX_OPPORTUNITIES: usize = 600;
pub const MAX_TRADES: usize = 300;
pub const MAX_METRICS: usize = 600;

/// Tolerance for fill/funds comparisons on f64 quantities.
const EPSILON: f64 = 1e-9;

/// Walk one side of a book, consuming up to `quantity`. Returns the
/// volume-weighted average price over the consumed levels and the filled
/// quantity. Levels must already be sorted best-first.
fn fill_vwap(levels: &[OrderBookLevel], quantity: f64) -> (f64, f64) {
    let mut remaining = quantity;
    let mut notional = 0.0;
    let mut filled = 0.0;
    for level in levels {
        if remaining <= 0.0 {
            break;
        }
        let take = level.quantity.min(remaining);
        if take <= 0.0 {
            continue;
        }
        notional += level.price * take;
        remaining -= take;
        filled += take;
    }
    let avg = if filled > 0.0 { notional / filled } else { 0.0 };
    (avg, filled)
}

/// Consume `quantity` from the front of a side, dropping exhausted levels.
fn reserve_from_levels(levels: &mut Vec<OrderBookLevel>, quantity: f64) {
    let mut remaining = quantity;
    for level in levels.iter_mut() {
        if remaining <= 0.0 {
            break;
        }
        let consume = level.quantity.min(remaining);
        level.quantity -= consume;
        remaining -= consume;
    }
    levels.retain(|level| level.quantity > 0.0);
}

/// Per-wallet view in a snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WalletView {
    pub quote_asset: String,
    pub quote_balance: f64,
    pub base_balances: BTreeMap<String, f64>,
    pub estimated_total_usd: f64,
    pub status: String,
}

/// Point-in-time read model served to the façade and the WebSocket push.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub symbol: String,
    pub symbols: Vec<String>,
    pub trade_size: f64,
    pub balance_usd: f64,
    pub total_pnl_usd: f64,
    pub simulation_volume_usd: Option<f64>,
    pub active_exchanges: Vec<String>,
    pub inventories: BTreeMap<String, WalletView>,
    pub latest_opportunity: Option<Opportunity>,
}

struct EngineState {
    config: AppConfig,
    /// Latest book per (symbol, venue); replaced wholesale on update.
    books: HashMap<String, HashMap<String, NormalizedOrderBook>>,
    fees: HashMap<String, f64>,
    inventory: Inventory,
    opportunities: VecDeque<Opportunity>,
    executed_trades: VecDeque<SimulatedTrade>,
    metrics_log: VecDeque<MetricsSample>,
    total_pnl_usd: f64,
    balance_usd: f64,
    simulation_volume_usd: Option<f64>,
}

pub struct ArbitrageEngine {
    state: Mutex<EngineState>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    store: Option<Arc<dyn HistoricalStore>>,
}

impl ArbitrageEngine {
    pub fn new(
        config: AppConfig,
        persistence: Option<Arc<dyn PersistenceSink>>,
        store: Option<Arc<dyn HistoricalStore>>,
    ) -> Self {
        let venues: Vec<String> = config
            .enabled_feeds()
            .map(|feed| feed.name.clone())
            .collect();
        let base_assets: Vec<String> = config
            .active_symbols()
            .iter()
            .map(|symbol| split_symbol(symbol).0)
            .collect();
        let inventory = Inventory::allocate(&venues, &base_assets);
        Self::with_inventory(config, inventory, persistence, store)
    }

    /// Construct around pre-seeded wallets instead of the standard
    /// allocation.
    pub fn with_inventory(
        config: AppConfig,
        inventory: Inventory,
        persistence: Option<Arc<dyn PersistenceSink>>,
        store: Option<Arc<dyn HistoricalStore>>,
    ) -> Self {
        let fees: HashMap<String, f64> = config
            .enabled_feeds()
            .map(|feed| (feed.name.clone(), feed.fee))
            .collect();
        let balance_usd = config.starting_balance_usd;

        info!(
            venues = inventory.len(),
            symbols = ?config.active_symbols(),
            "arbitrage engine initialized"
        );

        Self {
            state: Mutex::new(EngineState {
                config,
                books: HashMap::new(),
                fees,
                inventory,
                opportunities: VecDeque::with_capacity(MAX_OPPORTUNITIES),
                executed_trades: VecDeque::with_capacity(MAX_TRADES),
                metrics_log: VecDeque::with_capacity(MAX_METRICS),
                total_pnl_usd: 0.0,
                balance_usd,
                simulation_volume_usd: None,
            }),
            persistence,
            store,
        }
    }

    /// Accept one normalized book: replace state for (symbol, venue) and
    /// evaluate every directed pair on that symbol. Safe to call from any
    /// feed task; serialization happens here.
    pub fn on_order_book(&self, book: NormalizedOrderBook) {
        let mut state = self.state.lock();
        let symbol = book.symbol.to_ascii_uppercase();
        let venue = book.exchange.clone();
        state
            .books
            .entry(symbol.clone())
            .or_default()
            .insert(venue.clone(), book);
        state.evaluate_all_pairs(&symbol, &venue, self.persistence.as_deref());
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock();
        state.snapshot()
    }

    /// Most recent opportunities, oldest first. A positive
    /// `simulation_volume_usd` synthesizes fresh evaluations of the current
    /// books at that notional instead of reading the ring. An empty ring
    /// with a store attached reads through to it; store errors yield an
    /// empty list.
    pub async fn list_opportunities(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
        simulation_volume_usd: Option<f64>,
    ) -> Vec<Opportunity> {
        let in_memory = {
            let state = self.state.lock();
            match simulation_volume_usd {
                Some(volume) if volume > 0.0 => {
                    return state.synthesize_opportunities(limit, symbols, volume);
                }
                _ => state.recent_opportunities(limit, symbols),
            }
        };
        if !in_memory.is_empty() {
            return in_memory;
        }
        match &self.store {
            Some(store) => store
                .list_opportunities(limit, symbols)
                .await
                .unwrap_or_default(),
            None => in_memory,
        }
    }

    /// Most recent simulated trades, oldest first, with the same
    /// store read-through as `list_opportunities`.
    pub async fn list_trades(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
    ) -> Vec<SimulatedTrade> {
        let in_memory = {
            let state = self.state.lock();
            state.recent_trades(limit, symbols)
        };
        if !in_memory.is_empty() {
            return in_memory;
        }
        match &self.store {
            Some(store) => store.list_trades(limit, symbols).await.unwrap_or_default(),
            None => in_memory,
        }
    }

    pub fn spread_series(&self, limit: usize) -> Vec<MetricsSample> {
        let state = self.state.lock();
        let skip = state.metrics_log.len().saturating_sub(limit);
        state.metrics_log.iter().skip(skip).cloned().collect()
    }

    /// Set or clear the USD-notional sizing override. `None` or a
    /// non-positive value clears it.
    pub fn set_simulation_volume_usd(&self, volume: Option<f64>) {
        let mut state = self.state.lock();
        state.simulation_volume_usd = volume.filter(|v| *v > 0.0);
        debug!(volume = ?state.simulation_volume_usd, "simulation volume updated");
    }

    /// Switch the configured symbol. Books for symbols outside the new set
    /// are dropped; inventory is retained, with wallets funded for a newly
    /// seen base asset. Feed adapters are rebuilt by the service layer.
    pub fn set_symbol(&self, symbol: &str) {
        let mut state = self.state.lock();
        let upper = symbol.trim().to_ascii_uppercase();
        state.config.symbol = upper.clone();
        state.config.symbols.clear();
        state.books.retain(|key, _| *key == upper);
        let bases: Vec<String> = vec![split_symbol(&upper).0];
        state.inventory.ensure_base_assets(&bases);
        info!(symbol = %upper, "symbol reconfigured");
    }

    /// Enable or disable a venue. Disabling drops its cached books; feed
    /// adapters are rebuilt by the service layer. Enabling a venue that
    /// never held a wallet allocates one at the standard allocation.
    pub fn set_exchange_enabled(&self, venue: &str, enabled: bool) {
        let mut state = self.state.lock();
        let mut fee = None;
        for feed in state.config.feeds.iter_mut() {
            if feed.name == venue {
                feed.enabled = enabled;
                fee = Some(feed.fee);
            }
        }
        if enabled {
            if let Some(fee) = fee {
                state.fees.insert(venue.to_string(), fee);
            }
            if state.inventory.wallet(venue).is_none() {
                let bases: Vec<String> = state
                    .config
                    .active_symbols()
                    .iter()
                    .map(|symbol| split_symbol(symbol).0)
                    .collect();
                state.inventory.insert_wallet(venue, Wallet::allocated(&bases));
            }
        } else {
            state.fees.remove(venue);
            for venue_books in state.books.values_mut() {
                venue_books.remove(venue);
            }
        }
        info!(venue, enabled, "venue reconfigured");
    }

    /// Level quote balances across venues, charging the quote-asset
    /// transfer cost per move against PnL.
    pub fn rebalance_quotes(&self) -> RebalanceReport {
        let mut state = self.state.lock();
        let report = state.inventory.rebalance_quotes();
        if report.transfers > 0 {
            let per_move = inventory::transfer_cost_usd(QUOTE_ASSET, 1.0);
            let total_cost = per_move * report.transfers as f64;
            state.total_pnl_usd -= total_cost;
            state.balance_usd -= total_cost;
            info!(
                transfers = report.transfers,
                moved_usd = report.total_moved_usd,
                cost_usd = total_cost,
                "quote balances rebalanced"
            );
        }
        report
    }

    /// Currently configured symbols, for feed construction.
    pub fn active_symbols(&self) -> Vec<String> {
        self.state.lock().config.active_symbols()
    }

    /// Copy of the live configuration, as reshaped by reconfiguration
    /// calls. The service layer rebuilds feed adapters from this.
    pub fn config_snapshot(&self) -> AppConfig {
        self.state.lock().config.clone()
    }

    /// Names of currently enabled feeds.
    pub fn enabled_venues(&self) -> Vec<String> {
        self.state
            .lock()
            .config
            .enabled_feeds()
            .map(|feed| feed.name.clone())
            .collect()
    }
}

impl EngineState {
    fn evaluate_all_pairs(
        &mut self,
        symbol: &str,
        trigger_venue: &str,
        persistence: Option<&dyn PersistenceSink>,
    ) {
        let venues: Vec<String> = match self.books.get(symbol) {
            Some(by_venue) if by_venue.len() >= 2 => by_venue.keys().cloned().collect(),
            _ => return,
        };

        let now = Utc::now();
        for buy_venue in &venues {
            for sell_venue in &venues {
                if buy_venue == sell_venue {
                    continue;
                }
                let (latency_ms, opportunity) = {
                    let by_venue = match self.books.get(symbol) {
                        Some(map) => map,
                        None => return,
                    };
                    let (buy_book, sell_book) =
                        match (by_venue.get(buy_venue), by_venue.get(sell_venue)) {
                            (Some(buy), Some(sell)) => (buy, sell),
                            _ => continue,
                        };
                    let freshest = buy_book.received_timestamp.max(sell_book.received_timestamp);
                    let latency_ms = (now - freshest).num_milliseconds().max(0) as f64;
                    let opportunity = self.evaluate_pair(
                        buy_book,
                        sell_book,
                        latency_ms,
                        now,
                        self.simulation_volume_usd,
                    );
                    (latency_ms, opportunity)
                };

                self.metrics_log.push_back(MetricsSample {
                    timestamp: now,
                    spread_gross_pct: opportunity.gross_spread_pct,
                    spread_net_pct: opportunity.net_spread_pct,
                    expected_profit_usd: opportunity.expected_profit_usd,
                    status: opportunity.status,
                    reason: opportunity.reason.clone(),
                    pair: format!("{}->{}", buy_venue, sell_venue),
                    trigger_exchange: trigger_venue.to_string(),
                    latency_ms,
                });
                while self.metrics_log.len() > MAX_METRICS {
                    self.metrics_log.pop_front();
                }

                let accepted = opportunity.status == OpportunityStatus::Accepted;
                if accepted {
                    if let Some(sink) = persistence {
                        sink.submit_opportunity(&opportunity);
                    }
                }

                let should_simulate = self.config.auto_simulate_execution
                    && accepted
                    && opportunity.expected_profit_usd >= self.config.opportunity_threshold_usd;

                self.opportunities.push_back(opportunity.clone());
                while self.opportunities.len() > MAX_OPPORTUNITIES {
                    self.opportunities.pop_front();
                }

                if should_simulate {
                    self.simulate_execution(&opportunity, persistence);
                }
            }
        }
    }

    /// Evaluate one directed pair. Pure with respect to wallets and books;
    /// only the simulator mutates state.
    fn evaluate_pair(
        &self,
        buy_book: &NormalizedOrderBook,
        sell_book: &NormalizedOrderBook,
        latency_ms: f64,
        timestamp: DateTime<Utc>,
        volume_override_usd: Option<f64>,
    ) -> Opportunity {
        let make = |status: OpportunityStatus,
                    reason: &str,
                    size: f64,
                    gross: f64,
                    net: f64,
                    profit: f64,
                    buy_vwap: f64,
                    sell_vwap: f64| Opportunity {
            timestamp,
            status,
            reason: reason.to_string(),
            symbol: buy_book.symbol.clone(),
            buy_exchange: buy_book.exchange.clone(),
            sell_exchange: sell_book.exchange.clone(),
            trade_size: size,
            gross_spread_pct: gross,
            net_spread_pct: net,
            expected_profit_usd: profit,
            latency_ms,
            buy_vwap,
            sell_vwap,
            buy_book_updated_at: Some(buy_book.exchange_timestamp),
            sell_book_updated_at: Some(sell_book.exchange_timestamp),
        };

        let size = match volume_override_usd {
            Some(volume) => {
                let best_ask = buy_book.best_ask().unwrap_or(0.0);
                if best_ask > 0.0 {
                    volume / best_ask
                } else {
                    0.0
                }
            }
            None => self.config.trade_size,
        };
        if size <= 0.0 {
            return make(
                OpportunityStatus::Discarded,
                "invalid_trade_size",
                size,
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
            );
        }

        let (buy_vwap, buy_filled) = fill_vwap(&buy_book.asks, size);
        let (sell_vwap, sell_filled) = fill_vwap(&sell_book.bids, size);
        let filled = buy_filled.min(sell_filled);
        if filled + EPSILON < size {
            return make(
                OpportunityStatus::InsufficientLiquidity,
                "insufficient_depth",
                size,
                0.0,
                0.0,
                0.0,
                buy_vwap,
                sell_vwap,
            );
        }

        let buy_fee = self.fees.get(&buy_book.exchange).copied().unwrap_or(0.0);
        let sell_fee = self.fees.get(&sell_book.exchange).copied().unwrap_or(0.0);
        let buy_unit_with_fee = buy_vwap * (1.0 + buy_fee);
        let sell_unit_after_fee = sell_vwap * (1.0 - sell_fee);
        let buy_cost = buy_unit_with_fee * size;
        let sell_value = sell_unit_after_fee * size;

        let base = split_symbol(&buy_book.symbol).0;
        let transfer_cost = self.transfer_cost_for(&base, &buy_book.exchange);
        let net_profit = sell_value - buy_cost - transfer_cost;

        let gross_spread_pct = if buy_vwap > 0.0 {
            (sell_vwap - buy_vwap) / buy_vwap * 100.0
        } else {
            0.0
        };
        let net_spread_pct = if buy_cost > 0.0 {
            net_profit / buy_cost * 100.0
        } else {
            0.0
        };

        if let Some(wallet) = self.inventory.wallet(&buy_book.exchange) {
            if buy_cost > wallet.quote_balance + EPSILON {
                return make(
                    OpportunityStatus::NoFunds,
                    "insufficient_quote_balance",
                    size,
                    gross_spread_pct,
                    net_spread_pct,
                    net_profit,
                    buy_vwap,
                    sell_vwap,
                );
            }
        }
        if let Some(wallet) = self.inventory.wallet(&sell_book.exchange) {
            if wallet.base_balance(&base) + EPSILON < size {
                return make(
                    OpportunityStatus::NoFunds,
                    "insufficient_base_balance",
                    size,
                    gross_spread_pct,
                    net_spread_pct,
                    net_profit,
                    buy_vwap,
                    sell_vwap,
                );
            }
        }

        if net_profit <= 0.0 {
            return make(
                OpportunityStatus::Discarded,
                "fees_and_transfer_filtered",
                size,
                gross_spread_pct,
                net_spread_pct,
                net_profit,
                buy_vwap,
                sell_vwap,
            );
        }

        make(
            OpportunityStatus::Accepted,
            "profitable",
            size,
            gross_spread_pct,
            net_spread_pct,
            net_profit,
            buy_vwap,
            sell_vwap,
        )
    }

    /// Book-keep an accepted opportunity: top up wallets by inter-venue
    /// transfer where short, debit/credit both wallets, reserve depth, and
    /// record the realized PnL. Abandons silently when inventory remains
    /// insufficient after transfers.
    fn simulate_execution(
        &mut self,
        opportunity: &Opportunity,
        persistence: Option<&dyn PersistenceSink>,
    ) {
        let size = opportunity.trade_size;
        let buy_venue = opportunity.buy_exchange.clone();
        let sell_venue = opportunity.sell_exchange.clone();
        let base = split_symbol(&opportunity.symbol).0;

        let buy_fee = self.fees.get(&buy_venue).copied().unwrap_or(0.0);
        let sell_fee = self.fees.get(&sell_venue).copied().unwrap_or(0.0);
        let buy_cost = opportunity.buy_vwap * (1.0 + buy_fee) * size;
        let sell_value = opportunity.sell_vwap * (1.0 - sell_fee) * size;

        let buy_quote = match self.inventory.wallet(&buy_venue) {
            Some(wallet) => wallet.quote_balance,
            None => return,
        };
        if buy_quote + EPSILON < buy_cost {
            let shortfall = buy_cost - buy_quote;
            if self.inventory.transfer_quote(&sell_venue, &buy_venue, shortfall) {
                let cost = inventory::transfer_cost_usd(QUOTE_ASSET, 1.0);
                self.total_pnl_usd -= cost;
                self.balance_usd -= cost;
                debug!(
                    from = %sell_venue,
                    to = %buy_venue,
                    amount = shortfall,
                    "quote transfer before execution"
                );
            }
            let topped_up = self
                .inventory
                .wallet(&buy_venue)
                .map(|wallet| wallet.quote_balance)
                .unwrap_or(0.0);
            if topped_up + EPSILON < buy_cost {
                return;
            }
        }

        let sell_base = match self.inventory.wallet(&sell_venue) {
            Some(wallet) => wallet.base_balance(&base),
            None => return,
        };
        if sell_base + EPSILON < size {
            let shortfall = size - sell_base;
            if self
                .inventory
                .transfer_base(&base, &buy_venue, &sell_venue, shortfall)
            {
                let cost = self.transfer_cost_for(&base, &buy_venue);
                self.total_pnl_usd -= cost;
                self.balance_usd -= cost;
                debug!(
                    asset = %base,
                    from = %buy_venue,
                    to = %sell_venue,
                    amount = shortfall,
                    "base transfer before execution"
                );
            }
            let topped_up = self
                .inventory
                .wallet(&sell_venue)
                .map(|wallet| wallet.base_balance(&base))
                .unwrap_or(0.0);
            if topped_up + EPSILON < size {
                return;
            }
        }

        if let Some(wallet) = self.inventory.wallet_mut(&buy_venue) {
            wallet.quote_balance -= buy_cost;
            wallet.credit_base(&base, size);
        }
        if let Some(wallet) = self.inventory.wallet_mut(&sell_venue) {
            wallet.quote_balance += sell_value;
            wallet.debit_base(&base, size);
        }

        let symbol = opportunity.symbol.to_ascii_uppercase();
        if let Some(by_venue) = self.books.get_mut(&symbol) {
            if let Some(book) = by_venue.get_mut(&buy_venue) {
                reserve_from_levels(&mut book.asks, size);
            }
            if let Some(book) = by_venue.get_mut(&sell_venue) {
                reserve_from_levels(&mut book.bids, size);
            }
        }

        self.total_pnl_usd += opportunity.expected_profit_usd;
        self.balance_usd += opportunity.expected_profit_usd;

        let trade = SimulatedTrade {
            timestamp: opportunity.timestamp,
            symbol: opportunity.symbol.clone(),
            buy_exchange: buy_venue,
            sell_exchange: sell_venue,
            size,
            pnl_usd: opportunity.expected_profit_usd,
            latency_ms: opportunity.latency_ms,
        };
        if let Some(sink) = persistence {
            sink.submit_trade(&trade);
        }
        self.executed_trades.push_back(trade);
        while self.executed_trades.len() > MAX_TRADES {
            self.executed_trades.pop_front();
        }
    }

    /// USD price of one unit of `asset`: best bid of a stable-quoted book
    /// for the asset on `prefer_venue`, else any venue, else the static
    /// reference table. Stable assets price at par.
    fn asset_price_usd(&self, asset: &str, prefer_venue: &str) -> Option<f64> {
        if is_stable_quote(asset) {
            return Some(1.0);
        }
        let mut fallback = None;
        for (symbol, by_venue) in &self.books {
            let (symbol_base, symbol_quote) = split_symbol(symbol);
            if symbol_base != asset.to_ascii_uppercase() || !is_stable_quote(&symbol_quote) {
                continue;
            }
            if let Some(book) = by_venue.get(prefer_venue) {
                if let Some(bid) = book.best_bid() {
                    return Some(bid);
                }
            }
            if fallback.is_none() {
                fallback = by_venue.values().find_map(|book| book.best_bid());
            }
        }
        fallback
    }

    /// Transfer cost in USD for moving `asset` between venues. Assets in
    /// the policy table are priced in-book when possible, off the static
    /// reference table otherwise; assets outside the table fall back to
    /// the flat configured cost.
    fn transfer_cost_for(&self, asset: &str, prefer_venue: &str) -> f64 {
        if !inventory::has_transfer_units(asset) {
            return self.config.transfer_cost_usd;
        }
        let unit_price = self
            .asset_price_usd(asset, prefer_venue)
            .unwrap_or_else(|| inventory::reference_price(asset));
        inventory::transfer_cost_usd(asset, unit_price)
    }

    fn snapshot(&self) -> EngineSnapshot {
        let mut active: Vec<String> = self
            .books
            .values()
            .flat_map(|by_venue| by_venue.keys().cloned())
            .collect();
        active.sort();
        active.dedup();

        let inventories: BTreeMap<String, WalletView> = self
            .inventory
            .iter()
            .map(|(venue, wallet)| {
                let estimated = wallet.estimated_total_usd(|asset| {
                    self.asset_price_usd(asset, venue)
                        .unwrap_or_else(|| inventory::reference_price(asset))
                });
                let status = if wallet.quote_balance <= 0.0 {
                    "empty"
                } else if wallet.quote_balance < INITIAL_QUOTE_ALLOCATION_USD * 0.1 {
                    "low"
                } else {
                    "ok"
                };
                (
                    venue.clone(),
                    WalletView {
                        quote_asset: wallet.quote_asset.clone(),
                        quote_balance: wallet.quote_balance,
                        base_balances: wallet.base_balances.clone(),
                        estimated_total_usd: estimated,
                        status: status.to_string(),
                    },
                )
            })
            .collect();

        EngineSnapshot {
            symbol: self.config.symbol.clone(),
            symbols: self.config.active_symbols(),
            trade_size: self.config.trade_size,
            balance_usd: self.balance_usd,
            total_pnl_usd: self.total_pnl_usd,
            simulation_volume_usd: self.simulation_volume_usd,
            active_exchanges: active,
            inventories,
            latest_opportunity: self.opportunities.back().cloned(),
        }
    }

    fn recent_opportunities(&self, limit: usize, symbols: Option<&[String]>) -> Vec<Opportunity> {
        let wanted: Option<Vec<String>> = symbols
            .filter(|set| !set.is_empty())
            .map(|set| set.iter().map(|s| s.to_ascii_uppercase()).collect());
        let matches = |item: &Opportunity| match &wanted {
            Some(set) => set.contains(&item.symbol.to_ascii_uppercase()),
            None => true,
        };
        let selected: Vec<Opportunity> = self
            .opportunities
            .iter()
            .rev()
            .filter(|item| matches(item))
            .take(limit)
            .cloned()
            .collect();
        selected.into_iter().rev().collect()
    }

    fn recent_trades(&self, limit: usize, symbols: Option<&[String]>) -> Vec<SimulatedTrade> {
        let wanted: Option<Vec<String>> = symbols
            .filter(|set| !set.is_empty())
            .map(|set| set.iter().map(|s| s.to_ascii_uppercase()).collect());
        let matches = |item: &SimulatedTrade| match &wanted {
            Some(set) => set.contains(&item.symbol.to_ascii_uppercase()),
            None => true,
        };
        let selected: Vec<SimulatedTrade> = self
            .executed_trades
            .iter()
            .rev()
            .filter(|item| matches(item))
            .take(limit)
            .cloned()
            .collect();
        selected.into_iter().rev().collect()
    }

    /// Re-evaluate current books at the given USD notional without touching
    /// the rings, wallets or persistence.
    fn synthesize_opportunities(
        &self,
        limit: usize,
        symbols: Option<&[String]>,
        volume_usd: f64,
    ) -> Vec<Opportunity> {
        let wanted: Option<Vec<String>> = symbols
            .filter(|set| !set.is_empty())
            .map(|set| set.iter().map(|s| s.to_ascii_uppercase()).collect());
        let now = Utc::now();
        let mut items = Vec::new();

        for (symbol, by_venue) in &self.books {
            if let Some(set) = &wanted {
                if !set.contains(symbol) {
                    continue;
                }
            }
            if by_venue.len() < 2 {
                continue;
            }
            for (buy_venue, buy_book) in by_venue {
                for (sell_venue, sell_book) in by_venue {
                    if buy_venue == sell_venue {
                        continue;
                    }
                    let freshest =
                        buy_book.received_timestamp.max(sell_book.received_timestamp);
                    let latency_ms = (now - freshest).num_milliseconds().max(0) as f64;
                    items.push(self.evaluate_pair(
                        buy_book,
                        sell_book,
                        latency_ms,
                        now,
                        Some(volume_usd),
                    ));
                    if items.len() >= limit {
                        return items;
                    }
                }
            }
        }
        items
    }
}
