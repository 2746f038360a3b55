//! Per-venue inventory: wallets, reference prices and the transfer-cost
//! model used when assets move between venues.
//!
//! Wallets hold one designated quote asset (USDT) plus any number of base
//! assets. All mutation happens inside the engine's critical section; this
//! module only does the bookkeeping.

use std::collections::{BTreeMap, HashMap};

use lazy_static::lazy_static;
use serde::Serialize;

use crate::symbol::is_stable_quote;

/// Designated quote asset for wallet balances.
pub const QUOTE_ASSET: &str = "USDT";

/// Initial quote allocation per venue, USD.
pub const INITIAL_QUOTE_ALLOCATION_USD: f64 = 2_000.0;

/// Initial USD-equivalent allocation per known base asset per venue.
pub const INITIAL_BASE_ALLOCATION_USD: f64 = 2_000.0;

/// Rebalance convergence tolerance, USD.
pub const REBALANCE_TOLERANCE_USD: f64 = 0.01;

lazy_static! {
    /// Static reference prices, USD. Pricing of last resort when no
    /// stable-quoted book is available for an asset.
    static ref REFERENCE_PRICES: HashMap<&'static str, f64> = {
        let mut table = HashMap::new();
        table.insert("BTC", 72_000.0);
        table.insert("ETH", 3_000.0);
        table.insert("SOL", 180.0);
        table.insert("BNB", 600.0);
        table.insert("ADA", 0.45);
        table.insert("XRP", 0.6);
        table.insert("DOT", 7.0);
        table.insert("LINK", 14.0);
        table.insert("AVAX", 30.0);
        table.insert("USDT", 1.0);
        table.insert("USDC", 1.0);
        table.insert("USD", 1.0);
        table.insert("EUR", 1.0);
        table
    };

    /// Fixed on-chain units charged per inter-venue transfer of an asset.
    static ref TRANSFER_UNITS: HashMap<&'static str, f64> = {
        let mut table = HashMap::new();
        table.insert("BTC", 0.0004);
        table.insert("ETH", 0.003);
        table.insert("SOL", 0.01);
        table.insert("BNB", 0.005);
        table.insert("ADA", 1.0);
        table.insert("XRP", 0.25);
        table.insert("DOT", 0.1);
        table.insert("LINK", 0.5);
        table.insert("AVAX", 0.1);
        table.insert("USDT", 1.0);
        table.insert("USDC", 1.0);
        table.insert("USD", 1.0);
        table.insert("EUR", 1.0);
        table
    };
}

/// Whether the asset appears in the static reference-price table.
pub fn has_reference_price(asset: &str) -> bool {
    REFERENCE_PRICES.contains_key(asset.to_ascii_uppercase().as_str())
}

/// Whether the asset appears in the transfer-unit policy table.
pub fn has_transfer_units(asset: &str) -> bool {
    TRANSFER_UNITS.contains_key(asset.to_ascii_uppercase().as_str())
}

/// Static USD reference price for an asset; 1.0 for unknown assets.
pub fn reference_price(asset: &str) -> f64 {
    let upper = asset.to_ascii_uppercase();
    if is_stable_quote(&upper) {
        return 1.0;
    }
    REFERENCE_PRICES.get(upper.as_str()).copied().unwrap_or(1.0)
}

/// On-chain units charged per transfer of an asset; 1.0 for unknown assets.
pub fn transfer_units(asset: &str) -> f64 {
    let upper = asset.to_ascii_uppercase();
    TRANSFER_UNITS.get(upper.as_str()).copied().unwrap_or(1.0)
}

/// USD cost of moving `asset` between venues at the given unit price.
pub fn transfer_cost_usd(asset: &str, unit_price_usd: f64) -> f64 {
    transfer_units(asset) * unit_price_usd
}

/// One venue's holdings: a quote balance plus base-asset balances.
#[derive(Debug, Clone, Serialize)]
pub struct Wallet {
    pub quote_asset: String,
    pub quote_balance: f64,
    /// BTreeMap so snapshots serialize in a stable order.
    pub base_balances: BTreeMap<String, f64>,
}

impl Wallet {
    pub fn new(quote_balance: f64) -> Self {
        Self {
            quote_asset: QUOTE_ASSET.to_string(),
            quote_balance,
            base_balances: BTreeMap::new(),
        }
    }

    /// A wallet funded at the standard per-venue allocation: the fixed
    /// quote amount plus the USD-equivalent of each base asset.
    pub fn allocated(base_assets: &[String]) -> Self {
        let mut wallet = Self::new(INITIAL_QUOTE_ALLOCATION_USD);
        for asset in base_assets {
            let units = INITIAL_BASE_ALLOCATION_USD / reference_price(asset);
            wallet.credit_base(asset, units);
        }
        wallet
    }

    pub fn base_balance(&self, asset: &str) -> f64 {
        self.base_balances
            .get(&asset.to_ascii_uppercase())
            .copied()
            .unwrap_or(0.0)
    }

    pub fn credit_base(&mut self, asset: &str, amount: f64) {
        *self
            .base_balances
            .entry(asset.to_ascii_uppercase())
            .or_insert(0.0) += amount;
    }

    pub fn debit_base(&mut self, asset: &str, amount: f64) {
        self.credit_base(asset, -amount);
    }

    /// USD estimate of everything in the wallet at the given pricer.
    pub fn estimated_total_usd(&self, price_of: impl Fn(&str) -> f64) -> f64 {
        let base_total: f64 = self
            .base_balances
            .iter()
            .map(|(asset, amount)| amount * price_of(asset))
            .sum();
        self.quote_balance + base_total
    }
}

/// Outcome of one `rebalance_quotes` run.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceReport {
    pub transfers: usize,
    pub total_moved_usd: f64,
    pub target_per_wallet_usd: f64,
}

/// All venue wallets.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    wallets: HashMap<String, Wallet>,
}

impl Inventory {
    /// Allocate wallets for `venues`: a fixed quote amount each, plus a
    /// fixed USD-equivalent of every base asset, priced off the static
    /// reference table.
    pub fn allocate(venues: &[String], base_assets: &[String]) -> Self {
        let mut wallets = HashMap::new();
        for venue in venues {
            wallets.insert(venue.clone(), Wallet::allocated(base_assets));
        }
        Self { wallets }
    }

    pub fn insert_wallet(&mut self, venue: &str, wallet: Wallet) {
        self.wallets.insert(venue.to_string(), wallet);
    }

    pub fn wallet(&self, venue: &str) -> Option<&Wallet> {
        self.wallets.get(venue)
    }

    pub fn wallet_mut(&mut self, venue: &str) -> Option<&mut Wallet> {
        self.wallets.get_mut(venue)
    }

    pub fn venues(&self) -> impl Iterator<Item = &String> {
        self.wallets.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Wallet)> {
        self.wallets.iter()
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Make sure every base asset of `assets` exists in each wallet,
    /// funding newly seen assets at the standard allocation. Used when the
    /// configured symbol changes; existing balances are retained.
    pub fn ensure_base_assets(&mut self, assets: &[String]) {
        for wallet in self.wallets.values_mut() {
            for asset in assets {
                let key = asset.to_ascii_uppercase();
                if !wallet.base_balances.contains_key(&key) {
                    let units = INITIAL_BASE_ALLOCATION_USD / reference_price(asset);
                    wallet.credit_base(asset, units);
                }
            }
        }
    }

    /// Move quote balance between two venues. Returns false when the
    /// source cannot cover the amount.
    pub fn transfer_quote(&mut self, from: &str, to: &str, amount: f64) -> bool {
        if amount <= 0.0 || from == to {
            return false;
        }
        match self.wallets.get(from) {
            Some(wallet) if wallet.quote_balance >= amount => {}
            _ => return false,
        }
        if !self.wallets.contains_key(to) {
            return false;
        }
        if let Some(wallet) = self.wallets.get_mut(from) {
            wallet.quote_balance -= amount;
        }
        if let Some(wallet) = self.wallets.get_mut(to) {
            wallet.quote_balance += amount;
        }
        true
    }

    /// Move base-asset balance between two venues. Returns false when the
    /// source cannot cover the amount.
    pub fn transfer_base(&mut self, asset: &str, from: &str, to: &str, amount: f64) -> bool {
        if amount <= 0.0 || from == to {
            return false;
        }
        match self.wallets.get(from) {
            Some(wallet) if wallet.base_balance(asset) >= amount => {}
            _ => return false,
        }
        if !self.wallets.contains_key(to) {
            return false;
        }
        if let Some(wallet) = self.wallets.get_mut(from) {
            wallet.debit_base(asset, amount);
        }
        if let Some(wallet) = self.wallets.get_mut(to) {
            wallet.credit_base(asset, amount);
        }
        true
    }

    /// Iteratively move quote balance from the richest wallet to the
    /// poorest until every wallet sits within the tolerance of the mean.
    /// The per-move transfer cost is charged by the caller per transfer in
    /// the report; wallet balances themselves converge to the target.
    pub fn rebalance_quotes(&mut self) -> RebalanceReport {
        let count = self.wallets.len();
        if count < 2 {
            return RebalanceReport {
                transfers: 0,
                total_moved_usd: 0.0,
                target_per_wallet_usd: self
                    .wallets
                    .values()
                    .next()
                    .map(|wallet| wallet.quote_balance)
                    .unwrap_or(0.0),
            };
        }

        let total: f64 = self.wallets.values().map(|wallet| wallet.quote_balance).sum();
        let target = total / count as f64;

        let mut transfers = 0usize;
        let mut moved = 0.0f64;

        // Bounded by count^2 moves in the worst case; the cap is a guard
        // against floating-point stalls.
        for _ in 0..count * count + 16 {
            let (richest, richest_balance) = match self
                .wallets
                .iter()
                .max_by(|a, b| a.1.quote_balance.total_cmp(&b.1.quote_balance))
            {
                Some((venue, wallet)) => (venue.clone(), wallet.quote_balance),
                None => break,
            };
            let (poorest, poorest_balance) = match self
                .wallets
                .iter()
                .min_by(|a, b| a.1.quote_balance.total_cmp(&b.1.quote_balance))
            {
                Some((venue, wallet)) => (venue.clone(), wallet.quote_balance),
                None => break,
            };

            let surplus = richest_balance - target;
            let deficit = target - poorest_balance;
            if surplus <= REBALANCE_TOLERANCE_USD && deficit <= REBALANCE_TOLERANCE_USD {
                break;
            }

            let amount = surplus.min(deficit).max(0.0);
            if amount <= 0.0 || !self.transfer_quote(&richest, &poorest, amount) {
                break;
            }
            transfers += 1;
            moved += amount;
        }

        RebalanceReport {
            transfers,
            total_moved_usd: moved,
            target_per_wallet_usd: target,
        }
    }
}
