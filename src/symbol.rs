//! Symbol parsing helpers.
//!
//! Venue symbols are flat uppercase strings ("BTCUSDT"). Splitting walks a
//! closed list of quote suffixes, longest match first, so "SOLBTC" parses
//! as (SOL, BTC) and not as a failed USDT lookup.

/// Quote assets recognized as symbol suffixes, longest first.
const QUOTE_SUFFIXES: &[&str] = &[
    "USDT", "USDC", "LINK", "AVAX", "USD", "EUR", "BTC", "ETH", "SOL", "BNB", "ADA", "XRP", "DOT",
];

/// Stable quotes treated as USD-equivalent when pricing assets in-book.
pub const STABLE_QUOTES: &[&str] = &["USDT", "USDC", "USD", "EUR"];

/// Split a symbol into (base, quote). Unparseable symbols degrade to
/// ("BASE", "USDT") so the simulator always has something to price.
pub fn split_symbol(symbol: &str) -> (String, String) {
    let upper = symbol.trim().to_ascii_uppercase();

    let mut best: Option<&str> = None;
    for quote in QUOTE_SUFFIXES {
        if upper.len() > quote.len() && upper.ends_with(quote) {
            if best.map_or(true, |b| quote.len() > b.len()) {
                best = Some(quote);
            }
        }
    }

    match best {
        Some(quote) => {
            let base = &upper[..upper.len() - quote.len()];
            (base.to_string(), quote.to_string())
        }
        None => ("BASE".to_string(), "USDT".to_string()),
    }
}

/// Base asset of a symbol.
pub fn base_asset(symbol: &str) -> String {
    split_symbol(symbol).0
}

pub fn is_stable_quote(asset: &str) -> bool {
    STABLE_QUOTES.contains(&asset.to_ascii_uppercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_common_usdt_pairs() {
        assert_eq!(split_symbol("BTCUSDT"), ("BTC".into(), "USDT".into()));
        assert_eq!(split_symbol("ethusdt"), ("ETH".into(), "USDT".into()));
        assert_eq!(split_symbol("AVAXUSDC"), ("AVAX".into(), "USDC".into()));
    }

    #[test]
    fn longest_suffix_wins() {
        // USDT must win over the bare USD suffix.
        assert_eq!(split_symbol("SOLUSD"), ("SOL".into(), "USD".into()));
        assert_eq!(split_symbol("SOLUSDT"), ("SOL".into(), "USDT".into()));
        // Crypto quotes parse too.
        assert_eq!(split_symbol("SOLBTC"), ("SOL".into(), "BTC".into()));
        assert_eq!(split_symbol("DOTETH"), ("DOT".into(), "ETH".into()));
    }

    #[test]
    fn unparseable_symbols_fall_back() {
        assert_eq!(split_symbol("WEIRDPAIR"), ("BASE".into(), "USDT".into()));
        assert_eq!(split_symbol(""), ("BASE".into(), "USDT".into()));
        // A bare quote with no base is not a parse.
        assert_eq!(split_symbol("USDT"), ("BASE".into(), "USDT".into()));
    }

    #[test]
    fn stable_quote_detection() {
        assert!(is_stable_quote("USDT"));
        assert!(is_stable_quote("eur"));
        assert!(!is_stable_quote("BTC"));
    }
}
