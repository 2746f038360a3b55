//! HTTP/WebSocket façade over the arbitrage service.
//!
//! Thin adapters only: handlers translate queries and bodies, call the
//! engine/service, and shape JSON. The WebSocket route pushes one
//! `arbitrage_snapshot` frame per second per connection.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::StatusCode,
    response::{Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::interval;
use tracing::{debug, warn};

use crate::arbitrage::EngineSnapshot;
use crate::inventory::RebalanceReport;
use crate::models::{MetricsSample, Opportunity, SimulatedTrade};
use crate::service::ArbitrageService;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ArbitrageService>,
    pub http: reqwest::Client,
}

/// Human-readable symbol label for the UI.
fn symbol_name(symbol: &str) -> String {
    match symbol.to_ascii_uppercase().as_str() {
        "BTCUSDT" => "Bitcoin (BTC/USDT)".to_string(),
        "ETHUSDT" => "Ethereum (ETH/USDT)".to_string(),
        "ADAUSDT" => "Cardano (ADA/USDT)".to_string(),
        "BNBUSDT" => "BNB (BNB/USDT)".to_string(),
        "SOLUSDT" => "Solana (SOL/USDT)".to_string(),
        other => other.to_string(),
    }
}

/// Comma-separated symbol filter -> normalized list.
fn parse_symbols(raw: Option<&str>) -> Option<Vec<String>> {
    let list: Vec<String> = raw?
        .split(',')
        .map(|symbol| symbol.trim().to_ascii_uppercase())
        .filter(|symbol| !symbol.is_empty())
        .collect();
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "arbwatch-api",
        "status": "ok",
        "module": "arbitrage-simulator",
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"ok": true}))
}

pub async fn get_status(State(state): State<AppState>) -> Json<EngineSnapshot> {
    Json(state.service.engine.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct SimulationVolumePayload {
    pub simulation_volume_usd: Option<f64>,
}

pub async fn post_simulation_volume(
    State(state): State<AppState>,
    Json(payload): Json<SimulationVolumePayload>,
) -> Json<EngineSnapshot> {
    Json(state.service.set_simulation_volume_usd(payload.simulation_volume_usd))
}

#[derive(Debug, Deserialize)]
pub struct SymbolPayload {
    pub symbol: String,
}

pub async fn post_symbol(
    State(state): State<AppState>,
    Json(payload): Json<SymbolPayload>,
) -> Result<Json<EngineSnapshot>, StatusCode> {
    let symbol = payload.symbol.trim();
    if symbol.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(state.service.set_symbol(symbol).await))
}

#[derive(Debug, Deserialize)]
pub struct ExchangeTogglePayload {
    pub name: String,
    pub enabled: bool,
}

pub async fn post_exchange_toggle(
    State(state): State<AppState>,
    Json(payload): Json<ExchangeTogglePayload>,
) -> Result<Json<EngineSnapshot>, StatusCode> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(
        state.service.set_exchange_enabled(name, payload.enabled).await,
    ))
}

#[derive(Debug, Serialize)]
pub struct RebalanceResponse {
    pub report: RebalanceReport,
    pub snapshot: EngineSnapshot,
}

pub async fn post_rebalance(State(state): State<AppState>) -> Json<RebalanceResponse> {
    let report = state.service.rebalance_quotes();
    Json(RebalanceResponse {
        report,
        snapshot: state.service.engine.snapshot(),
    })
}

#[derive(Debug, Deserialize)]
pub struct OpportunityQuery {
    pub limit: Option<usize>,
    /// Comma-separated symbol filter.
    pub symbols: Option<String>,
    pub simulation_volume_usd: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct NamedOpportunity {
    #[serde(flatten)]
    pub item: Opportunity,
    pub symbol_name: String,
}

#[derive(Debug, Serialize)]
pub struct OpportunitiesResponse {
    pub items: Vec<NamedOpportunity>,
}

pub async fn get_opportunities(
    Query(query): Query<OpportunityQuery>,
    State(state): State<AppState>,
) -> Json<OpportunitiesResponse> {
    let limit = query.limit.unwrap_or(100);
    let symbols = parse_symbols(query.symbols.as_deref());
    let items = state
        .service
        .engine
        .list_opportunities(limit, symbols.as_deref(), query.simulation_volume_usd)
        .await;
    Json(OpportunitiesResponse {
        items: items
            .into_iter()
            .map(|item| NamedOpportunity {
                symbol_name: symbol_name(&item.symbol),
                item,
            })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
pub struct TradeQuery {
    pub limit: Option<usize>,
    pub symbols: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct NamedTrade {
    #[serde(flatten)]
    pub item: SimulatedTrade,
    pub symbol_name: String,
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub items: Vec<NamedTrade>,
}

pub async fn get_trades(
    Query(query): Query<TradeQuery>,
    State(state): State<AppState>,
) -> Json<TradesResponse> {
    let limit = query.limit.unwrap_or(100);
    let symbols = parse_symbols(query.symbols.as_deref());
    let items = state
        .service
        .engine
        .list_trades(limit, symbols.as_deref())
        .await;
    Json(TradesResponse {
        items: items
            .into_iter()
            .map(|item| NamedTrade {
                symbol_name: symbol_name(&item.symbol),
                item,
            })
            .collect(),
    })
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SeriesResponse {
    pub items: Vec<MetricsSample>,
}

pub async fn get_spread_series(
    Query(query): Query<SeriesQuery>,
    State(state): State<AppState>,
) -> Json<SeriesResponse> {
    let limit = query.limit.unwrap_or(200);
    Json(SeriesResponse {
        items: state.service.engine.spread_series(limit),
    })
}

// ---------------------------------------------------------------------------
// Market history (external fetch, CoinGecko with Binance klines fallback)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub symbol: String,
    pub days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub time: i64,
    pub price: f64,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub symbol: String,
    pub currency: String,
    pub days: u32,
    pub source: String,
    pub items: Vec<HistoryPoint>,
}

fn coingecko_id(symbol: &str) -> Option<&'static str> {
    match symbol.to_ascii_uppercase().as_str() {
        "BTC" => Some("bitcoin"),
        "ETH" => Some("ethereum"),
        "SOL" => Some("solana"),
        "BNB" => Some("binancecoin"),
        "XRP" => Some("ripple"),
        "ADA" => Some("cardano"),
        "AVAX" => Some("avalanche-2"),
        "DOT" => Some("polkadot"),
        "LINK" => Some("chainlink"),
        _ => None,
    }
}

pub async fn get_market_history(
    Query(query): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let symbol = query.symbol.trim().to_ascii_uppercase();
    let days = query.days.unwrap_or(30).clamp(7, 90);
    let coin_id = coingecko_id(&symbol).ok_or(StatusCode::BAD_REQUEST)?;

    let mut source = "coingecko";
    let mut items = fetch_market_chart(&state.http, coin_id, days)
        .await
        .unwrap_or_default();

    if items.is_empty() {
        source = "binance";
        items = fetch_binance_klines(&state.http, &symbol, days)
            .await
            .map_err(|error| {
                warn!(%error, symbol = %symbol, "market history fetch failed");
                StatusCode::BAD_GATEWAY
            })?;
    }

    if items.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(HistoryResponse {
        symbol,
        currency: "EUR".to_string(),
        days,
        source: source.to_string(),
        items,
    }))
}

async fn fetch_market_chart(
    client: &reqwest::Client,
    coin_id: &str,
    days: u32,
) -> anyhow::Result<Vec<HistoryPoint>> {
    let api_key =
        std::env::var("COINGECKO_API_KEY").unwrap_or_else(|_| "CG-DemoAPIKey".to_string());
    let url = format!(
        "https://api.coingecko.com/api/v3/coins/{coin_id}/market_chart\
         ?vs_currency=eur&days={days}&interval=daily&precision=2&x_cg_demo_api_key={api_key}"
    );
    let payload: serde_json::Value = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let mut items = Vec::new();
    if let Some(prices) = payload.get("prices").and_then(|value| value.as_array()) {
        for point in prices {
            let Some(pair) = point.as_array() else { continue };
            if pair.len() < 2 {
                continue;
            }
            let (Some(time), Some(price)) = (pair[0].as_i64(), pair[1].as_f64()) else {
                continue;
            };
            items.push(HistoryPoint { time, price });
        }
    }
    Ok(items)
}

async fn fetch_binance_klines(
    client: &reqwest::Client,
    symbol: &str,
    days: u32,
) -> anyhow::Result<Vec<HistoryPoint>> {
    let url = format!(
        "https://api.binance.com/api/v3/klines?symbol={symbol}EUR&interval=1d&limit={days}"
    );
    let payload: serde_json::Value = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    let mut items = Vec::new();
    if let Some(rows) = payload.as_array() {
        for row in rows {
            let Some(fields) = row.as_array() else { continue };
            if fields.len() < 5 {
                continue;
            }
            let Some(open_time) = fields[0].as_i64() else { continue };
            let Some(close) = fields[4].as_str().and_then(|raw| raw.parse::<f64>().ok()) else {
                continue;
            };
            items.push(HistoryPoint {
                time: open_time,
                price: close,
            });
        }
    }
    Ok(items)
}

// ---------------------------------------------------------------------------
// WebSocket push
// ---------------------------------------------------------------------------

const WS_PUSH_INTERVAL: Duration = Duration::from_secs(1);
const WS_SERIES_LIMIT: usize = 50;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut ticker = interval(WS_PUSH_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let snapshot = state.service.engine.snapshot();
                let spread_series = state.service.engine.spread_series(WS_SERIES_LIMIT);
                let frame = json!({
                    "type": "arbitrage_snapshot",
                    "snapshot": snapshot,
                    "spread_series": spread_series,
                });
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(error) => {
                        warn!(%error, "snapshot frame serialization failed");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("arbitrage ws client disconnected");
                        break;
                    }
                    Some(Err(_)) => break,
                    // Client pings and stray frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
