use std::env;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arbwatch_backend::api::{self, AppState};
use arbwatch_backend::config::parse_cors_origins;
use arbwatch_backend::service::ArbitrageService;

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arbwatch_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn cors_layer() -> CorsLayer {
    match env::var("CORS_ORIGINS") {
        Ok(raw) if !raw.trim().is_empty() => {
            let origins: Vec<HeaderValue> = parse_cors_origins(Some(&raw))
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers([header::CONTENT_TYPE])
                .allow_credentials(true)
        }
        _ => CorsLayer::permissive(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    info!("arbwatch backend starting");

    let root = env::current_dir().context("resolve working directory")?;
    let service = ArbitrageService::new(&root)?;
    service.start().await;

    let http_client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(12))
        .build()
        .context("build HTTP client")?;

    let state = AppState {
        service: service.clone(),
        http: http_client,
    };

    let app = Router::new()
        .route("/", get(api::root))
        .route("/health", get(api::health))
        .route("/api/arbitrage/status", get(api::get_status))
        .route(
            "/api/arbitrage/simulation-volume",
            post(api::post_simulation_volume),
        )
        .route("/api/arbitrage/symbol", post(api::post_symbol))
        .route("/api/arbitrage/exchanges", post(api::post_exchange_toggle))
        .route("/api/arbitrage/rebalance", post(api::post_rebalance))
        .route("/api/arbitrage/opportunities", get(api::get_opportunities))
        .route("/api/arbitrage/trades", get(api::get_trades))
        .route("/api/arbitrage/spread-series", get(api::get_spread_series))
        .route("/api/market/history", get(api::get_market_history))
        .route("/ws/arbitrage", get(api::ws_handler))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http());

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(8000);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "api server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    service.stop().await;
    info!("arbwatch backend stopped");
    Ok(())
}
