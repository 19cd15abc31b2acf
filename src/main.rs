//! MegaPredict - 15-minute ETH/USDT prediction game backend
//!
//! Samples the Binance spot ticker every round, forecasts UP/DOWN from
//! recent price history, runs the round lifecycle on the quarter-hour
//! marks and serves the game API.

use anyhow::{Context, Result};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use megapredict_backend::{
    api::{create_router, AppState},
    feeds::{BinanceTicker, PriceSource},
    models::Config,
    relay::{LogRelay, RoundRelay},
    rounds::RoundManager,
    scheduler,
    storage::RoundStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("🎮 MegaPredict backend starting");

    let config = Config::from_env()?;

    let db_path = resolve_data_path(&config.database_path);
    let store = Arc::new(RoundStore::new(&db_path)?);

    let last_round_number = store.last_round_number()?;
    if last_round_number > 0 {
        info!("↩️  Resuming numbering after round {}", last_round_number);
    }
    let manager = Arc::new(RoundManager::with_last_round_number(last_round_number));

    let price_source: Arc<dyn PriceSource> = Arc::new(BinanceTicker::new(
        &config.price_api_base,
        &config.symbol,
        Duration::from_secs(config.http_timeout_secs),
    )?);
    let relay: Arc<dyn RoundRelay> = Arc::new(LogRelay);

    let app_state = AppState {
        manager,
        store,
        price_source,
        relay,
    };

    if config.scheduler_enabled {
        tokio::spawn(scheduler::run_round_scheduler(
            app_state.clone(),
            config.resolve_grace_secs,
        ));
    } else {
        warn!("⏸️  Scheduler disabled - rounds start only via POST /api/start-round");
    }

    let app = create_router(app_state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "megapredict_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv::dotenv();

    // 2) Also try the crate directory (common when running with
    //    --manifest-path from elsewhere)
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}

/// Treat relative data paths as relative to the crate directory, not
/// the caller's cwd, so running from elsewhere doesn't silently create
/// a second empty database.
fn resolve_data_path(raw: &str) -> String {
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join(p)
        .to_string_lossy()
        .to_string()
}
