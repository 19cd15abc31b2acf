use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::feeds::PriceSource;
use crate::models::{ResolutionReport, Round, RoundError};
use crate::relay::RoundRelay;
use crate::rounds::RoundManager;
use crate::storage::{RoundStore, StoredRound};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RoundManager>,
    pub store: Arc<RoundStore>,
    pub price_source: Arc<dyn PriceSource>,
    pub relay: Arc<dyn RoundRelay>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/price", get(get_price))
        .route("/api/round", get(get_round))
        .route("/api/start-round", post(start_round))
        .route("/api/resolve-round", post(resolve_round))
        .route("/api/rounds", get(get_rounds))
        .route("/api/stats", get(get_stats))
        .with_state(state)
}

// ===== Route Handlers =====

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Live spot price
async fn get_price(State(state): State<AppState>) -> Result<Json<PriceResponse>, ApiError> {
    let price = state.price_source.current_price().await?;
    Ok(Json(PriceResponse {
        price,
        timestamp: Utc::now(),
    }))
}

/// Current round snapshot combined with the live price.
///
/// The snapshot stays available when the feed is down; `currentPrice`
/// is just null then.
async fn get_round(State(state): State<AppState>) -> Json<crate::models::RoundSnapshot> {
    let current_price = match state.price_source.current_price().await {
        Ok(price) => Some(price),
        Err(e) => {
            warn!("live price unavailable for snapshot: {}", e);
            None
        }
    };

    Json(state.manager.snapshot(current_price))
}

/// Manual trigger: open the next round at the live price
async fn start_round(State(state): State<AppState>) -> Result<Json<StartRoundResponse>, ApiError> {
    let price = state.price_source.current_price().await?;
    let round = state.manager.start_round(price)?;

    info!(
        "🚀 Round {} started at ${} ({} {}%)",
        round.round_number,
        round.start_price,
        round.prediction.direction.as_str(),
        round.prediction.confidence
    );

    persist_started(&state, &round);
    if let Err(e) = state.relay.on_round_started(&round).await {
        warn!(round = round.round_number, "relay start failed: {}", e);
    }

    Ok(Json(StartRoundResponse {
        success: true,
        round,
    }))
}

/// Manual trigger: resolve the active round at the live price
async fn resolve_round(
    State(state): State<AppState>,
) -> Result<Json<ResolutionReport>, ApiError> {
    let end_price = state.price_source.current_price().await?;
    let report = state.manager.resolve_round(end_price)?;

    info!(
        "✅ Round {} resolved: {} -> {} ({}), prediction was {}",
        report.round_number,
        report.start_price,
        report.end_price,
        report.actual_direction.as_str(),
        if report.prediction_correct {
            "CORRECT"
        } else {
            "WRONG"
        }
    );

    persist_resolved(&state, &report);
    if let Err(e) = state.relay.on_round_resolved(&report).await {
        warn!(round = report.round_number, "relay resolve failed: {}", e);
    }

    Ok(Json(report))
}

/// Persisted round history, newest first
async fn get_rounds(
    State(state): State<AppState>,
    Query(params): Query<RoundsQuery>,
) -> Result<Json<RoundsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(50).min(500);
    let rounds = state.store.recent(limit)?;

    Ok(Json(RoundsResponse {
        count: rounds.len(),
        rounds,
    }))
}

/// Aggregate forecast accuracy
async fn get_stats(
    State(state): State<AppState>,
) -> Result<Json<crate::storage::RoundStats>, ApiError> {
    Ok(Json(state.store.stats()?))
}

/// Audit persistence never rolls back an in-memory transition that
/// already committed; a write failure is logged and the request still
/// succeeds.
pub(crate) fn persist_started(state: &AppState, round: &Round) {
    if let Err(e) = state.store.record_started(round) {
        error!(round = round.round_number, "failed to persist round start: {}", e);
    }
}

pub(crate) fn persist_resolved(state: &AppState, report: &ResolutionReport) {
    if let Err(e) = state.store.record_resolved(report) {
        error!(
            round = report.round_number,
            "failed to persist round resolution: {}", e
        );
    }
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct RoundsQuery {
    /// Limit number of results
    limit: Option<u32>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct PriceResponse {
    price: f64,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct StartRoundResponse {
    success: bool,
    round: Round,
}

#[derive(Serialize)]
struct RoundsResponse {
    count: usize,
    rounds: Vec<StoredRound>,
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Round(RoundError),
    Database(anyhow::Error),
}

impl From<RoundError> for ApiError {
    fn from(err: RoundError) -> Self {
        ApiError::Round(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Round(err @ RoundError::PriceUnavailable(_)) => {
                (StatusCode::BAD_GATEWAY, err.to_string())
            }
            ApiError::Round(err @ RoundError::NoActiveRound) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            ApiError::Round(err @ RoundError::InvalidTransition(_)) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            ApiError::Database(err) => {
                error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_errors_map_to_client_visible_statuses() {
        let cases = [
            (
                RoundError::PriceUnavailable("feed down".into()),
                StatusCode::BAD_GATEWAY,
            ),
            (RoundError::NoActiveRound, StatusCode::CONFLICT),
            (RoundError::InvalidTransition(3), StatusCode::CONFLICT),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn database_errors_hide_detail() {
        let response = ApiError::from(anyhow::anyhow!("sqlite exploded")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
