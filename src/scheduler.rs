//! Round scheduler.
//!
//! Ticks once a second, opens a round whenever the wall clock crosses a
//! :00/:15/:30/:45 mark and resolves the active round once it has
//! fewer than the grace-period seconds left. The first observed window
//! is only armed, not started, so a boot mid-window waits for the next
//! mark. Failed starts and resolves are retried on later ticks while
//! the condition still holds; the core itself never retries.

use anyhow::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::api::routes::{persist_resolved, persist_started};
use crate::api::AppState;
use crate::rounds::manager::ROUND_DURATION_SECS;

pub async fn run_round_scheduler(state: AppState, resolve_grace_secs: i64) -> Result<()> {
    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // 0 = not yet armed.
    let mut armed_window: i64 = 0;

    info!(
        "⏰ Round scheduler started (15m marks, resolving under {}s left)",
        resolve_grace_secs
    );

    loop {
        tick.tick().await;

        let now = Utc::now();
        let window_start = (now.timestamp() / ROUND_DURATION_SECS) * ROUND_DURATION_SECS;

        if armed_window == 0 {
            armed_window = window_start;
            continue;
        }

        // Resolve before any start so a still-open round is settled,
        // not silently superseded, when both fall due on the same tick.
        if state.manager.needs_resolution(resolve_grace_secs, now) {
            if let Err(e) = resolve_current_round(&state).await {
                warn!("scheduled resolve failed, will retry: {}", e);
            }
        }

        if window_start != armed_window {
            match start_next_round(&state).await {
                Ok(()) => armed_window = window_start,
                // Leave the window un-armed so the next tick retries.
                Err(e) => warn!("scheduled start failed, will retry: {}", e),
            }
        }
    }
}

async fn start_next_round(state: &AppState) -> Result<()> {
    let price = state.price_source.current_price().await?;
    let round = state.manager.start_round(price)?;

    info!(
        "🚀 Round {} started at ${} — forecast {} ({}% confidence)",
        round.round_number,
        round.start_price,
        round.prediction.direction.as_str(),
        round.prediction.confidence
    );

    persist_started(state, &round);
    if let Err(e) = state.relay.on_round_started(&round).await {
        warn!(round = round.round_number, "relay start failed: {}", e);
    }
    Ok(())
}

async fn resolve_current_round(state: &AppState) -> Result<()> {
    let end_price = state.price_source.current_price().await?;
    let report = state.manager.resolve_round(end_price)?;

    info!(
        "✅ Round {} resolved: {} -> {} ({}), forecast was {}",
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

    persist_resolved(state, &report);
    if let Err(e) = state.relay.on_round_resolved(&report).await {
        warn!(round = report.round_number, "relay resolve failed: {}", e);
    }
    Ok(())
}
